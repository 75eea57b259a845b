// crates/anystake-sim/src/scenario.rs
//
// Scenario steps. Each step is one platform call (or a block advance) and
// is written in TOML as a `[[steps]]` table tagged by `action`:
//
//   [[steps]]
//   action = "deposit"
//   user = "alice"
//   pool = 0
//   amount = "100"
//
// Ledger steps take an optional `ledger` index; without one they target
// the most recently deployed ledger.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Step {
    /// Move the chain forward.
    Advance { blocks: u64 },

    /// Trade on the venue, moving prices.
    Swap {
        user: String,
        token_in: String,
        token_out: String,
        amount: String,
    },

    Deposit {
        user: String,
        pool: usize,
        amount: String,
        #[serde(default)]
        ledger: Option<usize>,
    },

    Withdraw {
        user: String,
        pool: usize,
        amount: String,
        #[serde(default)]
        ledger: Option<usize>,
    },

    Claim {
        user: String,
        pool: usize,
        #[serde(default)]
        ledger: Option<usize>,
    },

    ClaimAll {
        user: String,
        #[serde(default)]
        ledger: Option<usize>,
    },

    RegulatorDeposit { user: String, amount: String },

    RegulatorWithdraw { user: String, amount: String },

    RegulatorClaim { user: String },

    /// Owner vests reward tokens through the active treasury.
    Bond { amount: String, blocks: u64 },

    /// Plain reward-token transfer into the active treasury.
    Revenue { from: String, amount: String },

    MassUpdate {
        #[serde(default)]
        ledger: Option<usize>,
    },

    SetAlloc {
        pool: usize,
        weight: u64,
        #[serde(default)]
        ledger: Option<usize>,
    },

    SetVip {
        pool: usize,
        amount: String,
        #[serde(default)]
        ledger: Option<usize>,
    },

    SetActive { active: bool },

    SetPriceMultiplier { multiplier: u64 },

    /// Deploy a successor ledger and run the migration sequence. With
    /// `new_treasury` the treasury is replaced as well.
    Migrate {
        #[serde(default)]
        new_treasury: bool,
    },
}

fn ledger_suffix(ledger: &Option<usize>) -> String {
    match ledger {
        Some(index) => format!(" @ledger{}", index),
        None => String::new(),
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Advance { blocks } => write!(f, "advance {}", blocks),
            Step::Swap {
                user,
                token_in,
                token_out,
                amount,
            } => write!(f, "{} swap {} {} -> {}", user, amount, token_in, token_out),
            Step::Deposit {
                user,
                pool,
                amount,
                ledger,
            } => write!(f, "{} deposit {} into pool {}{}", user, amount, pool, ledger_suffix(ledger)),
            Step::Withdraw {
                user,
                pool,
                amount,
                ledger,
            } => write!(f, "{} withdraw {} from pool {}{}", user, amount, pool, ledger_suffix(ledger)),
            Step::Claim { user, pool, ledger } => {
                write!(f, "{} claim pool {}{}", user, pool, ledger_suffix(ledger))
            }
            Step::ClaimAll { user, ledger } => {
                write!(f, "{} claim all{}", user, ledger_suffix(ledger))
            }
            Step::RegulatorDeposit { user, amount } => {
                write!(f, "{} regulator deposit {}", user, amount)
            }
            Step::RegulatorWithdraw { user, amount } => {
                write!(f, "{} regulator withdraw {}", user, amount)
            }
            Step::RegulatorClaim { user } => write!(f, "{} regulator claim", user),
            Step::Bond { amount, blocks } => write!(f, "bond {} over {} blocks", amount, blocks),
            Step::Revenue { from, amount } => write!(f, "{} sends {} revenue", from, amount),
            Step::MassUpdate { ledger } => write!(f, "mass update{}", ledger_suffix(ledger)),
            Step::SetAlloc {
                pool,
                weight,
                ledger,
            } => write!(f, "set pool {} weight {}{}", pool, weight, ledger_suffix(ledger)),
            Step::SetVip {
                pool,
                amount,
                ledger,
            } => write!(f, "set pool {} vip {}{}", pool, amount, ledger_suffix(ledger)),
            Step::SetActive { active } => write!(f, "set regulator active {}", active),
            Step::SetPriceMultiplier { multiplier } => {
                write!(f, "set price multiplier {}", multiplier)
            }
            Step::Migrate { new_treasury } => {
                if *new_treasury {
                    write!(f, "migrate ledger and treasury")
                } else {
                    write!(f, "migrate ledger")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Steps {
        steps: Vec<Step>,
    }

    #[test]
    fn test_parse_tagged_steps() {
        let parsed: Steps = toml::from_str(
            r#"
            [[steps]]
            action = "deposit"
            user = "alice"
            pool = 1
            amount = "2.5"

            [[steps]]
            action = "claim-all"
            user = "bob"
            ledger = 0

            [[steps]]
            action = "migrate"
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.steps[0],
            Step::Deposit {
                user: "alice".to_string(),
                pool: 1,
                amount: "2.5".to_string(),
                ledger: None,
            }
        );
        assert_eq!(
            parsed.steps[1],
            Step::ClaimAll {
                user: "bob".to_string(),
                ledger: Some(0),
            }
        );
        assert_eq!(parsed.steps[2], Step::Migrate { new_treasury: false });
    }

    #[test]
    fn test_unknown_action_rejected() {
        let parsed: Result<Steps, _> = toml::from_str(
            r#"
            [[steps]]
            action = "rug-pull"
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_display() {
        let step = Step::Withdraw {
            user: "alice".to_string(),
            pool: 3,
            amount: "10".to_string(),
            ledger: Some(1),
        };
        assert_eq!(step.to_string(), "alice withdraw 10 from pool 3 @ledger1");
        assert_eq!(Step::Advance { blocks: 5 }.to_string(), "advance 5");
    }
}
