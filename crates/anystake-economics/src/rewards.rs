// crates/anystake-economics/src/rewards.rs
//
// Revenue split applied by the treasury at each settlement:
//   1. `distribution_rate` per mille of the revenue goes to the pool ledger.
//   2. The remainder goes to the peg regulator.
//   3. `buyback_rate` per mille of the regulator's share is earmarked for
//      peg defense instead of being claimable yield.
// The ledger share is rounded down and the regulator absorbs the rounding,
// so the parts always sum to the total.

use serde::{Deserialize, Serialize};

use anystake_core::math::apply_per_mille;
use anystake_core::{AnyStakeError, Amount, PER_MILLE};

/// Default ledger share, per mille.
pub const DEFAULT_DISTRIBUTION_RATE: u32 = 700;

/// Default buyback earmark of the regulator share, per mille.
pub const DEFAULT_BUYBACK_RATE: u32 = 300;

/// The result of splitting one settlement's revenue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueSplit {
    pub total: Amount,
    pub ledger_share: Amount,
    /// Full regulator share, buyback included.
    pub regulator_share: Amount,
    /// Part of `regulator_share` earmarked for buybacks.
    pub buyback_share: Amount,
}

impl RevenueSplit {
    /// Regulator share that is claimable as yield.
    pub fn regulator_yield(&self) -> Amount {
        self.regulator_share - self.buyback_share
    }
}

/// Validate a per-mille rate.
pub fn check_rate(rate: u32, name: &str) -> Result<(), AnyStakeError> {
    if rate as Amount > PER_MILLE {
        return Err(AnyStakeError::InvalidConfig(format!(
            "{} must be at most {} per mille, got {}",
            name, PER_MILLE, rate
        )));
    }
    Ok(())
}

/// Split `total` between the ledger and the regulator.
pub fn split_revenue(
    total: Amount,
    distribution_rate: u32,
    buyback_rate: u32,
) -> Result<RevenueSplit, AnyStakeError> {
    check_rate(distribution_rate, "distribution rate")?;
    check_rate(buyback_rate, "buyback rate")?;

    let ledger_share = apply_per_mille(total, distribution_rate)?;
    let regulator_share = total - ledger_share;
    let buyback_share = apply_per_mille(regulator_share, buyback_rate)?;

    Ok(RevenueSplit {
        total,
        ledger_share,
        regulator_share,
        buyback_share,
    })
}
