// crates/anystake-market/src/bank.rs
//
// In-memory token balances.
//
// Supports the non-standard token behaviors the staking core must tolerate:
// - tokens with any number of decimals,
// - fee-on-transfer tokens, whose fee is routed to a fee destination (or
//   burned when none is set) unless sender or recipient holds a discount.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use anystake_core::math::{apply_bps, checked_add, checked_sub, mul_div, BPS_DENOMINATOR};
use anystake_core::{Address, AnyStakeError, Amount};

/// Static properties of a registered token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSpec {
    pub symbol: String,
    pub decimals: u8,
    /// Fee charged on every transfer, in basis points.
    pub transfer_fee_bps: u32,
}

impl TokenSpec {
    pub fn new(symbol: &str, decimals: u8) -> Self {
        Self {
            symbol: symbol.to_string(),
            decimals,
            transfer_fee_bps: 0,
        }
    }

    pub fn with_transfer_fee(mut self, fee_bps: u32) -> Self {
        self.transfer_fee_bps = fee_bps;
        self
    }
}

/// Token registry plus per-account balances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryBank {
    tokens: BTreeMap<Address, TokenSpec>,
    balances: HashMap<(Address, Address), Amount>,
    supplies: BTreeMap<Address, Amount>,
    /// Per-account discount on transfer fees, in basis points (10_000 = exempt).
    fee_discounts: HashMap<Address, u32>,
    /// Where transfer fees go. Burned when unset.
    fee_destination: Option<Address>,
}

impl InMemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token. Re-registering overwrites its spec and keeps balances.
    pub fn register(&mut self, token: Address, spec: TokenSpec) {
        self.tokens.insert(token, spec);
    }

    pub fn spec(&self, token: Address) -> Result<&TokenSpec, AnyStakeError> {
        self.tokens
            .get(&token)
            .ok_or(AnyStakeError::UnknownToken(token))
    }

    pub fn is_registered(&self, token: Address) -> bool {
        self.tokens.contains_key(&token)
    }

    pub fn balance(&self, token: Address, account: Address) -> Amount {
        self.balances.get(&(token, account)).copied().unwrap_or(0)
    }

    pub fn total_supply(&self, token: Address) -> Amount {
        self.supplies.get(&token).copied().unwrap_or(0)
    }

    pub fn set_fee_discount(&mut self, account: Address, discount_bps: u32) {
        self.fee_discounts
            .insert(account, discount_bps.min(BPS_DENOMINATOR as u32));
    }

    pub fn fee_discount(&self, account: Address) -> u32 {
        self.fee_discounts.get(&account).copied().unwrap_or(0)
    }

    pub fn set_fee_destination(&mut self, destination: Address) {
        self.fee_destination = Some(destination);
    }

    pub fn fee_destination(&self) -> Option<Address> {
        self.fee_destination
    }

    /// Create `amount` of `token` in `to`.
    pub fn mint(&mut self, token: Address, to: Address, amount: Amount) -> Result<(), AnyStakeError> {
        self.spec(token)?;
        let supply = checked_add(self.total_supply(token), amount, "token supply")?;
        let balance = checked_add(self.balance(token, to), amount, "mint balance")?;
        self.supplies.insert(token, supply);
        self.balances.insert((token, to), balance);
        Ok(())
    }

    /// Destroy `amount` of `token` held by `from`.
    pub fn burn(&mut self, token: Address, from: Address, amount: Amount) -> Result<(), AnyStakeError> {
        let available = self.balance(token, from);
        if amount > available {
            return Err(AnyStakeError::InsufficientBalance {
                token,
                account: from,
                needed: amount,
                available,
            });
        }
        self.balances.insert((token, from), available - amount);
        let supply = checked_sub(self.total_supply(token), amount, "token supply")?;
        self.supplies.insert(token, supply);
        Ok(())
    }

    /// Fee that a transfer of `amount` from `from` to `to` would incur.
    pub fn transfer_fee(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<Amount, AnyStakeError> {
        let spec = self.spec(token)?;
        if spec.transfer_fee_bps == 0 {
            return Ok(0);
        }
        let gross_fee = apply_bps(amount, spec.transfer_fee_bps)?;
        let discount = self.fee_discount(from).max(self.fee_discount(to));
        let waived = mul_div(gross_fee, discount as Amount, BPS_DENOMINATOR, "fee discount")?;
        Ok(gross_fee - waived)
    }

    /// Move tokens, charging the token's transfer fee.
    pub fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), AnyStakeError> {
        let fee = self.transfer_fee(token, from, to, amount)?;
        let available = self.balance(token, from);
        if amount > available {
            return Err(AnyStakeError::InsufficientBalance {
                token,
                account: from,
                needed: amount,
                available,
            });
        }
        if amount == 0 || from == to {
            return Ok(());
        }

        let delivered = amount - fee;
        self.balances.insert((token, from), available - amount);
        let to_balance = checked_add(self.balance(token, to), delivered, "transfer balance")?;
        self.balances.insert((token, to), to_balance);

        if fee > 0 {
            match self.fee_destination {
                Some(dest) => {
                    let dest_balance = checked_add(self.balance(token, dest), fee, "fee balance")?;
                    self.balances.insert((token, dest), dest_balance);
                }
                None => {
                    let supply = checked_sub(self.total_supply(token), fee, "token supply")?;
                    self.supplies.insert(token, supply);
                }
            }
            tracing::debug!(%token, %from, %to, amount, fee, "transfer fee charged");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (InMemoryBank, Address, Address, Address) {
        let mut bank = InMemoryBank::new();
        let token = Address::from_label("FEE");
        bank.register(token, TokenSpec::new("FEE", 18).with_transfer_fee(100));
        let alice = Address::from_label("alice");
        let bob = Address::from_label("bob");
        bank.mint(token, alice, 10_000).unwrap();
        (bank, token, alice, bob)
    }

    #[test]
    fn test_fee_on_transfer_burns_without_destination() {
        let (mut bank, token, alice, bob) = setup();
        bank.transfer(token, alice, bob, 1_000).unwrap();
        assert_eq!(bank.balance(token, bob), 990);
        assert_eq!(bank.balance(token, alice), 9_000);
        assert_eq!(bank.total_supply(token), 9_990);
    }

    #[test]
    fn test_fee_goes_to_destination() {
        let (mut bank, token, alice, bob) = setup();
        let treasury = Address::from_label("treasury");
        bank.set_fee_destination(treasury);
        bank.transfer(token, alice, bob, 1_000).unwrap();
        assert_eq!(bank.balance(token, treasury), 10);
        assert_eq!(bank.total_supply(token), 10_000);
    }

    #[test]
    fn test_full_discount_exempts() {
        let (mut bank, token, alice, bob) = setup();
        bank.set_fee_discount(bob, 10_000);
        bank.transfer(token, alice, bob, 1_000).unwrap();
        assert_eq!(bank.balance(token, bob), 1_000);
    }

    #[test]
    fn test_insufficient_balance() {
        let (mut bank, token, alice, bob) = setup();
        let err = bank.transfer(token, bob, alice, 1).unwrap_err();
        assert!(matches!(err, AnyStakeError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_unknown_token() {
        let mut bank = InMemoryBank::new();
        let unknown = Address::from_label("nope");
        assert!(bank.mint(unknown, Address::from_label("a"), 1).is_err());
    }
}
