// crates/anystake-core/src/traits.rs
//
// Interfaces of the external collaborators and of the treasury seam.
//
// The staking ledgers never reach a global singleton: every collaborator is
// passed in explicitly per call. `anystake-market` provides in-memory
// implementations used by tests and the simulator.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::context::{Block, CallContext};
use crate::error::AnyStakeError;
use crate::math::Amount;

/// Token balances held per account.
///
/// Transfers may deliver less than the nominal amount (fee-on-transfer
/// tokens). Callers that need the delivered amount measure balance deltas.
pub trait TokenBank {
    /// Balance of `token` held by `account`. Unknown tokens read as zero.
    fn balance_of(&self, token: Address, account: Address) -> Amount;

    /// Declared decimals of `token`.
    fn decimals(&self, token: Address) -> Result<u8, AnyStakeError>;

    /// Move `amount` of `token` from `from` to `to`.
    fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), AnyStakeError>;

    /// What a transfer of `amount` from `from` to `to` would deliver.
    /// Tokens without a transfer fee deliver the full amount.
    fn quote_transfer(
        &self,
        _token: Address,
        _from: Address,
        _to: Address,
        amount: Amount,
    ) -> Result<Amount, AnyStakeError> {
        Ok(amount)
    }
}

/// Spot price source.
pub trait PriceOracle {
    /// WAD-scaled price of one whole `base` unit, quoted in the other token
    /// of `reference_pair`, normalized by both tokens' decimals.
    fn price(&self, base: Address, reference_pair: Address) -> Result<Amount, AnyStakeError>;
}

/// Swap / liquidity venue (an AMM router).
pub trait SwapVenue {
    /// Swap `amount_in` of `token_in` held by `from` into `token_out`,
    /// delivering the output to `recipient`. Returns the amount delivered.
    #[allow(clippy::too_many_arguments)]
    fn swap_exact_in(
        &mut self,
        token_in: Address,
        amount_in: Amount,
        token_out: Address,
        from: Address,
        recipient: Address,
        deadline: Block,
    ) -> Result<Amount, AnyStakeError>;

    /// Output `swap_exact_in` would deliver at current reserves, without
    /// moving anything. Fails exactly when no route exists.
    fn quote_exact_in(
        &self,
        token_in: Address,
        amount_in: Amount,
        token_out: Address,
    ) -> Result<Amount, AnyStakeError>;

    /// Add `token_amount` of `token` and `native_amount` of the venue's
    /// native token as liquidity. Returns LP tokens minted to `recipient`.
    #[allow(clippy::too_many_arguments)]
    fn add_liquidity(
        &mut self,
        token: Address,
        token_amount: Amount,
        native_amount: Amount,
        from: Address,
        recipient: Address,
        deadline: Block,
    ) -> Result<Amount, AnyStakeError>;
}

/// Loyalty-points registry.
pub trait LoyaltyRegistry {
    /// Mint a fixed stipend of points to `user`.
    fn mint_stipend(&mut self, user: Address, amount: Amount) -> Result<(), AnyStakeError>;

    /// Whitelist `account` for a protocol-level transfer fee discount
    /// (`discount_bps` of 10_000 means no fee at all).
    fn override_fee_exemption(
        &mut self,
        account: Address,
        discount_bps: u32,
    ) -> Result<(), AnyStakeError>;

    /// Burn up to `amount` points out of the reserves of `pair` and resync
    /// it. Returns what was burned.
    fn burn_from_pair(&mut self, pair: Address, amount: Amount) -> Result<Amount, AnyStakeError>;
}

/// Governance wiring. Performed once at deployment.
pub trait GovernanceRegistry {
    fn set_actor_level(&mut self, account: Address, level: u8) -> Result<(), AnyStakeError>;
    fn set_fee_destination(&mut self, account: Address) -> Result<(), AnyStakeError>;
}

/// Everything a staking ledger touches outside its own state.
pub trait Environment: TokenBank + PriceOracle + SwapVenue + LoyaltyRegistry {}

impl<T: TokenBank + PriceOracle + SwapVenue + LoyaltyRegistry> Environment for T {}

/// Amounts paid to a beneficiary since it last pulled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    /// Claimable yield.
    pub rewards: Amount,
    /// Earmarked for peg defense (regulator only).
    pub buyback: Amount,
}

impl Credit {
    pub fn is_empty(&self) -> bool {
        self.rewards == 0 && self.buyback == 0
    }
}

/// The treasury as seen by its consumers.
///
/// `pull_rewards` brings the treasury up to `ctx.block`, pays out whatever
/// has vested or arrived since the last settlement, and returns what
/// `beneficiary` has received since it last pulled. The tokens have already
/// moved when this returns.
pub trait RewardSource {
    fn address(&self) -> Address;

    /// Where consumers send back rewards they cannot assign. The tokens
    /// count as ad-hoc revenue at the next settlement.
    fn revenue_address(&self) -> Address {
        self.address()
    }

    fn pull_rewards(
        &mut self,
        ctx: &CallContext,
        beneficiary: Address,
        bank: &mut dyn TokenBank,
    ) -> Result<Credit, AnyStakeError>;
}
