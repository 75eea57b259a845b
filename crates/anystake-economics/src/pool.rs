// crates/anystake-economics/src/pool.rs
//
// Pool and per-user stake records.
//
// Reward accounting follows the usual per-share scheme:
//   pending = user.amount * pool.acc_reward_per_share / 1e18 - user.reward_debt
// and `reward_debt` is reset to `user.amount * acc_reward_per_share / 1e18`
// whenever the user's stake is touched.

use serde::{Deserialize, Serialize};

use anystake_core::math::{checked_sub, mul_div, normalize_to_wad};
use anystake_core::{Address, AnyStakeError, Amount, Block, WAD};

/// Parameters of a pool at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolParams {
    pub stake_token: Address,
    /// `Address::ZERO` for native protocol assets.
    pub price_ref_token: Address,
    pub alloc_weight: u64,
    pub vip_threshold: Amount,
    pub fee_bps: u32,
}

/// One weighted staking slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub stake_token: Address,
    pub price_ref_token: Address,
    pub alloc_weight: u64,
    /// WAD-normalized total stake at or above which the exit fee is waived.
    pub vip_threshold: Amount,
    /// Exit fee in basis points.
    pub fee_bps: u32,
    pub total_staked: Amount,
    /// WAD-scaled reward per staked unit since inception. Never decreases.
    pub acc_reward_per_share: Amount,
    pub last_settled_block: Block,
    /// Ledger-wide reward-per-weight accumulator as of this pool's last sync.
    pub acc_reward_per_weight_snapshot: Amount,
    /// Declared decimals of `stake_token`.
    pub decimals: u8,
}

impl Pool {
    pub fn new(params: PoolParams, decimals: u8, block: Block, acc_reward_per_weight: Amount) -> Self {
        Self {
            stake_token: params.stake_token,
            price_ref_token: params.price_ref_token,
            alloc_weight: params.alloc_weight,
            vip_threshold: params.vip_threshold,
            fee_bps: params.fee_bps,
            total_staked: 0,
            acc_reward_per_share: 0,
            last_settled_block: block,
            acc_reward_per_weight_snapshot: acc_reward_per_weight,
            decimals,
        }
    }

    /// Whether an exit leaving `remaining_total` staked is charged the fee.
    pub fn charges_exit_fee(&self, remaining_total: Amount) -> Result<bool, AnyStakeError> {
        if self.fee_bps == 0 {
            return Ok(false);
        }
        let normalized = normalize_to_wad(remaining_total, self.decimals)?;
        Ok(normalized < self.vip_threshold)
    }

    /// Reward owed to `stake` at the pool's current accumulator.
    pub fn pending_for(&self, stake: &UserStake) -> Result<Amount, AnyStakeError> {
        let accrued = mul_div(stake.amount, self.acc_reward_per_share, WAD, "accrued reward")?;
        checked_sub(accrued, stake.reward_debt, "pending reward")
    }

    /// Reward debt for a stake of `amount` at the current accumulator.
    pub fn reward_debt_for(&self, amount: Amount) -> Result<Amount, AnyStakeError> {
        mul_div(amount, self.acc_reward_per_share, WAD, "reward debt")
    }
}

/// A user's position in one pool. Zero-amount entries are valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStake {
    pub amount: Amount,
    pub reward_debt: Amount,
}
