// crates/anystake-economics/src/emission.rs
//
// Linear "bonded" emission schedule.
//
// `addBondedRewards(amount, blocks)` vests `amount` evenly over `blocks`
// blocks: `per_block = amount / blocks` (integer division). The residual
// dust is never lost; it is released together with the final block.
//
// Vesting is computed lazily from the number of blocks elapsed since the
// previous settlement, so calling `vest(0)` any number of times releases
// nothing.

use serde::{Deserialize, Serialize};

use anystake_core::math::checked_add;
use anystake_core::{AnyStakeError, Amount, Block};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondedSchedule {
    /// Still-unvested amount.
    pub remaining: Amount,
    /// Amount released per elapsed block.
    pub per_block: Amount,
    /// Blocks left until the schedule is fully vested.
    pub blocks_remaining: Block,
}

impl BondedSchedule {
    /// Start a schedule vesting `amount` over `blocks` blocks.
    ///
    /// # Errors
    /// Returns `AnyStakeError::InvalidAmount` if `blocks` is zero.
    pub fn new(amount: Amount, blocks: Block) -> Result<Self, AnyStakeError> {
        if blocks == 0 {
            return Err(AnyStakeError::InvalidAmount(
                "bonded rewards need at least one block".to_string(),
            ));
        }
        Ok(Self {
            remaining: amount,
            per_block: amount / blocks as Amount,
            blocks_remaining: blocks,
        })
    }

    /// Restart the schedule with `extra` added on top of whatever is still
    /// unvested, spread over `blocks` blocks.
    pub fn extend(&self, extra: Amount, blocks: Block) -> Result<Self, AnyStakeError> {
        let total = checked_add(self.remaining, extra, "bonded rewards")?;
        Self::new(total, blocks)
    }

    pub fn is_active(&self) -> bool {
        self.blocks_remaining > 0 && self.remaining > 0
    }

    /// Amount that `elapsed` blocks would release, without mutating.
    pub fn vested_over(&self, elapsed: Block) -> Amount {
        if elapsed == 0 || self.blocks_remaining == 0 {
            return 0;
        }
        if elapsed >= self.blocks_remaining {
            // Final block drains the dust left by integer division.
            return self.remaining;
        }
        let linear = self.per_block.saturating_mul(elapsed as Amount);
        linear.min(self.remaining)
    }

    /// Release `elapsed` blocks of vesting and return the released amount.
    pub fn vest(&mut self, elapsed: Block) -> Amount {
        let released = self.vested_over(elapsed);
        self.remaining -= released;
        self.blocks_remaining = self.blocks_remaining.saturating_sub(elapsed);
        if self.blocks_remaining == 0 {
            self.per_block = 0;
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anystake_core::WAD;

    #[test]
    fn test_per_block_rate() {
        let schedule = BondedSchedule::new(1_000 * WAD, 1_000).unwrap();
        assert_eq!(schedule.per_block, WAD);
        assert_eq!(schedule.blocks_remaining, 1_000);
        assert_eq!(schedule.remaining, 1_000 * WAD);
    }

    #[test]
    fn test_zero_blocks_rejected() {
        assert!(BondedSchedule::new(100, 0).is_err());
    }

    #[test]
    fn test_zero_elapsed_vests_nothing() {
        let mut schedule = BondedSchedule::new(1_000, 1_000).unwrap();
        assert_eq!(schedule.vest(0), 0);
        assert_eq!(schedule.vest(0), 0);
        assert_eq!(schedule.remaining, 1_000);
    }

    #[test]
    fn test_linear_vesting() {
        let mut schedule = BondedSchedule::new(1_000, 100).unwrap();
        assert_eq!(schedule.vest(10), 100);
        assert_eq!(schedule.remaining, 900);
        assert_eq!(schedule.blocks_remaining, 90);
    }

    #[test]
    fn test_dust_drained_on_final_block() {
        // 1000 / 3 = 333 per block, 1 unit of dust.
        let mut schedule = BondedSchedule::new(1_000, 3).unwrap();
        assert_eq!(schedule.vest(1), 333);
        assert_eq!(schedule.vest(1), 333);
        assert_eq!(schedule.vest(1), 334);
        assert_eq!(schedule.remaining, 0);
        assert!(!schedule.is_active());
    }

    #[test]
    fn test_elapsed_beyond_schedule() {
        let mut schedule = BondedSchedule::new(1_000, 10).unwrap();
        assert_eq!(schedule.vest(50), 1_000);
        assert_eq!(schedule.vest(50), 0);
    }

    #[test]
    fn test_extend_folds_unvested_remainder() {
        let mut schedule = BondedSchedule::new(1_000, 10).unwrap();
        schedule.vest(5);
        let extended = schedule.extend(500, 10).unwrap();
        assert_eq!(extended.remaining, 1_000);
        assert_eq!(extended.per_block, 100);
    }
}
