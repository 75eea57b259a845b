// crates/anystake-economics/src/migration.rs
//
// Live migration from one ledger version to the next.
//
// Valid transitions:
//   Pending -> LedgerFrozen -> RegulatorFrozen -> BeneficiariesSwapped
//     -> RegulatorReactivated -> Completed
//
// Each step performs its component calls first and only then advances the
// phase, so a failed step leaves the coordinator where it was. User stakes
// in the outgoing ledger are never moved: users withdraw from it and
// deposit into the successor themselves. Reward the frozen ledger can no
// longer assign is handed back to the treasury that pays the successors.

use std::fmt;

use anystake_core::{
    Address, AnyStakeError, Block, CallContext, LoyaltyRegistry, RewardSource, TokenBank,
};

use crate::ledger::PoolRegistry;
use crate::regulator::PegRegulator;
use crate::treasury::Treasury;

/// Phases of a ledger migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    /// Nothing done yet.
    Pending,
    /// Every pool of the outgoing ledger settled, weight and VIP threshold zeroed.
    LedgerFrozen,
    /// Regulator settled and deactivated.
    RegulatorFrozen,
    /// Treasury now pays the successor ledger.
    BeneficiariesSwapped,
    /// Regulator active again against the current treasury.
    RegulatorReactivated,
    /// Successor ledger initialized.
    Completed,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationPhase::Pending => write!(f, "Pending"),
            MigrationPhase::LedgerFrozen => write!(f, "LedgerFrozen"),
            MigrationPhase::RegulatorFrozen => write!(f, "RegulatorFrozen"),
            MigrationPhase::BeneficiariesSwapped => write!(f, "BeneficiariesSwapped"),
            MigrationPhase::RegulatorReactivated => write!(f, "RegulatorReactivated"),
            MigrationPhase::Completed => write!(f, "Completed"),
        }
    }
}

/// Drives the manual migration sequence in order.
#[derive(Debug, Clone)]
pub struct MigrationCoordinator {
    phase: MigrationPhase,
    history: Vec<(MigrationPhase, Block)>,
}

impl MigrationCoordinator {
    pub fn new() -> Self {
        Self {
            phase: MigrationPhase::Pending,
            history: Vec::new(),
        }
    }

    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    /// Phases reached so far, with the block each was reached at.
    pub fn history(&self) -> &[(MigrationPhase, Block)] {
        &self.history
    }

    fn require_phase(&self, phase: MigrationPhase, step: &str) -> Result<(), AnyStakeError> {
        if self.phase != phase {
            return Err(AnyStakeError::InvalidState(format!(
                "cannot {} in migration phase {}",
                step, self.phase
            )));
        }
        Ok(())
    }

    /// Attempt to advance to `next`.
    pub fn transition(&mut self, next: MigrationPhase, block: Block) -> Result<(), AnyStakeError> {
        let valid = matches!(
            (self.phase, next),
            (MigrationPhase::Pending, MigrationPhase::LedgerFrozen)
                | (MigrationPhase::LedgerFrozen, MigrationPhase::RegulatorFrozen)
                | (MigrationPhase::RegulatorFrozen, MigrationPhase::BeneficiariesSwapped)
                | (MigrationPhase::BeneficiariesSwapped, MigrationPhase::RegulatorReactivated)
                | (MigrationPhase::RegulatorReactivated, MigrationPhase::Completed)
        );
        if !valid {
            return Err(AnyStakeError::InvalidState(format!(
                "invalid migration transition: {} -> {}",
                self.phase, next
            )));
        }
        tracing::info!(block, "Migration transition: {} -> {}", self.phase, next);
        self.phase = next;
        self.history.push((next, block));
        Ok(())
    }

    /// Step 1: settle every pool of the outgoing ledger, then zero each
    /// pool's weight and VIP threshold. Stakes are untouched.
    pub fn freeze_ledger<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
        ledger: &mut PoolRegistry,
    ) -> Result<(), AnyStakeError> {
        self.require_phase(MigrationPhase::Pending, "freeze the ledger")?;
        ledger.mass_update_pools(ctx, bank, treasury)?;
        for pid in 0..ledger.pool_length() {
            ledger.set_pool_alloc_points(ctx, bank, treasury, pid, 0)?;
            ledger.set_pool_vip_amount(ctx, bank, treasury, pid, 0)?;
        }
        self.transition(MigrationPhase::LedgerFrozen, ctx.block)
    }

    /// Step 2: settle and deactivate the regulator.
    pub fn freeze_regulator<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
        regulator: &mut PegRegulator,
    ) -> Result<(), AnyStakeError> {
        self.require_phase(MigrationPhase::LedgerFrozen, "freeze the regulator")?;
        regulator.update_pool(ctx, bank, treasury)?;
        regulator.set_active(ctx, false)?;
        self.transition(MigrationPhase::RegulatorFrozen, ctx.block)
    }

    /// Step 3: point the treasury's beneficiaries at the successors, then
    /// release whatever the frozen `outgoing` ledger was still credited.
    pub fn swap_beneficiaries(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut Treasury,
        outgoing: &mut PoolRegistry,
        ledger: Address,
        regulator: Address,
    ) -> Result<(), AnyStakeError> {
        self.require_phase(MigrationPhase::RegulatorFrozen, "swap beneficiaries")?;
        treasury.set_ledger(ctx, ledger)?;
        treasury.set_regulator(ctx, regulator)?;
        outgoing.release_unassigned(ctx, bank, treasury)?;
        self.transition(MigrationPhase::BeneficiariesSwapped, ctx.block)
    }

    /// Step 3, alternative: replace the treasury itself with a successor
    /// already constructed for the new beneficiaries. The outgoing
    /// treasury settles one last time and hands over its balance and
    /// bonded schedule. The final settlement's shares for the frozen
    /// ledger and regulator are collected from it, so nothing stays
    /// credited on an inert treasury.
    pub fn migrate_treasury(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        current: &mut Treasury,
        successor: &mut Treasury,
        outgoing: &mut PoolRegistry,
        regulator: &mut PegRegulator,
    ) -> Result<(), AnyStakeError> {
        self.require_phase(MigrationPhase::RegulatorFrozen, "migrate the treasury")?;
        current.set_migrator(ctx, successor.address())?;
        current.migrate(ctx, bank, successor)?;
        outgoing.release_unassigned(ctx, bank, current)?;
        regulator.sweep(ctx, bank, current)?;
        self.transition(MigrationPhase::BeneficiariesSwapped, ctx.block)
    }

    /// Step 4: re-point the regulator at `treasury` and reactivate it.
    pub fn reactivate_regulator(
        &mut self,
        ctx: &CallContext,
        regulator: &mut PegRegulator,
        treasury: Address,
    ) -> Result<(), AnyStakeError> {
        self.require_phase(MigrationPhase::BeneficiariesSwapped, "reactivate the regulator")?;
        if regulator.treasury() != Some(treasury) {
            regulator.set_treasury(ctx, treasury)?;
        }
        regulator.set_active(ctx, true)?;
        self.transition(MigrationPhase::RegulatorReactivated, ctx.block)
    }

    /// Step 5: initialize the successor ledger against `treasury`.
    pub fn initialize_successor<L: LoyaltyRegistry + ?Sized>(
        &mut self,
        ctx: &CallContext,
        loyalty: &mut L,
        ledger: &mut PoolRegistry,
        treasury: Address,
    ) -> Result<(), AnyStakeError> {
        self.require_phase(MigrationPhase::RegulatorReactivated, "initialize the successor ledger")?;
        ledger.initialize(ctx, loyalty, treasury)?;
        self.transition(MigrationPhase::Completed, ctx.block)
    }
}

impl Default for MigrationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anystake_core::{Amount, Credit, WAD};
    use anystake_market::{InMemoryMarket, TokenSpec};

    struct Deployment {
        market: InMemoryMarket,
        treasury: Treasury,
        ledger: PoolRegistry,
        successor: PoolRegistry,
        regulator: PegRegulator,
        owner: Address,
        alice: Address,
        reward: Address,
        lp: Address,
        points: Address,
    }

    fn deployment() -> Deployment {
        let owner = Address::from_label("mastermind");
        let alice = Address::from_label("alpha");
        let reward = Address::from_label("DFT");
        let lp = Address::from_label("DFT-LP");
        let points = Address::from_label("DFTP");
        let points_lp = Address::from_label("DFTP-LP");
        let ledger_address = Address::from_label("anystake");
        let regulator_address = Address::from_label("regulator");

        let mut market = InMemoryMarket::new(Address::from_label("WETH"));
        market.register_token(reward, TokenSpec::new("DFT", 18));
        market.register_token(lp, TokenSpec::new("DFT-LP", 18));
        market.register_token(points, TokenSpec::new("DFTP", 18));
        market.set_points_token(points);
        market.mint(reward, owner, 10_000 * WAD).unwrap();
        market.mint(lp, alice, 100 * WAD).unwrap();

        let ctx = CallContext::new(owner, 0);
        let treasury = Treasury::new(
            Address::from_label("vault"),
            owner,
            reward,
            ledger_address,
            regulator_address,
            0,
        );
        let mut ledger = PoolRegistry::new(ledger_address, owner, reward);
        ledger
            .add_pool_batch(&ctx, &market, &[lp], &[Address::ZERO], &[500], &[WAD], &[0])
            .unwrap();
        ledger.initialize(&ctx, &mut market, treasury.address()).unwrap();

        let mut successor = PoolRegistry::new(Address::from_label("anystake-v2"), owner, reward);
        successor
            .add_pool_batch(&ctx, &market, &[lp], &[Address::ZERO], &[500], &[WAD], &[0])
            .unwrap();

        let mut regulator = PegRegulator::new(regulator_address, owner, reward, points, points_lp);
        regulator.initialize(&ctx, &mut market, treasury.address()).unwrap();

        Deployment {
            market,
            treasury,
            ledger,
            successor,
            regulator,
            owner,
            alice,
            reward,
            lp,
            points,
        }
    }

    fn at(caller: Address, block: Block) -> CallContext {
        CallContext::new(caller, block)
    }

    #[test]
    fn test_out_of_order_step_rejected() {
        let mut d = deployment();
        let mut coordinator = MigrationCoordinator::new();
        let err = coordinator
            .freeze_regulator(&at(d.owner, 1), &mut d.market, &mut d.treasury, &mut d.regulator)
            .unwrap_err();
        assert!(matches!(err, AnyStakeError::InvalidState(_)));
        assert_eq!(coordinator.phase(), MigrationPhase::Pending);
        assert!(d.regulator.is_active());
    }

    #[test]
    fn test_transition_table() {
        let mut coordinator = MigrationCoordinator::new();
        assert!(coordinator.transition(MigrationPhase::Completed, 0).is_err());
        coordinator.transition(MigrationPhase::LedgerFrozen, 1).unwrap();
        assert!(coordinator.transition(MigrationPhase::LedgerFrozen, 1).is_err());
        assert_eq!(coordinator.history(), &[(MigrationPhase::LedgerFrozen, 1)]);
        assert_eq!(MigrationPhase::RegulatorFrozen.to_string(), "RegulatorFrozen");
    }

    #[test]
    fn test_full_migration() {
        let mut d = deployment();
        let stake: Amount = 10 * WAD;
        d.treasury
            .add_bonded_rewards(&at(d.owner, 0), &mut d.market, 1_000 * WAD, 1_000)
            .unwrap();
        d.ledger
            .deposit(&at(d.alice, 1), &mut d.market, &mut d.treasury, 0, stake)
            .unwrap();

        let mut coordinator = MigrationCoordinator::new();
        let ctx = at(d.owner, 11);
        coordinator
            .freeze_ledger(&ctx, &mut d.market, &mut d.treasury, &mut d.ledger)
            .unwrap();
        assert_eq!(d.ledger.total_eligible_pools(), 0);
        assert_eq!(d.ledger.total_alloc_weight(), 0);
        assert_eq!(d.ledger.user_info(0, d.alice).amount, stake);

        coordinator
            .freeze_regulator(&ctx, &mut d.market, &mut d.treasury, &mut d.regulator)
            .unwrap();
        assert!(!d.regulator.is_active());

        let successor_address = d.successor.address();
        let regulator_address = d.regulator.address();
        coordinator
            .swap_beneficiaries(
                &ctx,
                &mut d.market,
                &mut d.treasury,
                &mut d.ledger,
                successor_address,
                regulator_address,
            )
            .unwrap();
        coordinator
            .reactivate_regulator(&ctx, &mut d.regulator, d.treasury.address())
            .unwrap();
        coordinator
            .initialize_successor(&ctx, &mut d.market, &mut d.successor, d.treasury.address())
            .unwrap();
        assert_eq!(coordinator.phase(), MigrationPhase::Completed);
        assert_eq!(coordinator.history().len(), 5);

        // The old ledger still settles without error but earns nothing new.
        let pending_before = d.ledger.pending(0, d.alice).unwrap();
        let points_before = d.market.balance_of(d.points, d.alice);
        d.ledger
            .withdraw(&at(d.alice, 21), &mut d.market, &mut d.treasury, 0, stake)
            .unwrap();
        assert_eq!(d.market.balance_of(d.reward, d.alice), pending_before);
        assert_eq!(d.market.balance_of(d.lp, d.alice), 100 * WAD);
        assert_eq!(d.ledger.carry(), 0);
        assert_eq!(d.market.balance_of(d.reward, d.ledger.address()), 0);

        // Redeposit into the successor: it earns from now on and mints the
        // stipend again.
        d.successor
            .deposit(&at(d.alice, 21), &mut d.market, &mut d.treasury, 0, stake)
            .unwrap();
        assert_eq!(d.market.balance_of(d.points, d.alice), points_before + WAD);
        d.successor
            .claim(&at(d.alice, 31), &mut d.market, &mut d.treasury, 0)
            .unwrap();
        assert!(d.market.balance_of(d.reward, d.alice) > pending_before);
    }

    #[test]
    fn test_migration_through_successor_treasury() {
        let mut d = deployment();
        d.treasury
            .add_bonded_rewards(&at(d.owner, 0), &mut d.market, 1_000 * WAD, 1_000)
            .unwrap();
        let mut next = Treasury::new(
            Address::from_label("vault-v2"),
            d.owner,
            d.reward,
            d.successor.address(),
            d.regulator.address(),
            0,
        );

        let mut coordinator = MigrationCoordinator::new();
        let ctx = at(d.owner, 100);
        coordinator
            .freeze_ledger(&ctx, &mut d.market, &mut d.treasury, &mut d.ledger)
            .unwrap();
        coordinator
            .freeze_regulator(&ctx, &mut d.market, &mut d.treasury, &mut d.regulator)
            .unwrap();
        coordinator
            .migrate_treasury(
                &ctx,
                &mut d.market,
                &mut d.treasury,
                &mut next,
                &mut d.ledger,
                &mut d.regulator,
            )
            .unwrap();
        coordinator
            .reactivate_regulator(&ctx, &mut d.regulator, next.address())
            .unwrap();
        coordinator
            .initialize_successor(&ctx, &mut d.market, &mut d.successor, next.address())
            .unwrap();

        assert!(d.treasury.is_migrated());
        assert_eq!(d.regulator.treasury(), Some(next.address()));
        assert_eq!(next.bonded_rewards_remaining(100), 900 * WAD);
        assert_eq!(d.successor.treasury(), Some(next.address()));

        // Nothing stays behind on the frozen ledger or the inert treasury:
        // every reward unit is with the successor or earmarked for buybacks.
        assert_eq!(d.market.balance_of(d.reward, d.ledger.address()), 0);
        assert_eq!(d.market.balance_of(d.reward, d.treasury.address()), 0);
        assert_eq!(d.treasury.outstanding_credit(d.regulator.address()), Credit::default());
        assert_eq!(
            d.market.balance_of(d.reward, d.regulator.address()),
            d.regulator.buyback_balance()
        );
        assert_eq!(
            d.market.balance_of(d.reward, next.address()) + d.regulator.buyback_balance(),
            1_000 * WAD
        );
    }
}
