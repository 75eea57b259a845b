// crates/anystake-economics/src/treasury.rs
//
// Protocol treasury ("vault") for the AnyStake economy.
//
// The treasury is the single holder of the reward token. It receives:
//   - ad-hoc revenue (plain transfers: exit fees swapped into the reward
//     token, transfer fees routed here by governance),
//   - bonded emission, vested linearly over a fixed number of blocks.
//
// It has no scheduler. Settlement is driven lazily by its two consumers,
// the pool ledger and the peg regulator, whenever they settle a pool.
// Each settlement pays out everything vested or received since the last
// one, split per `rewards::split_revenue`. At every block:
//
//   balance(reward_token) == bonded_rewards_remaining(block) + pending_rewards(block)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use anystake_core::math::{checked_add, checked_sub};
use anystake_core::{
    Address, AnyStakeError, Amount, Block, CallContext, Credit, RewardSource, TokenBank,
};

use crate::emission::BondedSchedule;
use crate::rewards::{
    check_rate, split_revenue, RevenueSplit, DEFAULT_BUYBACK_RATE, DEFAULT_DISTRIBUTION_RATE,
};

/// The protocol treasury.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Treasury {
    address: Address,
    owner: Address,
    reward_token: Address,
    schedule: BondedSchedule,
    last_settled_block: Block,
    /// Ledger share of each settlement, per mille.
    distribution_rate: u32,
    /// Buyback earmark of the regulator share, per mille.
    buyback_rate: u32,
    ledger: Address,
    regulator: Address,
    migrator: Option<Address>,
    migrated: bool,
    /// Paid out but not yet acknowledged by the beneficiary.
    credited: BTreeMap<Address, Credit>,
    total_distributed: Amount,
}

impl Treasury {
    /// Create a treasury with the default 700/1000 distribution rate and
    /// 300/1000 buyback rate.
    pub fn new(
        address: Address,
        owner: Address,
        reward_token: Address,
        ledger: Address,
        regulator: Address,
        start_block: Block,
    ) -> Self {
        Self {
            address,
            owner,
            reward_token,
            schedule: BondedSchedule::default(),
            last_settled_block: start_block,
            distribution_rate: DEFAULT_DISTRIBUTION_RATE,
            buyback_rate: DEFAULT_BUYBACK_RATE,
            ledger,
            regulator,
            migrator: None,
            migrated: false,
            credited: BTreeMap::new(),
            total_distributed: 0,
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn reward_token(&self) -> Address {
        self.reward_token
    }

    pub fn ledger(&self) -> Address {
        self.ledger
    }

    pub fn regulator(&self) -> Address {
        self.regulator
    }

    pub fn distribution_rate(&self) -> u32 {
        self.distribution_rate
    }

    pub fn buyback_rate(&self) -> u32 {
        self.buyback_rate
    }

    pub fn schedule(&self) -> &BondedSchedule {
        &self.schedule
    }

    pub fn last_settled_block(&self) -> Block {
        self.last_settled_block
    }

    pub fn total_distributed(&self) -> Amount {
        self.total_distributed
    }

    pub fn is_migrated(&self) -> bool {
        self.migrated
    }

    /// Credit paid to `beneficiary` that it has not pulled yet.
    pub fn outstanding_credit(&self, beneficiary: Address) -> Credit {
        self.credited.get(&beneficiary).copied().unwrap_or_default()
    }

    fn only_owner(&self, ctx: &CallContext, action: &str) -> Result<(), AnyStakeError> {
        if ctx.caller != self.owner {
            return Err(AnyStakeError::unauthorized(ctx.caller, action));
        }
        Ok(())
    }

    fn elapsed(&self, block: Block) -> Block {
        block.saturating_sub(self.last_settled_block)
    }

    /// Bonded rewards still unvested as of `block`.
    pub fn bonded_rewards_remaining(&self, block: Block) -> Amount {
        self.schedule.remaining - self.schedule.vested_over(self.elapsed(block))
    }

    /// Vested-but-unpulled revenue as of `block`: exactly what the next
    /// settlement would pay out if no further revenue arrives.
    pub fn pending_rewards(&self, block: Block, bank: &dyn TokenBank) -> Amount {
        if self.migrated {
            return 0;
        }
        bank.balance_of(self.reward_token, self.address)
            .saturating_sub(self.bonded_rewards_remaining(block))
    }

    /// Vest `amount` of the reward token, pulled from the caller, linearly
    /// over `blocks` blocks. Any still-unvested remainder of an active
    /// schedule is folded into the new one.
    ///
    /// # Errors
    /// - `Unauthorized` if the caller is not the owner.
    /// - `InvalidAmount` if `amount` or `blocks` is zero, or nothing arrived.
    pub fn add_bonded_rewards(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        amount: Amount,
        blocks: Block,
    ) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "add bonded rewards")?;
        if amount == 0 {
            return Err(AnyStakeError::InvalidAmount(
                "bonded amount must be positive".to_string(),
            ));
        }
        if blocks == 0 {
            return Err(AnyStakeError::InvalidAmount(
                "bonded rewards need at least one block".to_string(),
            ));
        }
        if self.migrated {
            return Err(AnyStakeError::InvalidState(
                "treasury has been migrated".to_string(),
            ));
        }

        // Pay out what vested under the old schedule before replacing it.
        self.settle(ctx, bank)?;

        let before = bank.balance_of(self.reward_token, self.address);
        bank.transfer(self.reward_token, ctx.caller, self.address, amount)?;
        let received = checked_sub(
            bank.balance_of(self.reward_token, self.address),
            before,
            "bonded deposit",
        )?;
        if received == 0 {
            return Err(AnyStakeError::InvalidAmount(
                "no bonded rewards received".to_string(),
            ));
        }

        self.schedule = self.schedule.extend(received, blocks)?;
        tracing::info!(
            received,
            blocks,
            per_block = self.schedule.per_block,
            remaining = self.schedule.remaining,
            "bonded rewards added"
        );
        Ok(())
    }

    /// Bring the treasury up to `ctx.block` and pay out everything vested or
    /// received since the last settlement.
    ///
    /// Repeated calls within one block vest nothing further; revenue that
    /// arrived in the meantime is still paid out.
    pub fn settle(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
    ) -> Result<RevenueSplit, AnyStakeError> {
        if self.migrated {
            return Ok(RevenueSplit::default());
        }

        let elapsed = self.elapsed(ctx.block);
        let vested = self.schedule.vest(elapsed);
        if ctx.block > self.last_settled_block {
            self.last_settled_block = ctx.block;
        }

        let balance = bank.balance_of(self.reward_token, self.address);
        let revenue = checked_sub(balance, self.schedule.remaining, "treasury revenue")?;
        if revenue == 0 {
            return Ok(RevenueSplit::default());
        }

        let split = split_revenue(revenue, self.distribution_rate, self.buyback_rate)?;

        let ledger_received = self.pay(bank, self.ledger, split.ledger_share)?;
        let regulator_received = self.pay(bank, self.regulator, split.regulator_share)?;
        let buyback = split.buyback_share.min(regulator_received);

        self.credit(self.ledger, ledger_received, 0)?;
        self.credit(self.regulator, regulator_received - buyback, buyback)?;
        self.total_distributed = checked_add(self.total_distributed, revenue, "total distributed")?;

        tracing::debug!(
            block = ctx.block,
            vested,
            revenue,
            ledger = split.ledger_share,
            regulator = split.regulator_share,
            buyback = split.buyback_share,
            "treasury settled"
        );
        Ok(split)
    }

    /// Transfer to `to` and return what actually arrived.
    fn pay(&self, bank: &mut dyn TokenBank, to: Address, amount: Amount) -> Result<Amount, AnyStakeError> {
        if amount == 0 {
            return Ok(0);
        }
        let before = bank.balance_of(self.reward_token, to);
        bank.transfer(self.reward_token, self.address, to, amount)?;
        checked_sub(bank.balance_of(self.reward_token, to), before, "treasury payout")
    }

    fn credit(&mut self, to: Address, rewards: Amount, buyback: Amount) -> Result<(), AnyStakeError> {
        let entry = self.credited.entry(to).or_default();
        entry.rewards = checked_add(entry.rewards, rewards, "credited rewards")?;
        entry.buyback = checked_add(entry.buyback, buyback, "credited buyback")?;
        Ok(())
    }

    pub fn set_distribution_rate(&mut self, ctx: &CallContext, rate: u32) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "set distribution rate")?;
        check_rate(rate, "distribution rate")?;
        tracing::info!(old = self.distribution_rate, new = rate, "distribution rate updated");
        self.distribution_rate = rate;
        Ok(())
    }

    pub fn set_buyback_rate(&mut self, ctx: &CallContext, rate: u32) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "set buyback rate")?;
        check_rate(rate, "buyback rate")?;
        tracing::info!(old = self.buyback_rate, new = rate, "buyback rate updated");
        self.buyback_rate = rate;
        Ok(())
    }

    /// Point the ledger share at a new ledger.
    pub fn set_ledger(&mut self, ctx: &CallContext, ledger: Address) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "set ledger beneficiary")?;
        tracing::info!(old = %self.ledger, new = %ledger, "ledger beneficiary updated");
        self.ledger = ledger;
        Ok(())
    }

    /// Point the regulator share at a new regulator.
    pub fn set_regulator(&mut self, ctx: &CallContext, regulator: Address) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "set regulator beneficiary")?;
        tracing::info!(old = %self.regulator, new = %regulator, "regulator beneficiary updated");
        self.regulator = regulator;
        Ok(())
    }

    /// Authorize `next` as the successor treasury.
    pub fn set_migrator(&mut self, ctx: &CallContext, next: Address) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "set migrator")?;
        self.migrator = Some(next);
        Ok(())
    }

    /// Hand the whole balance and the unvested schedule to `next`.
    ///
    /// Runs a final settlement first so that everything already vested goes
    /// to the current beneficiaries. Afterwards this treasury is inert.
    ///
    /// # Errors
    /// - `Unauthorized` if the caller is not the owner.
    /// - `InvalidState` if `next` is not the authorized migrator, this
    ///   treasury was already migrated, or `next` has an active schedule.
    pub fn migrate(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        next: &mut Treasury,
    ) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "migrate treasury")?;
        if self.migrated {
            return Err(AnyStakeError::InvalidState(
                "treasury already migrated".to_string(),
            ));
        }
        if self.migrator != Some(next.address) {
            return Err(AnyStakeError::InvalidState(format!(
                "{} is not the authorized migrator",
                next.address
            )));
        }
        if next.reward_token != self.reward_token {
            return Err(AnyStakeError::InvalidState(
                "successor treasury uses a different reward token".to_string(),
            ));
        }
        if next.schedule.is_active() {
            return Err(AnyStakeError::InvalidState(
                "successor treasury already has bonded rewards".to_string(),
            ));
        }

        self.settle(ctx, bank)?;
        next.settle(ctx, bank)?;

        let balance = bank.balance_of(self.reward_token, self.address);
        let before = bank.balance_of(self.reward_token, next.address);
        bank.transfer(self.reward_token, self.address, next.address, balance)?;
        let received = checked_sub(
            bank.balance_of(self.reward_token, next.address),
            before,
            "treasury migration",
        )?;

        let mut schedule = self.schedule.clone();
        schedule.remaining = schedule.remaining.min(received);
        next.schedule = schedule;
        next.last_settled_block = ctx.block;

        self.schedule = BondedSchedule::default();
        self.migrated = true;
        tracing::info!(from = %self.address, to = %next.address, balance, "treasury migrated");
        Ok(())
    }
}

impl RewardSource for Treasury {
    fn address(&self) -> Address {
        self.address
    }

    /// A migrated treasury is inert, so returns go straight to its successor.
    fn revenue_address(&self) -> Address {
        match self.migrator {
            Some(next) if self.migrated => next,
            _ => self.address,
        }
    }

    /// Settles when called by a current beneficiary. A former beneficiary
    /// (after a migration swap) only collects credit it was already paid.
    fn pull_rewards(
        &mut self,
        ctx: &CallContext,
        beneficiary: Address,
        bank: &mut dyn TokenBank,
    ) -> Result<Credit, AnyStakeError> {
        if beneficiary == self.ledger || beneficiary == self.regulator {
            self.settle(ctx, bank)?;
        }
        Ok(self.credited.remove(&beneficiary).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anystake_core::WAD;
    use anystake_market::{InMemoryMarket, TokenSpec};

    struct Fixture {
        market: InMemoryMarket,
        treasury: Treasury,
        owner: Address,
        token: Address,
        ledger: Address,
        regulator: Address,
    }

    fn fixture() -> Fixture {
        let token = Address::from_label("DFT");
        let owner = Address::from_label("mastermind");
        let ledger = Address::from_label("anystake");
        let regulator = Address::from_label("regulator");
        let vault = Address::from_label("vault");

        let mut market = InMemoryMarket::new(Address::from_label("WETH"));
        market.register_token(token, TokenSpec::new("DFT", 18));
        market.mint(token, owner, 10_000 * WAD).unwrap();

        Fixture {
            market,
            treasury: Treasury::new(vault, owner, token, ledger, regulator, 0),
            owner,
            token,
            ledger,
            regulator,
        }
    }

    fn at(caller: Address, block: Block) -> CallContext {
        CallContext::new(caller, block)
    }

    #[test]
    fn test_new_treasury_defaults() {
        let f = fixture();
        assert_eq!(f.treasury.distribution_rate(), 700);
        assert_eq!(f.treasury.buyback_rate(), 300);
        assert_eq!(f.treasury.pending_rewards(0, &f.market), 0);
    }

    #[test]
    fn test_bond_rewards() {
        let mut f = fixture();
        f.treasury
            .add_bonded_rewards(&at(f.owner, 0), &mut f.market, 1_000 * WAD, 1_000)
            .unwrap();
        let schedule = f.treasury.schedule();
        assert_eq!(schedule.remaining, 1_000 * WAD);
        assert_eq!(schedule.per_block, WAD);
        assert_eq!(schedule.blocks_remaining, 1_000);
        assert_eq!(f.treasury.pending_rewards(0, &f.market), 0);
    }

    #[test]
    fn test_bond_rewards_owner_only() {
        let mut f = fixture();
        let err = f
            .treasury
            .add_bonded_rewards(&at(f.ledger, 0), &mut f.market, 1, 1)
            .unwrap_err();
        assert!(matches!(err, AnyStakeError::Unauthorized { .. }));
    }

    #[test]
    fn test_bond_rewards_zero_blocks() {
        let mut f = fixture();
        let err = f
            .treasury
            .add_bonded_rewards(&at(f.owner, 0), &mut f.market, 1, 0)
            .unwrap_err();
        assert!(matches!(err, AnyStakeError::InvalidAmount(_)));
    }

    #[test]
    fn test_pending_grows_with_blocks() {
        let mut f = fixture();
        f.treasury
            .add_bonded_rewards(&at(f.owner, 0), &mut f.market, 1_000 * WAD, 1_000)
            .unwrap();
        assert_eq!(f.treasury.pending_rewards(10, &f.market), 10 * WAD);
        assert_eq!(f.treasury.bonded_rewards_remaining(10), 990 * WAD);
    }

    #[test]
    fn test_settle_splits_revenue() {
        let mut f = fixture();
        f.market
            .transfer(f.token, f.owner, f.treasury.address(), 1_000)
            .unwrap();

        let split = f.treasury.settle(&at(f.ledger, 1), &mut f.market).unwrap();

        assert_eq!(split.ledger_share, 700);
        assert_eq!(split.regulator_share, 300);
        assert_eq!(split.buyback_share, 90);
        assert_eq!(f.market.balance_of(f.token, f.ledger), 700);
        assert_eq!(f.market.balance_of(f.token, f.regulator), 300);
        assert_eq!(f.treasury.outstanding_credit(f.regulator).buyback, 90);
        assert_eq!(f.treasury.outstanding_credit(f.regulator).rewards, 210);
    }

    #[test]
    fn test_settle_same_block_is_idempotent() {
        let mut f = fixture();
        f.treasury
            .add_bonded_rewards(&at(f.owner, 0), &mut f.market, 1_000 * WAD, 1_000)
            .unwrap();
        let first = f.treasury.settle(&at(f.ledger, 5), &mut f.market).unwrap();
        let second = f.treasury.settle(&at(f.regulator, 5), &mut f.market).unwrap();
        assert_eq!(first.total, 5 * WAD);
        assert_eq!(second.total, 0);
    }

    #[test]
    fn test_balance_invariant_across_settlements() {
        let mut f = fixture();
        f.treasury
            .add_bonded_rewards(&at(f.owner, 0), &mut f.market, 1_000 * WAD, 1_000)
            .unwrap();
        f.market
            .transfer(f.token, f.owner, f.treasury.address(), 100 * WAD)
            .unwrap();

        for block in [3u64, 3, 17, 250, 999, 1_000, 1_500] {
            let balance = f.market.balance_of(f.token, f.treasury.address());
            assert_eq!(
                balance,
                f.treasury.bonded_rewards_remaining(block) + f.treasury.pending_rewards(block, &f.market)
            );
            f.treasury.settle(&at(f.ledger, block), &mut f.market).unwrap();
            let balance = f.market.balance_of(f.token, f.treasury.address());
            assert_eq!(balance, f.treasury.bonded_rewards_remaining(block));
        }
        // Fully vested and distributed.
        assert_eq!(f.market.balance_of(f.token, f.treasury.address()), 0);
        assert_eq!(f.treasury.total_distributed(), 1_100 * WAD);
    }

    #[test]
    fn test_pull_rewards_returns_credit_once() {
        let mut f = fixture();
        f.market
            .transfer(f.token, f.owner, f.treasury.address(), 1_000)
            .unwrap();

        let ctx = at(f.ledger, 1);
        let credit = f.treasury.pull_rewards(&ctx, f.ledger, &mut f.market).unwrap();
        assert_eq!(credit.rewards, 700);
        let again = f.treasury.pull_rewards(&ctx, f.ledger, &mut f.market).unwrap();
        assert!(again.is_empty());

        let regulator = f.treasury.pull_rewards(&ctx, f.regulator, &mut f.market).unwrap();
        assert_eq!(regulator, Credit { rewards: 210, buyback: 90 });
    }

    #[test]
    fn test_former_beneficiary_does_not_settle() {
        let mut f = fixture();
        let new_ledger = Address::from_label("anystake-v2");
        f.treasury.set_ledger(&at(f.owner, 0), new_ledger).unwrap();
        f.market
            .transfer(f.token, f.owner, f.treasury.address(), 1_000)
            .unwrap();

        let credit = f.treasury.pull_rewards(&at(f.ledger, 1), f.ledger, &mut f.market).unwrap();
        assert!(credit.is_empty());
        assert_eq!(f.treasury.pending_rewards(1, &f.market), 1_000);
    }

    #[test]
    fn test_rate_setters() {
        let mut f = fixture();
        f.treasury.set_distribution_rate(&at(f.owner, 0), 500).unwrap();
        assert_eq!(f.treasury.distribution_rate(), 500);
        assert!(f.treasury.set_distribution_rate(&at(f.owner, 0), 1_001).is_err());
        assert!(f.treasury.set_buyback_rate(&at(f.ledger, 0), 100).is_err());
    }

    #[test]
    fn test_migrate_moves_balance_and_schedule() {
        let mut f = fixture();
        f.treasury
            .add_bonded_rewards(&at(f.owner, 0), &mut f.market, 1_000 * WAD, 1_000)
            .unwrap();
        let next_address = Address::from_label("vault-v2");
        let mut next = Treasury::new(next_address, f.owner, f.token, f.ledger, f.regulator, 0);

        let ctx = at(f.owner, 100);
        assert!(f.treasury.migrate(&ctx, &mut f.market, &mut next).is_err());
        f.treasury.set_migrator(&ctx, next_address).unwrap();
        f.treasury.migrate(&ctx, &mut f.market, &mut next).unwrap();

        assert!(f.treasury.is_migrated());
        assert_eq!(f.market.balance_of(f.token, f.treasury.address()), 0);
        assert_eq!(f.market.balance_of(f.token, next_address), 900 * WAD);
        assert_eq!(next.bonded_rewards_remaining(100), 900 * WAD);
        assert_eq!(next.pending_rewards(110, &f.market), 10 * WAD);
        assert_eq!(f.treasury.pending_rewards(110, &f.market), 0);
    }

    #[test]
    fn test_returned_rewards_follow_migration() {
        let mut f = fixture();
        assert_eq!(f.treasury.revenue_address(), f.treasury.address());

        let next_address = Address::from_label("vault-v2");
        let mut next = Treasury::new(next_address, f.owner, f.token, f.ledger, f.regulator, 0);
        let ctx = at(f.owner, 1);
        f.treasury.set_migrator(&ctx, next_address).unwrap();
        assert_eq!(f.treasury.revenue_address(), f.treasury.address());
        f.treasury.migrate(&ctx, &mut f.market, &mut next).unwrap();
        assert_eq!(f.treasury.revenue_address(), next_address);
    }
}
