// crates/anystake-economics/src/ledger.rs
//
// Ledger<Pool>: the multi-pool staking engine ("AnyStake").
//
// Pools live in an owned arena indexed by pool id; user positions live in a
// map keyed by (pool id, user). The treasury is not owned: every operation
// that settles receives it as an injected `RewardSource` and checks that it
// is the one wired by `initialize`.
//
// Reward routing. Each treasury payout to the ledger is folded into a
// ledger-wide `acc_reward_per_weight` accumulator at the moment it arrives.
// A pool syncing later takes `alloc_weight * (acc - snapshot)`, so the
// per-share value reached at a given block does not depend on which pool,
// or which operation, happened to pull from the treasury first.
// Accumulator rounding is kept in `carry` and re-enters the next
// distribution. Reward that no staker can take (a pool with nothing staked,
// or no eligible weight at all) goes back to the treasury as ad-hoc revenue,
// so an idle period never pays the next staker retroactively.

use std::collections::HashMap;

use anystake_core::math::{apply_bps, checked_add, checked_sub, mul_div};
use anystake_core::{
    Address, AnyStakeError, Amount, CallContext, Environment, EventKind, LedgerEvent,
    LoyaltyRegistry, RewardSource, TokenBank, BPS_DENOMINATOR, WAD,
};

use crate::pool::{Pool, PoolParams, UserStake};

/// Loyalty points minted per successful deposit.
pub const DEFAULT_STIPEND: Amount = WAD;

/// Pools with an id at or above this are external assets.
pub const DEFAULT_EXTERNAL_POOL_THRESHOLD: usize = 3;

/// Discount requested from the loyalty registry at initialization.
pub const FULL_FEE_EXEMPTION_BPS: u32 = BPS_DENOMINATOR as u32;

/// Scale of `acc_reward_per_weight`. Weights are plain integers, so a
/// smaller scale than WAD keeps large payouts within 128 bits.
pub const REWARD_PER_WEIGHT_SCALE: Amount = 1_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolRegistry {
    address: Address,
    owner: Address,
    reward_token: Address,
    treasury: Option<Address>,
    pools: Vec<Pool>,
    users: HashMap<(usize, Address), UserStake>,
    total_alloc_weight: u64,
    acc_reward_per_weight: Amount,
    carry: Amount,
    external_pool_threshold: usize,
    stipend: Amount,
    events: Vec<LedgerEvent>,
}

impl PoolRegistry {
    pub fn new(address: Address, owner: Address, reward_token: Address) -> Self {
        Self {
            address,
            owner,
            reward_token,
            treasury: None,
            pools: Vec::new(),
            users: HashMap::new(),
            total_alloc_weight: 0,
            acc_reward_per_weight: 0,
            carry: 0,
            external_pool_threshold: DEFAULT_EXTERNAL_POOL_THRESHOLD,
            stipend: DEFAULT_STIPEND,
            events: Vec::new(),
        }
    }

    pub fn with_external_pool_threshold(mut self, threshold: usize) -> Self {
        self.external_pool_threshold = threshold;
        self
    }

    pub fn with_stipend(mut self, stipend: Amount) -> Self {
        self.stipend = stipend;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn reward_token(&self) -> Address {
        self.reward_token
    }

    pub fn treasury(&self) -> Option<Address> {
        self.treasury
    }

    pub fn total_alloc_weight(&self) -> u64 {
        self.total_alloc_weight
    }

    pub fn acc_reward_per_weight(&self) -> Amount {
        self.acc_reward_per_weight
    }

    /// Rewards received but not yet assigned to any pool.
    pub fn carry(&self) -> Amount {
        self.carry
    }

    pub fn external_pool_threshold(&self) -> usize {
        self.external_pool_threshold
    }

    pub fn stipend(&self) -> Amount {
        self.stipend
    }

    pub fn pool_length(&self) -> usize {
        self.pools.len()
    }

    /// Pools with a non-zero weight. Zero once every pool is frozen.
    pub fn total_eligible_pools(&self) -> usize {
        self.pools.iter().filter(|p| p.alloc_weight > 0).count()
    }

    pub fn pool_info(&self, pid: usize) -> Result<&Pool, AnyStakeError> {
        self.pools.get(pid).ok_or(AnyStakeError::PoolNotFound(pid))
    }

    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    pub fn user_info(&self, pid: usize, user: Address) -> UserStake {
        self.users.get(&(pid, user)).copied().unwrap_or_default()
    }

    /// All recorded positions, including zero-amount ones.
    pub fn user_stakes(&self) -> impl Iterator<Item = (usize, Address, &UserStake)> {
        self.users.iter().map(|((pid, user), stake)| (*pid, *user, stake))
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_external(&self, pid: usize) -> bool {
        pid >= self.external_pool_threshold
    }

    /// Reward `user` could claim from `pid` as of the last treasury payout
    /// the ledger received.
    pub fn pending(&self, pid: usize, user: Address) -> Result<Amount, AnyStakeError> {
        let pool = self.pool_info(pid)?;
        let stake = self.user_info(pid, user);
        let mut acc = pool.acc_reward_per_share;
        if pool.total_staked > 0 {
            let reward = self.unsynced_reward(pool)?;
            acc = checked_add(
                acc,
                mul_div(reward, WAD, pool.total_staked, "reward per share")?,
                "reward per share",
            )?;
        }
        let accrued = mul_div(stake.amount, acc, WAD, "accrued reward")?;
        checked_sub(accrued, stake.reward_debt, "pending reward")
    }

    fn only_owner(&self, ctx: &CallContext, action: &str) -> Result<(), AnyStakeError> {
        if ctx.caller != self.owner {
            return Err(AnyStakeError::unauthorized(ctx.caller, action));
        }
        Ok(())
    }

    fn check_treasury<T: RewardSource + ?Sized>(&self, treasury: &T) -> Result<(), AnyStakeError> {
        match self.treasury {
            None => Err(AnyStakeError::NotInitialized(format!(
                "ledger {} has no treasury",
                self.address
            ))),
            Some(expected) if expected != treasury.address() => Err(AnyStakeError::InvalidState(
                format!("ledger is wired to treasury {}, not {}", expected, treasury.address()),
            )),
            Some(_) => Ok(()),
        }
    }

    /// Wire the treasury and whitelist the ledger for fee-free transfers.
    /// Owner-only, once.
    pub fn initialize<L: LoyaltyRegistry + ?Sized>(
        &mut self,
        ctx: &CallContext,
        loyalty: &mut L,
        treasury: Address,
    ) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "initialize ledger")?;
        if self.treasury.is_some() {
            return Err(AnyStakeError::AlreadyInitialized(format!("ledger {}", self.address)));
        }
        loyalty.override_fee_exemption(self.address, FULL_FEE_EXEMPTION_BPS)?;
        self.treasury = Some(treasury);
        tracing::info!(ledger = %self.address, %treasury, "ledger initialized");
        Ok(())
    }

    /// Append pools from parallel arrays. Owner-only and all-or-nothing.
    ///
    /// # Errors
    /// - `Unauthorized` for non-owner callers.
    /// - `ArityMismatch` if the arrays differ in length.
    /// - `InvalidConfig` for a fee above 100%.
    /// - `UnknownToken` if a stake token is not known to the bank.
    #[allow(clippy::too_many_arguments)]
    pub fn add_pool_batch(
        &mut self,
        ctx: &CallContext,
        bank: &dyn TokenBank,
        tokens: &[Address],
        price_ref_tokens: &[Address],
        weights: &[u64],
        vip_thresholds: &[Amount],
        fee_bps: &[u32],
    ) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "add pools")?;
        let expected = tokens.len();
        for actual in [
            price_ref_tokens.len(),
            weights.len(),
            vip_thresholds.len(),
            fee_bps.len(),
        ] {
            if actual != expected {
                return Err(AnyStakeError::ArityMismatch { expected, actual });
            }
        }

        let mut added = Vec::with_capacity(expected);
        let mut total_weight = self.total_alloc_weight;
        for i in 0..expected {
            if fee_bps[i] as Amount > BPS_DENOMINATOR {
                return Err(AnyStakeError::InvalidConfig(format!(
                    "exit fee {} bps exceeds 100%",
                    fee_bps[i]
                )));
            }
            let decimals = bank.decimals(tokens[i])?;
            total_weight = total_weight
                .checked_add(weights[i])
                .ok_or_else(|| AnyStakeError::ArithmeticOverflow("total alloc weight".to_string()))?;
            let params = PoolParams {
                stake_token: tokens[i],
                price_ref_token: price_ref_tokens[i],
                alloc_weight: weights[i],
                vip_threshold: vip_thresholds[i],
                fee_bps: fee_bps[i],
            };
            added.push(Pool::new(params, decimals, ctx.block, self.acc_reward_per_weight));
        }

        let first = self.pools.len();
        self.pools.extend(added);
        self.total_alloc_weight = total_weight;
        tracing::info!(
            first_pid = first,
            count = expected,
            total_alloc_weight = total_weight,
            "pools added"
        );
        Ok(())
    }

    /// Fold a treasury payout plus the carried remainder into the per-weight
    /// accumulator. Returns what has to go back to the treasury.
    fn absorb(&mut self, received: Amount) -> Result<Amount, AnyStakeError> {
        let total = checked_add(received, self.carry, "ledger rewards")?;
        if total == 0 {
            return Ok(0);
        }
        if self.total_alloc_weight == 0 {
            tracing::warn!(received, returned = total, "no eligible pools, rewards returned");
            self.carry = 0;
            return Ok(total);
        }
        let weight = self.total_alloc_weight as Amount;
        let delta = mul_div(total, REWARD_PER_WEIGHT_SCALE, weight, "reward per weight")?;
        let assigned = mul_div(delta, weight, REWARD_PER_WEIGHT_SCALE, "assigned reward")?;
        self.acc_reward_per_weight =
            checked_add(self.acc_reward_per_weight, delta, "reward per weight")?;
        self.carry = total - assigned;
        Ok(0)
    }

    /// Share of the per-weight accumulator the pool has not taken yet.
    fn unsynced_reward(&self, pool: &Pool) -> Result<Amount, AnyStakeError> {
        let delta = checked_sub(
            self.acc_reward_per_weight,
            pool.acc_reward_per_weight_snapshot,
            "pool reward snapshot",
        )?;
        if delta == 0 || pool.alloc_weight == 0 {
            return Ok(0);
        }
        mul_div(pool.alloc_weight as Amount, delta, REWARD_PER_WEIGHT_SCALE, "pool reward")
    }

    /// Move the pool's unsynced share into its per-share accumulator.
    /// Returns the share and the part of it nobody was staked to receive.
    fn sync_pool(&mut self, pid: usize) -> Result<(Amount, Amount), AnyStakeError> {
        let pool = &self.pools[pid];
        let reward = self.unsynced_reward(pool)?;
        let (acc_per_share, idle) = if reward == 0 {
            (pool.acc_reward_per_share, 0)
        } else if pool.total_staked == 0 {
            (pool.acc_reward_per_share, reward)
        } else {
            let per_share = mul_div(reward, WAD, pool.total_staked, "reward per share")?;
            (
                checked_add(pool.acc_reward_per_share, per_share, "reward per share")?,
                0,
            )
        };

        let acc_per_weight = self.acc_reward_per_weight;
        let pool = &mut self.pools[pid];
        pool.acc_reward_per_weight_snapshot = acc_per_weight;
        pool.acc_reward_per_share = acc_per_share;
        Ok((reward, idle))
    }

    /// Send unassignable reward back to the treasury.
    fn return_rewards<T: RewardSource + ?Sized>(
        &self,
        bank: &mut dyn TokenBank,
        treasury: &T,
        amount: Amount,
    ) -> Result<(), AnyStakeError> {
        if amount == 0 {
            return Ok(());
        }
        let to = treasury.revenue_address();
        bank.transfer(self.reward_token, self.address, to, amount)?;
        tracing::debug!(amount, treasury = %to, "unassigned rewards returned");
        Ok(())
    }

    /// Bring pool `pid` up to `ctx.block`.
    ///
    /// Pulls from the treasury at most once per pool per block; a repeated
    /// call in the same block only folds in payouts that another pool pulled
    /// in the meantime.
    pub fn update_pool<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
        pid: usize,
    ) -> Result<(), AnyStakeError> {
        self.pool_info(pid)?;
        self.check_treasury(treasury)?;

        let mut returned = 0;
        if ctx.block > self.pools[pid].last_settled_block {
            let credit = treasury.pull_rewards(ctx, self.address, bank)?;
            let received = checked_add(credit.rewards, credit.buyback, "ledger credit")?;
            returned = self.absorb(received)?;
            self.pools[pid].last_settled_block = ctx.block;
        }
        let (reward, idle) = self.sync_pool(pid)?;
        self.return_rewards(bank, treasury, checked_add(returned, idle, "returned rewards")?)?;

        let pool = &self.pools[pid];
        tracing::debug!(
            pid,
            block = ctx.block,
            reward,
            idle,
            acc_reward_per_share = pool.acc_reward_per_share,
            total_staked = pool.total_staked,
            "pool updated"
        );
        Ok(())
    }

    /// Collect credit `treasury` still owes this ledger, outside the
    /// once-per-block pull, and return whatever no pool can take. A ledger
    /// whose pools are all frozen returns everything it collects.
    pub fn release_unassigned<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
    ) -> Result<Amount, AnyStakeError> {
        self.check_treasury(treasury)?;
        let credit = treasury.pull_rewards(ctx, self.address, bank)?;
        let received = checked_add(credit.rewards, credit.buyback, "ledger credit")?;
        let returned = self.absorb(received)?;
        self.return_rewards(bank, treasury, returned)?;
        tracing::info!(received, returned, "unassigned rewards released");
        Ok(returned)
    }

    /// `update_pool` for every pool in index order.
    pub fn mass_update_pools<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
    ) -> Result<(), AnyStakeError> {
        for pid in 0..self.pools.len() {
            self.update_pool(ctx, bank, treasury, pid)?;
        }
        Ok(())
    }

    /// Pay `user`'s pending reward in `pid` and return it. The caller resets
    /// the reward debt.
    fn pay_pending(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        pid: usize,
        user: Address,
    ) -> Result<Amount, AnyStakeError> {
        let stake = self.user_info(pid, user);
        let pending = self.pools[pid].pending_for(&stake)?;
        if pending > 0 {
            bank.transfer(self.reward_token, self.address, user, pending)?;
            self.events.push(LedgerEvent {
                kind: EventKind::Claim,
                user,
                pid: Some(pid),
                amount: pending,
                block: ctx.block,
            });
        }
        Ok(pending)
    }

    /// Stake `amount` of the pool's token. The credited stake is what the
    /// ledger actually received.
    ///
    /// Every precondition is checked before anything moves.
    ///
    /// # Errors
    /// - `InvalidAmount` if `amount` is zero or the transfer would deliver
    ///   nothing.
    /// - `PoolNotFound`, `NotInitialized`, `InsufficientBalance`.
    pub fn deposit<E, T>(
        &mut self,
        ctx: &CallContext,
        env: &mut E,
        treasury: &mut T,
        pid: usize,
        amount: Amount,
    ) -> Result<Amount, AnyStakeError>
    where
        E: Environment,
        T: RewardSource + ?Sized,
    {
        if amount == 0 {
            return Err(AnyStakeError::InvalidAmount("deposit must be positive".to_string()));
        }
        let stake_token = self.pool_info(pid)?.stake_token;
        self.check_treasury(treasury)?;
        let user = ctx.caller;
        let available = env.balance_of(stake_token, user);
        if available < amount {
            return Err(AnyStakeError::InsufficientBalance {
                token: stake_token,
                account: user,
                needed: amount,
                available,
            });
        }
        if env.quote_transfer(stake_token, user, self.address, amount)? == 0 {
            return Err(AnyStakeError::InvalidAmount("no tokens would arrive".to_string()));
        }

        self.update_pool(ctx, &mut *env, treasury, pid)?;

        let before = env.balance_of(stake_token, self.address);
        env.transfer(stake_token, user, self.address, amount)?;
        let received = checked_sub(env.balance_of(stake_token, self.address), before, "deposit")?;
        if received == 0 {
            return Err(AnyStakeError::InvalidAmount("no tokens received".to_string()));
        }
        self.pay_pending(ctx, &mut *env, pid, user)?;

        let pool = &self.pools[pid];
        let mut stake = self.user_info(pid, user);
        stake.amount = checked_add(stake.amount, received, "user stake")?;
        stake.reward_debt = pool.reward_debt_for(stake.amount)?;
        let total_staked = checked_add(pool.total_staked, received, "pool stake")?;
        self.users.insert((pid, user), stake);
        self.pools[pid].total_staked = total_staked;

        if self.stipend > 0 {
            env.mint_stipend(user, self.stipend)?;
        }
        self.events.push(LedgerEvent {
            kind: EventKind::Deposit,
            user,
            pid: Some(pid),
            amount: received,
            block: ctx.block,
        });
        tracing::info!(%user, pid, amount, received, total_staked, "deposit");
        Ok(received)
    }

    /// Unstake `amount`. Native pools return the full amount. External pools
    /// skim `fee_bps` while the remaining pool stake is below the VIP
    /// threshold and swap it into the reward token for the treasury.
    ///
    /// The swap route is quoted before anything moves, and the swap runs
    /// before the stake is reduced.
    ///
    /// Returns the amount sent to the user.
    pub fn withdraw<E, T>(
        &mut self,
        ctx: &CallContext,
        env: &mut E,
        treasury: &mut T,
        pid: usize,
        amount: Amount,
    ) -> Result<Amount, AnyStakeError>
    where
        E: Environment,
        T: RewardSource + ?Sized,
    {
        if amount == 0 {
            return Err(AnyStakeError::InvalidAmount("withdrawal must be positive".to_string()));
        }
        self.pool_info(pid)?;
        self.check_treasury(treasury)?;
        let user = ctx.caller;
        let staked = self.user_info(pid, user).amount;
        if amount > staked {
            return Err(AnyStakeError::InsufficientStake {
                requested: amount,
                staked,
            });
        }

        // Settlement never changes the pool total, so the fee is known now.
        let pool = &self.pools[pid];
        let stake_token = pool.stake_token;
        let remaining_total = checked_sub(pool.total_staked, amount, "pool stake")?;
        let fee = if self.is_external(pid) && pool.charges_exit_fee(remaining_total)? {
            apply_bps(amount, pool.fee_bps)?
        } else {
            0
        };
        let quoted = if fee > 0 {
            env.quote_exact_in(stake_token, fee, self.reward_token)?
        } else {
            0
        };

        self.update_pool(ctx, &mut *env, treasury, pid)?;

        if fee > 0 {
            let bought = env.swap_exact_in(
                stake_token,
                fee,
                self.reward_token,
                self.address,
                treasury.revenue_address(),
                ctx.block,
            )?;
            tracing::debug!(pid, fee, quoted, bought, "exit fee converted for treasury");
        }

        self.pay_pending(ctx, &mut *env, pid, user)?;
        let mut stake = self.user_info(pid, user);
        stake.amount -= amount;
        stake.reward_debt = self.pools[pid].reward_debt_for(stake.amount)?;
        self.users.insert((pid, user), stake);
        self.pools[pid].total_staked = remaining_total;

        let payout = amount - fee;
        env.transfer(stake_token, self.address, user, payout)?;

        self.events.push(LedgerEvent {
            kind: EventKind::Withdraw,
            user,
            pid: Some(pid),
            amount,
            block: ctx.block,
        });
        tracing::info!(%user, pid, amount, fee, total_staked = remaining_total, "withdraw");
        Ok(payout)
    }

    /// Settle and pay the caller's pending reward in `pid`.
    ///
    /// # Errors
    /// `InsufficientStake` when the caller has nothing staked in the pool.
    pub fn claim<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
        pid: usize,
    ) -> Result<Amount, AnyStakeError> {
        self.pool_info(pid)?;
        self.check_treasury(treasury)?;
        let user = ctx.caller;
        if self.user_info(pid, user).amount == 0 {
            return Err(AnyStakeError::InsufficientStake {
                requested: 0,
                staked: 0,
            });
        }
        self.claim_unchecked(ctx, bank, treasury, pid)
    }

    fn claim_unchecked<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
        pid: usize,
    ) -> Result<Amount, AnyStakeError> {
        let user = ctx.caller;
        self.update_pool(ctx, bank, treasury, pid)?;
        let paid = self.pay_pending(ctx, bank, pid, user)?;
        let mut stake = self.user_info(pid, user);
        stake.reward_debt = self.pools[pid].reward_debt_for(stake.amount)?;
        self.users.insert((pid, user), stake);
        tracing::info!(%user, pid, paid, "claim");
        Ok(paid)
    }

    /// Claim from every pool the caller has stake in.
    ///
    /// # Errors
    /// `InsufficientStake` when the caller has no stake anywhere.
    pub fn claim_all<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
    ) -> Result<Amount, AnyStakeError> {
        self.check_treasury(treasury)?;
        let user = ctx.caller;
        let staked: Vec<usize> = (0..self.pools.len())
            .filter(|pid| self.user_info(*pid, user).amount > 0)
            .collect();
        if staked.is_empty() {
            return Err(AnyStakeError::InsufficientStake {
                requested: 0,
                staked: 0,
            });
        }
        let mut total = 0;
        for pid in staked {
            let paid = self.claim_unchecked(ctx, bank, treasury, pid)?;
            total = checked_add(total, paid, "claimed total")?;
        }
        Ok(total)
    }

    /// Settle `pid`, then change its weight. Weight zero freezes the pool.
    pub fn set_pool_alloc_points<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
        pid: usize,
        weight: u64,
    ) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "set pool weight")?;
        self.update_pool(ctx, bank, treasury, pid)?;
        let old = self.pools[pid].alloc_weight;
        let total = (self.total_alloc_weight - old)
            .checked_add(weight)
            .ok_or_else(|| AnyStakeError::ArithmeticOverflow("total alloc weight".to_string()))?;
        self.pools[pid].alloc_weight = weight;
        self.total_alloc_weight = total;
        tracing::info!(pid, old, new = weight, total_alloc_weight = total, "pool weight updated");
        if total == 0 {
            let carry = std::mem::take(&mut self.carry);
            self.return_rewards(bank, treasury, carry)?;
        }
        Ok(())
    }

    /// Settle `pid`, then change its VIP threshold.
    pub fn set_pool_vip_amount<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
        pid: usize,
        vip_threshold: Amount,
    ) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "set pool vip threshold")?;
        self.update_pool(ctx, bank, treasury, pid)?;
        let old = self.pools[pid].vip_threshold;
        self.pools[pid].vip_threshold = vip_threshold;
        tracing::info!(pid, old, new = vip_threshold, "pool vip threshold updated");
        Ok(())
    }
}
