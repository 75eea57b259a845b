// crates/anystake-economics/src/regulator.rs
//
// PegRegulator: a single-pool ledger over the points token whose exits
// depend on where the points price sits relative to its peg.
//
// The regulator's treasury share arrives in two parts: claimable yield,
// accrued to stakers like any pool, and a buyback earmark held in
// `buyback_balance`. On withdrawal the regulator reads
// `price(points, reference_pair) * price_multiplier` against a peg of one
// WAD unit:
//
//   below peg: the user gets `amount - penalty` points, the penalty stays
//              with the protocol, the same number of points is burned out
//              of the reference pair, and a pro-rata slice of the buyback
//              balance buys points on the market. Both raise the price.
//   above peg: the user gets the full principal plus the proceeds of
//              selling a pro-rata slice of protocol-owned points (lowering
//              the price).
//
// Yield that arrives while nothing is staked goes back to the treasury.
//
// `set_active(false)` freezes it for migration: settlement becomes a no-op
// and user operations fail with `Inactive`. `sweep` still collects credit
// the treasury already paid.

use std::collections::HashMap;

use anystake_core::math::{apply_per_mille, checked_add, checked_sub, mul_div};
use anystake_core::{
    Address, AnyStakeError, Amount, Block, CallContext, Credit, Environment, EventKind,
    LedgerEvent, LoyaltyRegistry, PriceOracle, RewardSource, TokenBank, WAD,
};

use crate::ledger::FULL_FEE_EXEMPTION_BPS;
use crate::pool::UserStake;
use crate::rewards::check_rate;

/// Share of a below-peg withdrawal kept by the protocol, per mille.
pub const DEFAULT_PEG_PENALTY_RATE: u32 = 100;

/// Multiplier that keeps a freshly launched points token below peg.
pub const DEFAULT_PRICE_MULTIPLIER: Amount = 1;

/// Which side of the peg a withdrawal was executed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PegSide {
    Above,
    Below,
}

/// What a regulator withdrawal paid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegulatorExit {
    pub side: PegSide,
    /// Points returned to the user.
    pub principal: Amount,
    /// Reward-token proceeds of the above-peg sell, sent to the user.
    pub proceeds: Amount,
    /// Points kept by the protocol (below peg).
    pub penalty: Amount,
    /// Points burned out of the reference pair (below peg).
    pub burned: Amount,
    /// Buyback balance spent (below peg).
    pub buyback_spent: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PegRegulator {
    address: Address,
    owner: Address,
    reward_token: Address,
    stake_token: Address,
    reference_pair: Address,
    treasury: Option<Address>,
    active: bool,
    users: HashMap<Address, UserStake>,
    total_staked: Amount,
    acc_reward_per_share: Amount,
    last_settled_block: Block,
    /// Rounding remainder of the per-share accumulator.
    carry: Amount,
    price_multiplier: Amount,
    peg_penalty_rate: u32,
    buyback_balance: Amount,
    protocol_owned: Amount,
    events: Vec<LedgerEvent>,
}

impl PegRegulator {
    pub fn new(
        address: Address,
        owner: Address,
        reward_token: Address,
        stake_token: Address,
        reference_pair: Address,
    ) -> Self {
        Self {
            address,
            owner,
            reward_token,
            stake_token,
            reference_pair,
            treasury: None,
            active: true,
            users: HashMap::new(),
            total_staked: 0,
            acc_reward_per_share: 0,
            last_settled_block: 0,
            carry: 0,
            price_multiplier: DEFAULT_PRICE_MULTIPLIER,
            peg_penalty_rate: DEFAULT_PEG_PENALTY_RATE,
            buyback_balance: 0,
            protocol_owned: 0,
            events: Vec::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn stake_token(&self) -> Address {
        self.stake_token
    }

    pub fn reward_token(&self) -> Address {
        self.reward_token
    }

    pub fn reference_pair(&self) -> Address {
        self.reference_pair
    }

    pub fn treasury(&self) -> Option<Address> {
        self.treasury
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn total_staked(&self) -> Amount {
        self.total_staked
    }

    pub fn acc_reward_per_share(&self) -> Amount {
        self.acc_reward_per_share
    }

    pub fn last_settled_block(&self) -> Block {
        self.last_settled_block
    }

    pub fn carry(&self) -> Amount {
        self.carry
    }

    pub fn price_multiplier(&self) -> Amount {
        self.price_multiplier
    }

    pub fn peg_penalty_rate(&self) -> u32 {
        self.peg_penalty_rate
    }

    /// Reward tokens earmarked for below-peg buys.
    pub fn buyback_balance(&self) -> Amount {
        self.buyback_balance
    }

    /// Points held by the protocol (penalties plus bought points).
    pub fn protocol_owned_balance(&self) -> Amount {
        self.protocol_owned
    }

    pub fn user_info(&self, user: Address) -> UserStake {
        self.users.get(&user).copied().unwrap_or_default()
    }

    pub fn user_stakes(&self) -> impl Iterator<Item = (Address, &UserStake)> {
        self.users.iter().map(|(user, stake)| (*user, stake))
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn pending(&self, user: Address) -> Result<Amount, AnyStakeError> {
        let stake = self.user_info(user);
        let accrued = mul_div(stake.amount, self.acc_reward_per_share, WAD, "accrued reward")?;
        checked_sub(accrued, stake.reward_debt, "pending reward")
    }

    /// Whether `price * price_multiplier` is at or above one WAD unit.
    pub fn is_above_peg<O: PriceOracle + ?Sized>(&self, oracle: &O) -> Result<bool, AnyStakeError> {
        let price = oracle.price(self.stake_token, self.reference_pair)?;
        let scaled = price.checked_mul(self.price_multiplier).unwrap_or(Amount::MAX);
        Ok(scaled >= WAD)
    }

    fn only_owner(&self, ctx: &CallContext, action: &str) -> Result<(), AnyStakeError> {
        if ctx.caller != self.owner {
            return Err(AnyStakeError::unauthorized(ctx.caller, action));
        }
        Ok(())
    }

    fn require_active(&self) -> Result<(), AnyStakeError> {
        if !self.active {
            return Err(AnyStakeError::Inactive(format!("regulator {}", self.address)));
        }
        Ok(())
    }

    fn check_treasury<T: RewardSource + ?Sized>(&self, treasury: &T) -> Result<(), AnyStakeError> {
        match self.treasury {
            None => Err(AnyStakeError::NotInitialized(format!(
                "regulator {} has no treasury",
                self.address
            ))),
            Some(expected) if expected != treasury.address() => Err(AnyStakeError::InvalidState(
                format!("regulator is wired to treasury {}, not {}", expected, treasury.address()),
            )),
            Some(_) => Ok(()),
        }
    }

    pub fn initialize<L: LoyaltyRegistry + ?Sized>(
        &mut self,
        ctx: &CallContext,
        loyalty: &mut L,
        treasury: Address,
    ) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "initialize regulator")?;
        if self.treasury.is_some() {
            return Err(AnyStakeError::AlreadyInitialized(format!("regulator {}", self.address)));
        }
        loyalty.override_fee_exemption(self.address, FULL_FEE_EXEMPTION_BPS)?;
        self.treasury = Some(treasury);
        self.last_settled_block = ctx.block;
        tracing::info!(regulator = %self.address, %treasury, "regulator initialized");
        Ok(())
    }

    /// Re-point the regulator at another treasury (after a treasury
    /// migration).
    pub fn set_treasury(&mut self, ctx: &CallContext, treasury: Address) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "set regulator treasury")?;
        tracing::info!(old = ?self.treasury, new = %treasury, "regulator treasury updated");
        self.treasury = Some(treasury);
        Ok(())
    }

    pub fn set_active(&mut self, ctx: &CallContext, active: bool) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "set regulator active")?;
        if active && !self.active {
            // Blocks spent frozen do not accrue.
            self.last_settled_block = self.last_settled_block.max(ctx.block);
        }
        self.active = active;
        tracing::info!(active, "regulator activity changed");
        Ok(())
    }

    pub fn set_price_multiplier(&mut self, ctx: &CallContext, multiplier: Amount) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "set price multiplier")?;
        if multiplier == 0 {
            return Err(AnyStakeError::InvalidConfig(
                "price multiplier must be positive".to_string(),
            ));
        }
        self.price_multiplier = multiplier;
        tracing::info!(multiplier, "price multiplier updated");
        Ok(())
    }

    pub fn set_peg_penalty_rate(&mut self, ctx: &CallContext, rate: u32) -> Result<(), AnyStakeError> {
        self.only_owner(ctx, "set peg penalty rate")?;
        check_rate(rate, "peg penalty rate")?;
        self.peg_penalty_rate = rate;
        tracing::info!(rate, "peg penalty rate updated");
        Ok(())
    }

    /// Pull the regulator's treasury share and accrue the yield part.
    /// No-op while inactive.
    pub fn update_pool<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
    ) -> Result<(), AnyStakeError> {
        if !self.active {
            return Ok(());
        }
        self.check_treasury(treasury)?;
        if ctx.block <= self.last_settled_block {
            return Ok(());
        }

        let credit = treasury.pull_rewards(ctx, self.address, bank)?;
        let returned = self.absorb(bank, treasury, credit)?;
        self.last_settled_block = ctx.block;
        tracing::debug!(
            block = ctx.block,
            rewards = credit.rewards,
            buyback = credit.buyback,
            returned,
            acc_reward_per_share = self.acc_reward_per_share,
            "regulator updated"
        );
        Ok(())
    }

    /// Collect whatever credit `treasury` holds for the regulator, active or
    /// not, without touching the settlement block.
    pub fn sweep<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
    ) -> Result<Credit, AnyStakeError> {
        self.check_treasury(treasury)?;
        let credit = treasury.pull_rewards(ctx, self.address, bank)?;
        let returned = self.absorb(bank, treasury, credit)?;
        tracing::info!(
            rewards = credit.rewards,
            buyback = credit.buyback,
            returned,
            "regulator credit swept"
        );
        Ok(credit)
    }

    /// Book a treasury credit: buyback into the earmark, yield into the
    /// accumulator. With nothing staked the yield goes back to the treasury.
    /// Returns what was sent back.
    fn absorb<T: RewardSource + ?Sized>(
        &mut self,
        bank: &mut dyn TokenBank,
        treasury: &T,
        credit: Credit,
    ) -> Result<Amount, AnyStakeError> {
        let buyback = checked_add(self.buyback_balance, credit.buyback, "buyback balance")?;
        let reward = checked_add(credit.rewards, self.carry, "regulator rewards")?;
        let (acc, carry, idle) = if reward == 0 {
            (self.acc_reward_per_share, 0, 0)
        } else if self.total_staked == 0 {
            (self.acc_reward_per_share, 0, reward)
        } else {
            let per_share = mul_div(reward, WAD, self.total_staked, "reward per share")?;
            let assigned = mul_div(per_share, self.total_staked, WAD, "assigned reward")?;
            (
                checked_add(self.acc_reward_per_share, per_share, "reward per share")?,
                reward - assigned,
                0,
            )
        };

        if idle > 0 {
            let to = treasury.revenue_address();
            bank.transfer(self.reward_token, self.address, to, idle)?;
            tracing::debug!(amount = idle, treasury = %to, "idle regulator yield returned");
        }
        self.buyback_balance = buyback;
        self.acc_reward_per_share = acc;
        self.carry = carry;
        Ok(idle)
    }

    fn pay_pending(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        user: Address,
    ) -> Result<Amount, AnyStakeError> {
        let pending = self.pending(user)?;
        if pending > 0 {
            bank.transfer(self.reward_token, self.address, user, pending)?;
            self.events.push(LedgerEvent {
                kind: EventKind::Claim,
                user,
                pid: None,
                amount: pending,
                block: ctx.block,
            });
        }
        Ok(pending)
    }

    fn reward_debt_for(&self, amount: Amount) -> Result<Amount, AnyStakeError> {
        mul_div(amount, self.acc_reward_per_share, WAD, "reward debt")
    }

    /// Stake points. Returns the amount actually received.
    pub fn deposit<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
        amount: Amount,
    ) -> Result<Amount, AnyStakeError> {
        self.require_active()?;
        if amount == 0 {
            return Err(AnyStakeError::InvalidAmount("deposit must be positive".to_string()));
        }
        self.check_treasury(treasury)?;
        let user = ctx.caller;
        let available = bank.balance_of(self.stake_token, user);
        if available < amount {
            return Err(AnyStakeError::InsufficientBalance {
                token: self.stake_token,
                account: user,
                needed: amount,
                available,
            });
        }

        if bank.quote_transfer(self.stake_token, user, self.address, amount)? == 0 {
            return Err(AnyStakeError::InvalidAmount("no tokens would arrive".to_string()));
        }

        self.update_pool(ctx, bank, treasury)?;
        let before = bank.balance_of(self.stake_token, self.address);
        bank.transfer(self.stake_token, user, self.address, amount)?;
        let received = checked_sub(bank.balance_of(self.stake_token, self.address), before, "deposit")?;
        if received == 0 {
            return Err(AnyStakeError::InvalidAmount("no tokens received".to_string()));
        }
        self.pay_pending(ctx, bank, user)?;

        let mut stake = self.user_info(user);
        stake.amount = checked_add(stake.amount, received, "user stake")?;
        stake.reward_debt = self.reward_debt_for(stake.amount)?;
        self.total_staked = checked_add(self.total_staked, received, "regulator stake")?;
        self.users.insert(user, stake);

        self.events.push(LedgerEvent {
            kind: EventKind::Deposit,
            user,
            pid: None,
            amount: received,
            block: ctx.block,
        });
        tracing::info!(%user, amount, received, total_staked = self.total_staked, "regulator deposit");
        Ok(received)
    }

    /// Unstake points, defending or taxing the peg depending on price.
    ///
    /// The swap route is quoted and the pair burn runs before anything
    /// settles, so an exit that cannot complete leaves the regulator as it was.
    pub fn withdraw<E, T>(
        &mut self,
        ctx: &CallContext,
        env: &mut E,
        treasury: &mut T,
        amount: Amount,
    ) -> Result<RegulatorExit, AnyStakeError>
    where
        E: Environment,
        T: RewardSource + ?Sized,
    {
        self.require_active()?;
        if amount == 0 {
            return Err(AnyStakeError::InvalidAmount("withdrawal must be positive".to_string()));
        }
        self.check_treasury(treasury)?;
        let user = ctx.caller;
        let staked = self.user_info(user).amount;
        if amount > staked {
            return Err(AnyStakeError::InsufficientStake {
                requested: amount,
                staked,
            });
        }
        let above = self.is_above_peg(&*env)?;
        let total_before = self.total_staked;

        // Settlement only grows the buyback balance: quoting the current
        // slice (at least one unit) proves the route and its reserves.
        let (route_in, route_out, hint) = if above {
            let sell = mul_div(self.protocol_owned, amount, total_before, "protocol sell slice")?;
            (self.stake_token, self.reward_token, sell)
        } else {
            let spend = mul_div(self.buyback_balance, amount, total_before, "buyback slice")?;
            (self.reward_token, self.stake_token, spend)
        };
        env.quote_exact_in(route_in, hint.max(1), route_out)?;

        let (penalty, burned) = if above {
            (0, 0)
        } else {
            let penalty = apply_per_mille(amount, self.peg_penalty_rate)?;
            let burned = if penalty > 0 {
                env.burn_from_pair(self.reference_pair, penalty)?
            } else {
                0
            };
            (penalty, burned)
        };

        self.update_pool(ctx, &mut *env, treasury)?;

        let mut exit = if above {
            self.exit_above_peg(ctx, env, user, amount, total_before)?
        } else {
            self.exit_below_peg(ctx, env, amount, penalty, total_before)?
        };
        exit.burned = burned;

        self.pay_pending(ctx, &mut *env, user)?;
        let mut stake = self.user_info(user);
        stake.amount -= amount;
        stake.reward_debt = self.reward_debt_for(stake.amount)?;
        self.users.insert(user, stake);
        self.total_staked = checked_sub(total_before, amount, "regulator stake")?;

        env.transfer(self.stake_token, self.address, user, exit.principal)?;

        self.events.push(LedgerEvent {
            kind: EventKind::Withdraw,
            user,
            pid: None,
            amount,
            block: ctx.block,
        });
        tracing::info!(
            %user,
            amount,
            side = ?exit.side,
            principal = exit.principal,
            proceeds = exit.proceeds,
            penalty = exit.penalty,
            burned = exit.burned,
            "regulator withdraw"
        );
        Ok(exit)
    }

    /// Keep the penalty and spend a pro-rata slice of the buyback balance
    /// on points. The caller transfers the principal.
    fn exit_below_peg<E: Environment>(
        &mut self,
        ctx: &CallContext,
        env: &mut E,
        amount: Amount,
        penalty: Amount,
        total_before: Amount,
    ) -> Result<RegulatorExit, AnyStakeError> {
        let principal = amount - penalty;
        let spend = mul_div(self.buyback_balance, amount, total_before, "buyback slice")?;

        let mut owned = checked_add(self.protocol_owned, penalty, "protocol owned")?;
        if spend > 0 {
            let bought = env.swap_exact_in(
                self.reward_token,
                spend,
                self.stake_token,
                self.address,
                self.address,
                ctx.block,
            )?;
            owned = checked_add(owned, bought, "protocol owned")?;
            self.buyback_balance -= spend;
            tracing::debug!(spend, bought, "buyback executed below peg");
        }
        self.protocol_owned = owned;

        Ok(RegulatorExit {
            side: PegSide::Below,
            principal,
            proceeds: 0,
            penalty,
            burned: 0,
            buyback_spent: spend,
        })
    }

    /// Sell a pro-rata slice of protocol-owned points for the user. The
    /// caller transfers the principal.
    fn exit_above_peg<E: Environment>(
        &mut self,
        ctx: &CallContext,
        env: &mut E,
        user: Address,
        amount: Amount,
        total_before: Amount,
    ) -> Result<RegulatorExit, AnyStakeError> {
        let sell = mul_div(self.protocol_owned, amount, total_before, "protocol sell slice")?;
        let proceeds = if sell > 0 {
            let out = env.swap_exact_in(
                self.stake_token,
                sell,
                self.reward_token,
                self.address,
                user,
                ctx.block,
            )?;
            self.protocol_owned -= sell;
            tracing::debug!(sell, proceeds = out, "protocol points sold above peg");
            out
        } else {
            0
        };

        Ok(RegulatorExit {
            side: PegSide::Above,
            principal: amount,
            proceeds,
            penalty: 0,
            burned: 0,
            buyback_spent: 0,
        })
    }

    /// Settle and pay the caller's pending yield.
    ///
    /// # Errors
    /// `InsufficientStake` when the caller has nothing staked.
    pub fn claim<T: RewardSource + ?Sized>(
        &mut self,
        ctx: &CallContext,
        bank: &mut dyn TokenBank,
        treasury: &mut T,
    ) -> Result<Amount, AnyStakeError> {
        self.require_active()?;
        self.check_treasury(treasury)?;
        let user = ctx.caller;
        let mut stake = self.user_info(user);
        if stake.amount == 0 {
            return Err(AnyStakeError::InsufficientStake {
                requested: 0,
                staked: 0,
            });
        }
        self.update_pool(ctx, bank, treasury)?;
        let paid = self.pay_pending(ctx, bank, user)?;
        stake.reward_debt = self.reward_debt_for(stake.amount)?;
        self.users.insert(user, stake);
        tracing::info!(%user, paid, "regulator claim");
        Ok(paid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::treasury::Treasury;
    use anystake_market::{InMemoryMarket, TokenSpec};

    /// Above-peg multiplier used by the deployment scripts.
    const ABOVE_PEG_MULTIPLIER: Amount = 10_000_000;

    struct Fixture {
        market: InMemoryMarket,
        regulator: PegRegulator,
        treasury: Treasury,
        owner: Address,
        alice: Address,
        bob: Address,
        reward: Address,
        points: Address,
        points_lp: Address,
    }

    fn fixture() -> Fixture {
        fixture_with(true)
    }

    /// Without `reward_routed` the reward token has no pair, so buybacks
    /// and protocol sells have no route.
    fn fixture_with(reward_routed: bool) -> Fixture {
        let owner = Address::from_label("mastermind");
        let alice = Address::from_label("alpha");
        let bob = Address::from_label("beta");
        let provider = Address::from_label("provider");
        let weth = Address::from_label("WETH");
        let reward = Address::from_label("DFT");
        let points = Address::from_label("DFTP");
        let reward_lp = Address::from_label("DFT-LP");
        let points_lp = Address::from_label("DFTP-LP");

        let mut market = InMemoryMarket::new(weth);
        market.register_token(reward, TokenSpec::new("DFT", 18));
        market.register_token(points, TokenSpec::new("DFTP", 18));
        market.set_points_token(points);
        market.create_pair(points_lp, points, weth).unwrap();
        market.mint(weth, provider, 100 * WAD).unwrap();
        market.mint(reward, provider, 100_000 * WAD).unwrap();
        market.mint(points, provider, 100_000 * WAD).unwrap();
        if reward_routed {
            market.create_pair(reward_lp, reward, weth).unwrap();
            market.seed_liquidity(reward_lp, provider, 10_000 * WAD, 10 * WAD).unwrap();
        }
        market.seed_liquidity(points_lp, provider, 10_000 * WAD, 10 * WAD).unwrap();
        market.mint(reward, owner, 10_000 * WAD).unwrap();
        for user in [alice, bob] {
            market.mint(points, user, 1_000 * WAD).unwrap();
        }

        let address = Address::from_label("regulator");
        let treasury = Treasury::new(
            Address::from_label("vault"),
            owner,
            reward,
            Address::from_label("anystake"),
            address,
            0,
        );
        let mut regulator = PegRegulator::new(address, owner, reward, points, points_lp);
        regulator
            .initialize(&CallContext::new(owner, 0), &mut market, treasury.address())
            .unwrap();

        Fixture {
            market,
            regulator,
            treasury,
            owner,
            alice,
            bob,
            reward,
            points,
            points_lp,
        }
    }

    fn at(caller: Address, block: Block) -> CallContext {
        CallContext::new(caller, block)
    }

    #[test]
    fn test_peg_side_follows_multiplier() {
        let mut f = fixture();
        // 1 DFTP = 0.001 WETH.
        assert!(!f.regulator.is_above_peg(&f.market).unwrap());
        f.regulator
            .set_price_multiplier(&at(f.owner, 0), ABOVE_PEG_MULTIPLIER)
            .unwrap();
        assert!(f.regulator.is_above_peg(&f.market).unwrap());
    }

    #[test]
    fn test_revenue_split_reaches_buyback_balance() {
        let mut f = fixture();
        f.regulator
            .deposit(&at(f.alice, 1), &mut f.market, &mut f.treasury, 100 * WAD)
            .unwrap();
        f.market
            .transfer(f.reward, f.owner, f.treasury.address(), 1_000 * WAD)
            .unwrap();

        let claimed = f
            .regulator
            .claim(&at(f.alice, 2), &mut f.market, &mut f.treasury)
            .unwrap();
        assert_eq!(claimed, 210 * WAD);
        assert_eq!(f.regulator.buyback_balance(), 90 * WAD);
    }

    #[test]
    fn test_below_peg_withdraw_defends_price() {
        let mut f = fixture();
        f.regulator
            .deposit(&at(f.alice, 1), &mut f.market, &mut f.treasury, 100 * WAD)
            .unwrap();
        f.market
            .transfer(f.reward, f.owner, f.treasury.address(), 1_000 * WAD)
            .unwrap();

        let price_before = f.market.price(f.points, f.points_lp).unwrap();
        let points_before = f.market.balance_of(f.points, f.alice);
        let exit = f
            .regulator
            .withdraw(&at(f.alice, 2), &mut f.market, &mut f.treasury, 100 * WAD)
            .unwrap();

        assert_eq!(exit.side, PegSide::Below);
        assert_eq!(exit.principal, 90 * WAD);
        assert_eq!(exit.penalty, 10 * WAD);
        assert_eq!(exit.burned, 10 * WAD);
        assert_eq!(exit.buyback_spent, 90 * WAD);
        assert_eq!(f.market.balance_of(f.points, f.alice), points_before + 90 * WAD);
        assert!(f.market.price(f.points, f.points_lp).unwrap() > price_before);
        assert_eq!(f.regulator.buyback_balance(), 0);
        assert!(f.regulator.protocol_owned_balance() > 10 * WAD);
        assert_eq!(
            f.market.balance_of(f.points, f.regulator.address()),
            f.regulator.protocol_owned_balance()
        );
    }

    #[test]
    fn test_above_peg_withdraw_sells_protocol_points() {
        let mut f = fixture();
        for user in [f.alice, f.bob] {
            f.regulator
                .deposit(&at(user, 1), &mut f.market, &mut f.treasury, 100 * WAD)
                .unwrap();
        }
        // Bob leaves below peg with no buyback funds: 10 points kept and
        // 10 burned out of the pair.
        f.regulator
            .withdraw(&at(f.bob, 2), &mut f.market, &mut f.treasury, 100 * WAD)
            .unwrap();
        assert_eq!(f.regulator.protocol_owned_balance(), 10 * WAD);

        f.regulator
            .set_price_multiplier(&at(f.owner, 2), ABOVE_PEG_MULTIPLIER)
            .unwrap();
        let price_before = f.market.price(f.points, f.points_lp).unwrap();
        let reward_before = f.market.balance_of(f.reward, f.alice);

        let exit = f
            .regulator
            .withdraw(&at(f.alice, 3), &mut f.market, &mut f.treasury, 100 * WAD)
            .unwrap();

        assert_eq!(exit.side, PegSide::Above);
        assert_eq!(exit.principal, 100 * WAD);
        assert!(exit.proceeds > 0);
        assert_eq!(f.market.balance_of(f.reward, f.alice), reward_before + exit.proceeds);
        assert_eq!(f.regulator.protocol_owned_balance(), 0);
        assert!(f.market.price(f.points, f.points_lp).unwrap() < price_before);
    }

    #[test]
    fn test_zero_buyback_exit_still_raises_price() {
        let mut f = fixture();
        f.regulator
            .deposit(&at(f.alice, 1), &mut f.market, &mut f.treasury, 100 * WAD)
            .unwrap();
        let price_before = f.market.price(f.points, f.points_lp).unwrap();
        let reserve_before = f.market.balance_of(f.points, f.points_lp);

        let exit = f
            .regulator
            .withdraw(&at(f.alice, 2), &mut f.market, &mut f.treasury, 100 * WAD)
            .unwrap();
        assert_eq!(exit.side, PegSide::Below);
        assert_eq!(exit.buyback_spent, 0);
        assert_eq!(exit.burned, 10 * WAD);
        assert_eq!(f.market.balance_of(f.points, f.points_lp), reserve_before - 10 * WAD);
        assert!(f.market.price(f.points, f.points_lp).unwrap() > price_before);
        assert_eq!(f.regulator.protocol_owned_balance(), 10 * WAD);
    }

    #[test]
    fn test_idle_yield_returns_to_treasury() {
        let mut f = fixture();
        f.treasury
            .add_bonded_rewards(&at(f.owner, 0), &mut f.market, 1_000 * WAD, 100)
            .unwrap();

        // Nobody staked for blocks 0..100: the 210 of yield goes back.
        f.regulator
            .deposit(&at(f.alice, 100), &mut f.market, &mut f.treasury, WAD)
            .unwrap();
        assert_eq!(f.regulator.pending(f.alice).unwrap(), 0);
        assert_eq!(f.regulator.buyback_balance(), 90 * WAD);
        assert_eq!(f.regulator.carry(), 0);
        assert_eq!(f.market.balance_of(f.reward, f.treasury.address()), 210 * WAD);

        // The next settlement re-splits it as revenue: 210 * 30% * 70%.
        let claimed = f
            .regulator
            .claim(&at(f.alice, 101), &mut f.market, &mut f.treasury)
            .unwrap();
        assert_eq!(claimed, 441 * WAD / 10);
        assert_eq!(f.regulator.buyback_balance(), 90 * WAD + 189 * WAD / 10);
    }

    #[test]
    fn test_unroutable_exit_changes_nothing() {
        let mut f = fixture_with(false);
        f.regulator
            .deposit(&at(f.alice, 1), &mut f.market, &mut f.treasury, 100 * WAD)
            .unwrap();
        f.market
            .transfer(f.reward, f.owner, f.treasury.address(), 1_000 * WAD)
            .unwrap();
        let before = f.regulator.clone();
        let reserve_before = f.market.balance_of(f.points, f.points_lp);
        let points_before = f.market.balance_of(f.points, f.alice);

        let err = f
            .regulator
            .withdraw(&at(f.alice, 2), &mut f.market, &mut f.treasury, 100 * WAD)
            .unwrap_err();
        assert!(matches!(err, AnyStakeError::UnknownPair(_)));
        assert_eq!(f.regulator, before);
        assert_eq!(f.market.balance_of(f.points, f.points_lp), reserve_before);
        assert_eq!(f.market.balance_of(f.points, f.alice), points_before);
        assert_eq!(f.market.balance_of(f.reward, f.treasury.address()), 1_000 * WAD);
    }

    #[test]
    fn test_sweep_collects_while_inactive() {
        let mut f = fixture();
        f.regulator
            .deposit(&at(f.alice, 1), &mut f.market, &mut f.treasury, 100 * WAD)
            .unwrap();
        f.regulator.set_active(&at(f.owner, 1), false).unwrap();
        f.market
            .transfer(f.reward, f.owner, f.treasury.address(), 1_000 * WAD)
            .unwrap();

        let credit = f
            .regulator
            .sweep(&at(f.owner, 5), &mut f.market, &mut f.treasury)
            .unwrap();
        assert_eq!(credit.rewards, 210 * WAD);
        assert_eq!(credit.buyback, 90 * WAD);
        assert_eq!(f.regulator.pending(f.alice).unwrap(), 210 * WAD);
        assert_eq!(f.regulator.buyback_balance(), 90 * WAD);
        assert_eq!(f.regulator.last_settled_block(), 1);
    }

    #[test]
    fn test_withdraw_more_than_staked() {
        let mut f = fixture();
        f.regulator
            .deposit(&at(f.alice, 1), &mut f.market, &mut f.treasury, 10 * WAD)
            .unwrap();
        let err = f
            .regulator
            .withdraw(&at(f.alice, 2), &mut f.market, &mut f.treasury, 11 * WAD)
            .unwrap_err();
        assert!(matches!(err, AnyStakeError::InsufficientStake { .. }));
        assert_eq!(f.regulator.total_staked(), 10 * WAD);
    }

    #[test]
    fn test_inactive_regulator() {
        let mut f = fixture();
        f.market
            .transfer(f.reward, f.owner, f.treasury.address(), 1_000)
            .unwrap();
        f.regulator.set_active(&at(f.owner, 1), false).unwrap();

        f.regulator
            .update_pool(&at(f.owner, 5), &mut f.market, &mut f.treasury)
            .unwrap();
        assert_eq!(f.treasury.pending_rewards(5, &f.market), 1_000);

        let err = f
            .regulator
            .deposit(&at(f.alice, 5), &mut f.market, &mut f.treasury, WAD)
            .unwrap_err();
        assert!(matches!(err, AnyStakeError::Inactive(_)));

        f.regulator.set_active(&at(f.owner, 6), true).unwrap();
        assert_eq!(f.regulator.last_settled_block(), 6);
    }

    #[test]
    fn test_claim_requires_stake() {
        let mut f = fixture();
        let err = f
            .regulator
            .claim(&at(f.alice, 1), &mut f.market, &mut f.treasury)
            .unwrap_err();
        assert!(matches!(err, AnyStakeError::InsufficientStake { .. }));
    }

    #[test]
    fn test_admin_setters() {
        let mut f = fixture();
        assert!(f.regulator.set_peg_penalty_rate(&at(f.alice, 0), 50).is_err());
        assert!(f.regulator.set_peg_penalty_rate(&at(f.owner, 0), 1_001).is_err());
        f.regulator.set_peg_penalty_rate(&at(f.owner, 0), 50).unwrap();
        assert_eq!(f.regulator.peg_penalty_rate(), 50);
        assert!(f.regulator.set_price_multiplier(&at(f.owner, 0), 0).is_err());
    }

    #[test]
    fn test_set_treasury_rewires() {
        let mut f = fixture();
        let next = Address::from_label("vault-v2");
        f.regulator.set_treasury(&at(f.owner, 1), next).unwrap();
        let err = f
            .regulator
            .update_pool(&at(f.owner, 2), &mut f.market, &mut f.treasury)
            .unwrap_err();
        assert!(matches!(err, AnyStakeError::InvalidState(_)));
    }
}
