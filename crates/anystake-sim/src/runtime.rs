// crates/anystake-sim/src/runtime.rs
//
// The simulated chain: one in-memory market, the treasuries, every ledger
// generation and the peg regulator, advanced step by step.
//
// Every step runs against a snapshot of the whole state. A step that fails
// restores the snapshot, so a rejected call never leaves partial effects,
// the same as a reverted transaction.

use std::collections::{BTreeMap, BTreeSet};

use anystake_core::{
    Address, Amount, Block, CallContext, GovernanceRegistry, LoyaltyRegistry, RewardSource,
    SwapVenue, TokenBank,
};
use anystake_economics::ledger::FULL_FEE_EXEMPTION_BPS;
use anystake_economics::{MigrationCoordinator, PegRegulator, Pool, PoolRegistry, Treasury};
use anystake_market::{InMemoryMarket, TokenSpec};

use crate::config::{PoolConfig, SimConfig};
use crate::error::SimError;
use crate::output::{
    BalanceRow, MigrationRow, PoolRow, RegulatorRow, Report, StepRow, TreasuryRow, UserRow,
};
use crate::scenario::Step;
use crate::units::{format_units, parse_units};

pub const LEDGER_LABEL: &str = "anystake";
pub const TREASURY_LABEL: &str = "vault";
pub const REGULATOR_LABEL: &str = "regulator";
pub const LIQUIDITY_PROVIDER_LABEL: &str = "provider";

/// Governance level granted to treasuries.
const TREASURY_ACTOR_LEVEL: u8 = 2;

/// A ledger generation and the treasury it is wired to.
#[derive(Debug, Clone)]
pub struct LedgerSlot {
    pub registry: PoolRegistry,
    /// Index into the chain's treasuries.
    pub treasury: usize,
}

#[derive(Debug, Clone)]
struct State {
    block: Block,
    market: InMemoryMarket,
    treasuries: Vec<Treasury>,
    ledgers: Vec<LedgerSlot>,
    regulator: PegRegulator,
    /// Treasury the latest ledger and the regulator draw from.
    active_treasury: usize,
    migrations: Vec<MigrationCoordinator>,
    labels: BTreeMap<Address, String>,
    /// Accounts that appear in balances or steps.
    users: BTreeSet<Address>,
}

/// Parallel pool arrays in the shape `add_pool_batch` takes.
#[derive(Debug, Default)]
struct PoolBatch {
    tokens: Vec<Address>,
    price_refs: Vec<Address>,
    weights: Vec<u64>,
    vips: Vec<Amount>,
    fees: Vec<u32>,
}

impl PoolBatch {
    fn from_config(market: &InMemoryMarket, pools: &[PoolConfig]) -> Result<Self, SimError> {
        let mut batch = PoolBatch::default();
        for pool in pools {
            batch.tokens.push(lookup_token(market, &pool.token)?);
            let price_ref = match &pool.price_ref {
                Some(label) => {
                    let lp = Address::from_label(label);
                    market.pair(lp)?;
                    lp
                }
                None => Address::ZERO,
            };
            batch.price_refs.push(price_ref);
            batch.weights.push(pool.weight);
            batch.vips.push(parse_units(&pool.vip, 18)?);
            batch.fees.push(pool.fee_bps);
        }
        Ok(batch)
    }

    /// Current parameters of existing pools.
    fn from_pools(pools: &[Pool]) -> Self {
        let mut batch = PoolBatch::default();
        for pool in pools {
            batch.tokens.push(pool.stake_token);
            batch.price_refs.push(pool.price_ref_token);
            batch.weights.push(pool.alloc_weight);
            batch.vips.push(pool.vip_threshold);
            batch.fees.push(pool.fee_bps);
        }
        batch
    }

    fn add_to(
        &self,
        ctx: &CallContext,
        market: &InMemoryMarket,
        registry: &mut PoolRegistry,
    ) -> Result<(), SimError> {
        registry.add_pool_batch(
            ctx,
            market,
            &self.tokens,
            &self.price_refs,
            &self.weights,
            &self.vips,
            &self.fees,
        )?;
        Ok(())
    }
}

fn lookup_token(market: &InMemoryMarket, label: &str) -> Result<Address, SimError> {
    let address = Address::from_label(label);
    if !market.bank().is_registered(address) {
        return Err(SimError::Unknown {
            kind: "token",
            label: label.to_string(),
        });
    }
    Ok(address)
}

/// Governance wiring every treasury receives: actor level, transfer-fee
/// destination and a full fee exemption.
fn wire_treasury(market: &mut InMemoryMarket, treasury: Address) -> Result<(), SimError> {
    market.set_actor_level(treasury, TREASURY_ACTOR_LEVEL)?;
    market.set_fee_destination(treasury)?;
    market.override_fee_exemption(treasury, FULL_FEE_EXEMPTION_BPS)?;
    Ok(())
}

pub struct Chain {
    state: State,
    owner: Address,
    reward_token: Address,
    points_token: Address,
    external_pool_threshold: usize,
    stipend: Amount,
}

impl Chain {
    /// Register tokens, seed liquidity, mint balances and deploy the
    /// treasury, the first ledger generation and the regulator.
    pub fn deploy(config: &SimConfig) -> Result<Self, SimError> {
        let owner = Address::from_label(&config.owner);
        let native = Address::from_label(&config.native);
        let reward_token = Address::from_label(&config.reward_token);
        let points_token = Address::from_label(&config.points_token);

        let mut labels = BTreeMap::new();
        let mut users = BTreeSet::new();
        labels.insert(owner, config.owner.clone());
        labels.insert(native, config.native.clone());

        let mut market = InMemoryMarket::new(native);
        for token in &config.tokens {
            let address = Address::from_label(&token.symbol);
            market.register_token(
                address,
                TokenSpec::new(&token.symbol, token.decimals).with_transfer_fee(token.transfer_fee_bps),
            );
            labels.insert(address, token.symbol.clone());
        }
        for (address, symbol) in [
            (reward_token, &config.reward_token),
            (points_token, &config.points_token),
        ] {
            if !market.bank().is_registered(address) {
                market.register_token(address, TokenSpec::new(symbol, 18));
                labels.insert(address, symbol.clone());
            }
        }
        market.set_points_token(points_token);

        let block = config.start_block;
        market.set_block(block);
        let ctx = CallContext::new(owner, block);

        let vault = Address::from_label(TREASURY_LABEL);
        let ledger_address = Address::from_label(LEDGER_LABEL);
        let regulator_address = Address::from_label(REGULATOR_LABEL);
        labels.insert(vault, TREASURY_LABEL.to_string());
        labels.insert(ledger_address, LEDGER_LABEL.to_string());
        labels.insert(regulator_address, REGULATOR_LABEL.to_string());

        let mut treasury = Treasury::new(
            vault,
            owner,
            reward_token,
            ledger_address,
            regulator_address,
            block,
        );
        treasury.set_distribution_rate(&ctx, config.treasury.distribution_rate)?;
        treasury.set_buyback_rate(&ctx, config.treasury.buyback_rate)?;
        wire_treasury(&mut market, vault)?;

        let provider = Address::from_label(LIQUIDITY_PROVIDER_LABEL);
        labels.insert(provider, LIQUIDITY_PROVIDER_LABEL.to_string());
        for pair in &config.pairs {
            let lp = Address::from_label(&pair.lp);
            let token0 = lookup_token(&market, &pair.token0)?;
            let token1 = lookup_token(&market, &pair.token1)?;
            market.create_pair(lp, token0, token1)?;
            labels.insert(lp, pair.lp.clone());

            let reserve0 = parse_units(&pair.reserve0, market.decimals(token0)?)?;
            let reserve1 = parse_units(&pair.reserve1, market.decimals(token1)?)?;
            market.mint(token0, provider, reserve0)?;
            market.mint(token1, provider, reserve1)?;
            market.seed_liquidity(lp, provider, reserve0, reserve1)?;
        }

        for balance in &config.balances {
            let account = Address::from_label(&balance.account);
            let token = lookup_token(&market, &balance.token)?;
            let amount = parse_units(&balance.amount, market.decimals(token)?)?;
            market.mint(token, account, amount)?;
            labels.insert(account, balance.account.clone());
            if account != owner {
                users.insert(account);
            }
        }

        let stipend = parse_units(&config.ledger.stipend, market.decimals(points_token)?)?;
        let mut ledger = PoolRegistry::new(ledger_address, owner, reward_token)
            .with_external_pool_threshold(config.ledger.external_pool_threshold)
            .with_stipend(stipend);
        PoolBatch::from_config(&market, &config.pools)?.add_to(&ctx, &market, &mut ledger)?;
        ledger.initialize(&ctx, &mut market, vault)?;

        let reference_pair = Address::from_label(&config.regulator.reference_pair);
        let mut regulator = PegRegulator::new(
            regulator_address,
            owner,
            reward_token,
            points_token,
            reference_pair,
        );
        regulator.set_price_multiplier(&ctx, config.regulator.price_multiplier as Amount)?;
        regulator.set_peg_penalty_rate(&ctx, config.regulator.peg_penalty_rate)?;
        regulator.initialize(&ctx, &mut market, vault)?;

        tracing::info!(
            block,
            pools = ledger.pool_length(),
            pairs = config.pairs.len(),
            "deployment complete"
        );

        Ok(Self {
            state: State {
                block,
                market,
                treasuries: vec![treasury],
                ledgers: vec![LedgerSlot {
                    registry: ledger,
                    treasury: 0,
                }],
                regulator,
                active_treasury: 0,
                migrations: Vec::new(),
                labels,
                users,
            },
            owner,
            reward_token,
            points_token,
            external_pool_threshold: config.ledger.external_pool_threshold,
            stipend,
        })
    }

    pub fn block(&self) -> Block {
        self.state.block
    }

    pub fn market(&self) -> &InMemoryMarket {
        &self.state.market
    }

    pub fn ledgers(&self) -> &[LedgerSlot] {
        &self.state.ledgers
    }

    pub fn treasuries(&self) -> &[Treasury] {
        &self.state.treasuries
    }

    pub fn active_treasury(&self) -> &Treasury {
        &self.state.treasuries[self.state.active_treasury]
    }

    pub fn regulator(&self) -> &PegRegulator {
        &self.state.regulator
    }

    pub fn migrations(&self) -> &[MigrationCoordinator] {
        &self.state.migrations
    }

    /// Balance of `token` held by `account`, both given by label.
    pub fn balance(&self, account: &str, token: &str) -> Amount {
        self.state
            .market
            .balance_of(Address::from_label(token), Address::from_label(account))
    }

    /// Run one step atomically.
    pub fn apply(&mut self, step: &Step) -> Result<String, SimError> {
        let snapshot = self.state.clone();
        let result = self.execute(step);
        if let Err(e) = &result {
            tracing::warn!(step = %step, error = %e, "step rolled back");
            self.state = snapshot;
        }
        result
    }

    fn label(&self, address: Address) -> String {
        self.state
            .labels
            .get(&address)
            .cloned()
            .unwrap_or_else(|| address.to_string())
    }

    fn amount_text(&self, token: Address, amount: Amount) -> String {
        let decimals = self.state.market.decimals(token).unwrap_or(18);
        format!("{} {}", format_units(amount, decimals), self.label(token))
    }

    fn parse_amount(&self, token: Address, text: &str) -> Result<Amount, SimError> {
        parse_units(text, self.state.market.decimals(token)?)
    }

    /// Context for a call by the account labelled `user`.
    fn user_ctx(&mut self, user: &str) -> CallContext {
        let address = Address::from_label(user);
        self.state.labels.insert(address, user.to_string());
        self.state.users.insert(address);
        CallContext::new(address, self.state.block)
    }

    fn owner_ctx(&self) -> CallContext {
        CallContext::new(self.owner, self.state.block)
    }

    fn ledger_index(&self, ledger: Option<usize>) -> Result<usize, SimError> {
        let count = self.state.ledgers.len();
        match ledger {
            None => Ok(count - 1),
            Some(index) if index < count => Ok(index),
            Some(index) => Err(SimError::Unknown {
                kind: "ledger",
                label: index.to_string(),
            }),
        }
    }

    fn execute(&mut self, step: &Step) -> Result<String, SimError> {
        match step {
            Step::Advance { blocks } => {
                if *blocks == 0 {
                    return Err(SimError::Config("advance needs at least one block".to_string()));
                }
                self.state.block = self
                    .state
                    .block
                    .checked_add(*blocks)
                    .ok_or_else(|| SimError::Config("block height overflow".to_string()))?;
                self.state.market.set_block(self.state.block);
                Ok(format!("block {}", self.state.block))
            }

            Step::Swap {
                user,
                token_in,
                token_out,
                amount,
            } => {
                let ctx = self.user_ctx(user);
                let token_in = lookup_token(&self.state.market, token_in)?;
                let token_out = lookup_token(&self.state.market, token_out)?;
                let amount = self.parse_amount(token_in, amount)?;
                let out = self.state.market.swap_exact_in(
                    token_in,
                    amount,
                    token_out,
                    ctx.caller,
                    ctx.caller,
                    ctx.block,
                )?;
                Ok(format!("received {}", self.amount_text(token_out, out)))
            }

            Step::Deposit {
                user,
                pool,
                amount,
                ledger,
            } => {
                let ctx = self.user_ctx(user);
                let index = self.ledger_index(*ledger)?;
                let token = self.state.ledgers[index].registry.pool_info(*pool)?.stake_token;
                let amount = self.parse_amount(token, amount)?;
                let State {
                    market,
                    treasuries,
                    ledgers,
                    ..
                } = &mut self.state;
                let slot = &mut ledgers[index];
                let treasury = &mut treasuries[slot.treasury];
                let received = slot.registry.deposit(&ctx, market, treasury, *pool, amount)?;
                Ok(format!("staked {}", self.amount_text(token, received)))
            }

            Step::Withdraw {
                user,
                pool,
                amount,
                ledger,
            } => {
                let ctx = self.user_ctx(user);
                let index = self.ledger_index(*ledger)?;
                let token = self.state.ledgers[index].registry.pool_info(*pool)?.stake_token;
                let amount = self.parse_amount(token, amount)?;
                let State {
                    market,
                    treasuries,
                    ledgers,
                    ..
                } = &mut self.state;
                let slot = &mut ledgers[index];
                let treasury = &mut treasuries[slot.treasury];
                let paid = slot.registry.withdraw(&ctx, market, treasury, *pool, amount)?;
                Ok(format!("returned {}", self.amount_text(token, paid)))
            }

            Step::Claim { user, pool, ledger } => {
                let ctx = self.user_ctx(user);
                let index = self.ledger_index(*ledger)?;
                let State {
                    market,
                    treasuries,
                    ledgers,
                    ..
                } = &mut self.state;
                let slot = &mut ledgers[index];
                let treasury = &mut treasuries[slot.treasury];
                let paid = slot.registry.claim(&ctx, market, treasury, *pool)?;
                Ok(format!("claimed {}", self.amount_text(self.reward_token, paid)))
            }

            Step::ClaimAll { user, ledger } => {
                let ctx = self.user_ctx(user);
                let index = self.ledger_index(*ledger)?;
                let State {
                    market,
                    treasuries,
                    ledgers,
                    ..
                } = &mut self.state;
                let slot = &mut ledgers[index];
                let treasury = &mut treasuries[slot.treasury];
                let paid = slot.registry.claim_all(&ctx, market, treasury)?;
                Ok(format!("claimed {}", self.amount_text(self.reward_token, paid)))
            }

            Step::RegulatorDeposit { user, amount } => {
                let ctx = self.user_ctx(user);
                let amount = self.parse_amount(self.points_token, amount)?;
                let State {
                    market,
                    treasuries,
                    regulator,
                    active_treasury,
                    ..
                } = &mut self.state;
                let received =
                    regulator.deposit(&ctx, market, &mut treasuries[*active_treasury], amount)?;
                Ok(format!("staked {}", self.amount_text(self.points_token, received)))
            }

            Step::RegulatorWithdraw { user, amount } => {
                let ctx = self.user_ctx(user);
                let amount = self.parse_amount(self.points_token, amount)?;
                let State {
                    market,
                    treasuries,
                    regulator,
                    active_treasury,
                    ..
                } = &mut self.state;
                let exit =
                    regulator.withdraw(&ctx, market, &mut treasuries[*active_treasury], amount)?;
                Ok(format!(
                    "{:?} peg: returned {}, proceeds {}, penalty {}, burned {}",
                    exit.side,
                    self.amount_text(self.points_token, exit.principal),
                    self.amount_text(self.reward_token, exit.proceeds),
                    self.amount_text(self.points_token, exit.penalty),
                    self.amount_text(self.points_token, exit.burned),
                ))
            }

            Step::RegulatorClaim { user } => {
                let ctx = self.user_ctx(user);
                let State {
                    market,
                    treasuries,
                    regulator,
                    active_treasury,
                    ..
                } = &mut self.state;
                let paid = regulator.claim(&ctx, market, &mut treasuries[*active_treasury])?;
                Ok(format!("claimed {}", self.amount_text(self.reward_token, paid)))
            }

            Step::Bond { amount, blocks } => {
                let ctx = self.owner_ctx();
                let amount = self.parse_amount(self.reward_token, amount)?;
                let State {
                    market,
                    treasuries,
                    active_treasury,
                    ..
                } = &mut self.state;
                let treasury = &mut treasuries[*active_treasury];
                treasury.add_bonded_rewards(&ctx, market, amount, *blocks)?;
                let per_block = treasury.schedule().per_block;
                Ok(format!(
                    "vesting {} per block",
                    self.amount_text(self.reward_token, per_block)
                ))
            }

            Step::Revenue { from, amount } => {
                let ctx = self.user_ctx(from);
                let amount = self.parse_amount(self.reward_token, amount)?;
                let vault = self.active_treasury().address();
                self.state
                    .market
                    .transfer(self.reward_token, ctx.caller, vault, amount)?;
                Ok(format!(
                    "{} sent to {}",
                    self.amount_text(self.reward_token, amount),
                    self.label(vault)
                ))
            }

            Step::MassUpdate { ledger } => {
                let ctx = self.owner_ctx();
                let index = self.ledger_index(*ledger)?;
                let State {
                    market,
                    treasuries,
                    ledgers,
                    ..
                } = &mut self.state;
                let slot = &mut ledgers[index];
                let treasury = &mut treasuries[slot.treasury];
                slot.registry.mass_update_pools(&ctx, market, treasury)?;
                Ok(format!("{} pools updated", slot.registry.pool_length()))
            }

            Step::SetAlloc {
                pool,
                weight,
                ledger,
            } => {
                let ctx = self.owner_ctx();
                let index = self.ledger_index(*ledger)?;
                let State {
                    market,
                    treasuries,
                    ledgers,
                    ..
                } = &mut self.state;
                let slot = &mut ledgers[index];
                let treasury = &mut treasuries[slot.treasury];
                slot.registry
                    .set_pool_alloc_points(&ctx, market, treasury, *pool, *weight)?;
                Ok(format!(
                    "total weight {}",
                    slot.registry.total_alloc_weight()
                ))
            }

            Step::SetVip {
                pool,
                amount,
                ledger,
            } => {
                let ctx = self.owner_ctx();
                let index = self.ledger_index(*ledger)?;
                let vip = parse_units(amount, 18)?;
                let State {
                    market,
                    treasuries,
                    ledgers,
                    ..
                } = &mut self.state;
                let slot = &mut ledgers[index];
                let treasury = &mut treasuries[slot.treasury];
                slot.registry
                    .set_pool_vip_amount(&ctx, market, treasury, *pool, vip)?;
                Ok(format!("vip threshold {}", format_units(vip, 18)))
            }

            Step::SetActive { active } => {
                let ctx = self.owner_ctx();
                self.state.regulator.set_active(&ctx, *active)?;
                Ok(format!("regulator active = {}", active))
            }

            Step::SetPriceMultiplier { multiplier } => {
                let ctx = self.owner_ctx();
                self.state
                    .regulator
                    .set_price_multiplier(&ctx, *multiplier as Amount)?;
                Ok(format!("price multiplier {}", multiplier))
            }

            Step::Migrate { new_treasury } => self.migrate(*new_treasury),
        }
    }

    /// Deploy the next ledger generation with the current pools and walk
    /// the migration sequence. Stakes stay in the outgoing ledger.
    fn migrate(&mut self, new_treasury: bool) -> Result<String, SimError> {
        let ctx = self.owner_ctx();
        let generation = self.state.ledgers.len() + 1;
        let outgoing = self.state.ledgers.len() - 1;
        let ledger_label = format!("{}-v{}", LEDGER_LABEL, generation);
        let ledger_address = Address::from_label(&ledger_label);
        let regulator_address = self.state.regulator.address();

        // Pool parameters are captured before the freeze zeroes them.
        let batch = PoolBatch::from_pools(self.state.ledgers[outgoing].registry.pools());
        let mut successor = PoolRegistry::new(ledger_address, self.owner, self.reward_token)
            .with_external_pool_threshold(self.external_pool_threshold)
            .with_stipend(self.stipend);
        batch.add_to(&ctx, &self.state.market, &mut successor)?;

        let mut coordinator = MigrationCoordinator::new();
        let State {
            market,
            treasuries,
            ledgers,
            regulator,
            active_treasury,
            migrations,
            labels,
            ..
        } = &mut self.state;
        let current = *active_treasury;
        let outgoing_treasury = ledgers[outgoing].treasury;

        coordinator.freeze_ledger(
            &ctx,
            market,
            &mut treasuries[outgoing_treasury],
            &mut ledgers[outgoing].registry,
        )?;
        coordinator.freeze_regulator(&ctx, market, &mut treasuries[current], regulator)?;

        let next = if new_treasury {
            let label = format!("{}-v{}", TREASURY_LABEL, treasuries.len() + 1);
            let address = Address::from_label(&label);
            let mut replacement = Treasury::new(
                address,
                self.owner,
                self.reward_token,
                ledger_address,
                regulator_address,
                ctx.block,
            );
            replacement.set_distribution_rate(&ctx, treasuries[current].distribution_rate())?;
            replacement.set_buyback_rate(&ctx, treasuries[current].buyback_rate())?;
            wire_treasury(market, address)?;
            coordinator.migrate_treasury(
                &ctx,
                market,
                &mut treasuries[current],
                &mut replacement,
                &mut ledgers[outgoing].registry,
                regulator,
            )?;
            labels.insert(address, label);
            treasuries.push(replacement);
            treasuries.len() - 1
        } else {
            coordinator.swap_beneficiaries(
                &ctx,
                market,
                &mut treasuries[current],
                &mut ledgers[outgoing].registry,
                ledger_address,
                regulator_address,
            )?;
            current
        };

        let next_address = treasuries[next].address();
        coordinator.reactivate_regulator(&ctx, regulator, next_address)?;
        coordinator.initialize_successor(&ctx, market, &mut successor, next_address)?;

        labels.insert(ledger_address, ledger_label.clone());
        ledgers.push(LedgerSlot {
            registry: successor,
            treasury: next,
        });
        *active_treasury = next;
        migrations.push(coordinator);

        tracing::info!(ledger = %ledger_label, treasury = %next_address, "migration completed");
        Ok(format!("{} live on {}", ledger_label, self.label(next_address)))
    }

    /// Accounting checks over the current state. Returns one message per
    /// violation.
    pub fn check_invariants(&self) -> Vec<String> {
        let market = &self.state.market;
        let mut violations = Vec::new();

        for slot in &self.state.ledgers {
            let registry = &slot.registry;
            let name = self.label(registry.address());
            let mut staked_by_pool = vec![0 as Amount; registry.pool_length()];
            let mut owed: Amount = 0;
            for (pid, user, stake) in registry.user_stakes() {
                staked_by_pool[pid] = staked_by_pool[pid].saturating_add(stake.amount);
                match registry.pending(pid, user) {
                    Ok(pending) => owed = owed.saturating_add(pending),
                    Err(e) => violations.push(format!("{} pool {}: pending failed: {}", name, pid, e)),
                }
            }

            let mut staked_by_token: BTreeMap<Address, Amount> = BTreeMap::new();
            for (pid, pool) in registry.pools().iter().enumerate() {
                if staked_by_pool[pid] != pool.total_staked {
                    violations.push(format!(
                        "{} pool {}: user stakes sum to {} but total is {}",
                        name, pid, staked_by_pool[pid], pool.total_staked
                    ));
                }
                let entry = staked_by_token.entry(pool.stake_token).or_insert(0);
                *entry = entry.saturating_add(pool.total_staked);
            }
            for (token, staked) in &staked_by_token {
                let held = market.balance_of(*token, registry.address());
                if held < *staked {
                    violations.push(format!(
                        "{} holds {} {} for {} staked",
                        name,
                        held,
                        self.label(*token),
                        staked
                    ));
                }
            }

            let reward_staked = staked_by_token.get(&self.reward_token).copied().unwrap_or(0);
            let reward_held = market.balance_of(self.reward_token, registry.address());
            if reward_held < owed.saturating_add(reward_staked) {
                violations.push(format!(
                    "{} holds {} reward units but owes {}",
                    name, reward_held, owed
                ));
            }
        }

        let regulator = &self.state.regulator;
        let mut staked: Amount = 0;
        let mut owed: Amount = 0;
        for (user, stake) in regulator.user_stakes() {
            staked = staked.saturating_add(stake.amount);
            match regulator.pending(user) {
                Ok(pending) => owed = owed.saturating_add(pending),
                Err(e) => violations.push(format!("regulator pending failed: {}", e)),
            }
        }
        if staked != regulator.total_staked() {
            violations.push(format!(
                "regulator stakes sum to {} but total is {}",
                staked,
                regulator.total_staked()
            ));
        }
        let points_held = market.balance_of(self.points_token, regulator.address());
        if points_held < regulator.total_staked().saturating_add(regulator.protocol_owned_balance()) {
            violations.push(format!(
                "regulator holds {} points for {} staked and {} owned",
                points_held,
                regulator.total_staked(),
                regulator.protocol_owned_balance()
            ));
        }
        let reward_held = market.balance_of(self.reward_token, regulator.address());
        if reward_held < owed.saturating_add(regulator.buyback_balance()) {
            violations.push(format!(
                "regulator holds {} reward units but owes {} plus {} buyback",
                reward_held,
                owed,
                regulator.buyback_balance()
            ));
        }

        for treasury in &self.state.treasuries {
            if treasury.is_migrated() {
                continue;
            }
            let address = treasury.address();
            let held = market.balance_of(self.reward_token, address);
            if held < treasury.schedule().remaining {
                violations.push(format!(
                    "{} holds {} but has {} bonded",
                    self.label(address),
                    held,
                    treasury.schedule().remaining
                ));
            }
        }

        violations
    }

    /// Snapshot of the chain for display.
    pub fn report(&self, steps: Vec<StepRow>) -> Report {
        let market = &self.state.market;
        let block = self.state.block;

        let mut pools = Vec::new();
        let mut users = Vec::new();
        for slot in &self.state.ledgers {
            let registry = &slot.registry;
            let ledger = self.label(registry.address());
            for (pid, pool) in registry.pools().iter().enumerate() {
                pools.push(PoolRow {
                    ledger: ledger.clone(),
                    pid,
                    token: self.label(pool.stake_token),
                    weight: pool.alloc_weight,
                    vip: format_units(pool.vip_threshold, 18),
                    fee_bps: pool.fee_bps,
                    total_staked: format_units(pool.total_staked, pool.decimals),
                    acc_reward_per_share: pool.acc_reward_per_share.to_string(),
                    last_settled_block: pool.last_settled_block,
                });
            }
            let mut stakes: Vec<UserRow> = registry
                .user_stakes()
                .filter(|(_, _, stake)| stake.amount > 0)
                .map(|(pid, user, stake)| {
                    let decimals = registry.pools()[pid].decimals;
                    UserRow {
                        contract: ledger.clone(),
                        pool: pid.to_string(),
                        user: self.label(user),
                        staked: format_units(stake.amount, decimals),
                        pending: self.amount_text(
                            self.reward_token,
                            registry.pending(pid, user).unwrap_or(0),
                        ),
                    }
                })
                .collect();
            stakes.sort_by(|a, b| (&a.pool, &a.user).cmp(&(&b.pool, &b.user)));
            users.extend(stakes);
        }

        let regulator = &self.state.regulator;
        let regulator_name = self.label(regulator.address());
        let mut stakes: Vec<UserRow> = regulator
            .user_stakes()
            .filter(|(_, stake)| stake.amount > 0)
            .map(|(user, stake)| UserRow {
                contract: regulator_name.clone(),
                pool: "-".to_string(),
                user: self.label(user),
                staked: self.amount_text(self.points_token, stake.amount),
                pending: self.amount_text(self.reward_token, regulator.pending(user).unwrap_or(0)),
            })
            .collect();
        stakes.sort_by(|a, b| a.user.cmp(&b.user));
        users.extend(stakes);

        let treasuries = self
            .state
            .treasuries
            .iter()
            .map(|treasury| TreasuryRow {
                treasury: self.label(treasury.address()),
                balance: self.amount_text(
                    self.reward_token,
                    market.balance_of(self.reward_token, treasury.address()),
                ),
                bonded_remaining: self
                    .amount_text(self.reward_token, treasury.bonded_rewards_remaining(block)),
                per_block: self.amount_text(self.reward_token, treasury.schedule().per_block),
                pending: self.amount_text(self.reward_token, treasury.pending_rewards(block, market)),
                distributed: self.amount_text(self.reward_token, treasury.total_distributed()),
                migrated: treasury.is_migrated(),
            })
            .collect();

        let peg = match regulator.is_above_peg(market) {
            Ok(true) => "above".to_string(),
            Ok(false) => "below".to_string(),
            Err(_) => "n/a".to_string(),
        };
        let regulator_row = RegulatorRow {
            regulator: regulator_name,
            treasury: regulator
                .treasury()
                .map(|address| self.label(address))
                .unwrap_or_else(|| "-".to_string()),
            active: regulator.is_active(),
            total_staked: self.amount_text(self.points_token, regulator.total_staked()),
            buyback: self.amount_text(self.reward_token, regulator.buyback_balance()),
            protocol_owned: self.amount_text(self.points_token, regulator.protocol_owned_balance()),
            peg,
        };

        let mut balances = Vec::new();
        for user in &self.state.users {
            for token in [self.reward_token, self.points_token] {
                balances.push(BalanceRow {
                    account: self.label(*user),
                    token: self.label(token),
                    balance: format_units(
                        market.balance_of(token, *user),
                        market.decimals(token).unwrap_or(18),
                    ),
                });
            }
        }

        let migrations = self
            .state
            .migrations
            .iter()
            .enumerate()
            .flat_map(|(index, coordinator)| {
                coordinator
                    .history()
                    .iter()
                    .map(move |(phase, block)| MigrationRow {
                        migration: index + 1,
                        phase: phase.to_string(),
                        block: *block,
                    })
            })
            .collect();

        Report {
            block,
            steps,
            pools,
            users,
            treasuries,
            regulator: regulator_row,
            balances,
            migrations,
        }
    }
}
