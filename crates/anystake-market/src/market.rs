// crates/anystake-market/src/market.rs
//
// `InMemoryMarket`: one object standing in for every external collaborator
// of the staking core (token bank, AMM router, points token / loyalty
// registry, governance registry). Cloneable so a caller can snapshot and
// restore it around a call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use anystake_core::math::checked_sub;
use anystake_core::{
    Address, AnyStakeError, Amount, Block, GovernanceRegistry, LoyaltyRegistry, PriceOracle,
    SwapVenue, TokenBank,
};

use crate::amm::{amount_out, lp_to_mint, spot_price, Pair};
use crate::bank::{InMemoryBank, TokenSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryMarket {
    bank: InMemoryBank,
    pairs: BTreeMap<Address, Pair>,
    /// Routing token for multi-hop swaps and the native side of liquidity.
    native: Address,
    /// Intermediate account for two-hop swaps.
    router: Address,
    /// Token minted as loyalty stipend.
    points_token: Option<Address>,
    stipends_minted: u64,
    actor_levels: BTreeMap<Address, u8>,
    block: Block,
}

impl InMemoryMarket {
    /// Create a market whose routing/native token is `native` (registered
    /// with 18 decimals).
    pub fn new(native: Address) -> Self {
        let mut bank = InMemoryBank::new();
        bank.register(native, TokenSpec::new("WETH", 18));
        Self {
            bank,
            pairs: BTreeMap::new(),
            native,
            router: Address::from_label("anystake-market/router"),
            points_token: None,
            stipends_minted: 0,
            actor_levels: BTreeMap::new(),
            block: 0,
        }
    }

    pub fn native(&self) -> Address {
        self.native
    }

    pub fn bank(&self) -> &InMemoryBank {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut InMemoryBank {
        &mut self.bank
    }

    pub fn register_token(&mut self, token: Address, spec: TokenSpec) {
        self.bank.register(token, spec);
    }

    pub fn mint(&mut self, token: Address, to: Address, amount: Amount) -> Result<(), AnyStakeError> {
        self.bank.mint(token, to, amount)
    }

    /// Current block, used for swap deadlines.
    pub fn set_block(&mut self, block: Block) {
        self.block = block;
    }

    pub fn set_points_token(&mut self, token: Address) {
        self.points_token = Some(token);
    }

    pub fn stipends_minted(&self) -> u64 {
        self.stipends_minted
    }

    pub fn actor_level(&self, account: Address) -> u8 {
        self.actor_levels.get(&account).copied().unwrap_or(0)
    }

    /// Register a pair; its LP token is registered with 18 decimals.
    pub fn create_pair(&mut self, lp: Address, token0: Address, token1: Address) -> Result<(), AnyStakeError> {
        self.bank.spec(token0)?;
        self.bank.spec(token1)?;
        if self.pairs.contains_key(&lp) {
            return Err(AnyStakeError::InvalidConfig(format!("pair {} already exists", lp)));
        }
        self.bank.register(lp, TokenSpec::new("LP", 18));
        self.pairs.insert(lp, Pair::new(lp, token0, token1));
        Ok(())
    }

    pub fn pair(&self, lp: Address) -> Result<&Pair, AnyStakeError> {
        self.pairs
            .get(&lp)
            .ok_or_else(|| AnyStakeError::UnknownPair(lp.to_string()))
    }

    /// Pair holding both `a` and `b`, if any.
    pub fn find_pair(&self, a: Address, b: Address) -> Option<&Pair> {
        self.pairs.values().find(|p| p.contains(a) && p.contains(b) && a != b)
    }

    /// Pairs a swap from `token_in` to `token_out` goes through: the direct
    /// pair if there is one, otherwise two hops via the native token.
    fn route(&self, token_in: Address, token_out: Address) -> Result<Vec<Pair>, AnyStakeError> {
        if let Some(direct) = self.find_pair(token_in, token_out) {
            return Ok(vec![direct.clone()]);
        }
        let first = self
            .find_pair(token_in, self.native)
            .cloned()
            .ok_or_else(|| AnyStakeError::UnknownPair(format!("{} / native", token_in)))?;
        let second = self
            .find_pair(self.native, token_out)
            .cloned()
            .ok_or_else(|| AnyStakeError::UnknownPair(format!("native / {}", token_out)))?;
        Ok(vec![first, second])
    }

    /// Reserves of `pair`, ordered as (token0, token1).
    pub fn reserves(&self, lp: Address) -> Result<(Amount, Amount), AnyStakeError> {
        let pair = self.pair(lp)?;
        Ok((
            self.bank.balance(pair.token0, lp),
            self.bank.balance(pair.token1, lp),
        ))
    }

    /// Deposit both sides of a pair from `provider` and mint LP tokens to it.
    pub fn seed_liquidity(
        &mut self,
        lp: Address,
        provider: Address,
        amount0: Amount,
        amount1: Amount,
    ) -> Result<Amount, AnyStakeError> {
        let pair = self.pair(lp)?.clone();
        self.deposit_pair(&pair, pair.token0, amount0, amount1, provider, provider)
    }

    fn deposit_pair(
        &mut self,
        pair: &Pair,
        token_a: Address,
        amount_a: Amount,
        amount_b: Amount,
        from: Address,
        recipient: Address,
    ) -> Result<Amount, AnyStakeError> {
        let token_b = pair.other(token_a)?;
        let reserve_a = self.bank.balance(token_a, pair.lp);
        let reserve_b = self.bank.balance(token_b, pair.lp);
        self.bank.transfer(token_a, from, pair.lp, amount_a)?;
        self.bank.transfer(token_b, from, pair.lp, amount_b)?;
        let added_a = checked_sub(self.bank.balance(token_a, pair.lp), reserve_a, "pair deposit")?;
        let added_b = checked_sub(self.bank.balance(token_b, pair.lp), reserve_b, "pair deposit")?;
        let minted = lp_to_mint(
            added_a,
            added_b,
            reserve_a,
            reserve_b,
            self.bank.total_supply(pair.lp),
        )?;
        self.bank.mint(pair.lp, recipient, minted)?;
        Ok(minted)
    }

    fn swap_hop(
        &mut self,
        pair: &Pair,
        token_in: Address,
        amount_in: Amount,
        from: Address,
        recipient: Address,
    ) -> Result<Amount, AnyStakeError> {
        let token_out = pair.other(token_in)?;
        let reserve_in = self.bank.balance(token_in, pair.lp);
        let reserve_out = self.bank.balance(token_out, pair.lp);
        self.bank.transfer(token_in, from, pair.lp, amount_in)?;
        let received = checked_sub(self.bank.balance(token_in, pair.lp), reserve_in, "swap input")?;
        let out = amount_out(received, reserve_in, reserve_out)?;

        let before = self.bank.balance(token_out, recipient);
        self.bank.transfer(token_out, pair.lp, recipient, out)?;
        let delivered = checked_sub(self.bank.balance(token_out, recipient), before, "swap output")?;
        tracing::debug!(pair = %pair.lp, %token_in, amount_in, delivered, "swap hop");
        Ok(delivered)
    }
}

impl TokenBank for InMemoryMarket {
    fn balance_of(&self, token: Address, account: Address) -> Amount {
        self.bank.balance(token, account)
    }

    fn decimals(&self, token: Address) -> Result<u8, AnyStakeError> {
        Ok(self.bank.spec(token)?.decimals)
    }

    fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), AnyStakeError> {
        self.bank.transfer(token, from, to, amount)
    }

    fn quote_transfer(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<Amount, AnyStakeError> {
        let fee = self.bank.transfer_fee(token, from, to, amount)?;
        Ok(amount - fee)
    }
}

impl PriceOracle for InMemoryMarket {
    fn price(&self, base: Address, reference_pair: Address) -> Result<Amount, AnyStakeError> {
        let pair = self.pair(reference_pair)?;
        let quote = pair.other(base)?;
        spot_price(
            self.bank.balance(base, pair.lp),
            self.bank.spec(base)?.decimals,
            self.bank.balance(quote, pair.lp),
            self.bank.spec(quote)?.decimals,
        )
    }
}

impl SwapVenue for InMemoryMarket {
    fn swap_exact_in(
        &mut self,
        token_in: Address,
        amount_in: Amount,
        token_out: Address,
        from: Address,
        recipient: Address,
        deadline: Block,
    ) -> Result<Amount, AnyStakeError> {
        if deadline < self.block {
            return Err(AnyStakeError::InvalidState(format!(
                "swap deadline {} passed at block {}",
                deadline, self.block
            )));
        }
        if amount_in == 0 {
            return Ok(0);
        }

        let router = self.router;
        match self.route(token_in, token_out)?.as_slice() {
            [direct] => self.swap_hop(direct, token_in, amount_in, from, recipient),
            [first, second] => {
                let native_out = self.swap_hop(first, token_in, amount_in, from, router)?;
                self.swap_hop(second, self.native, native_out, router, recipient)
            }
            _ => Err(AnyStakeError::UnknownPair(format!("{} / {}", token_in, token_out))),
        }
    }

    fn quote_exact_in(
        &self,
        token_in: Address,
        amount_in: Amount,
        token_out: Address,
    ) -> Result<Amount, AnyStakeError> {
        let mut token = token_in;
        let mut amount = amount_in;
        for pair in self.route(token_in, token_out)? {
            let other = pair.other(token)?;
            if amount > 0 {
                amount = amount_out(
                    amount,
                    self.bank.balance(token, pair.lp),
                    self.bank.balance(other, pair.lp),
                )?;
            }
            token = other;
        }
        Ok(amount)
    }

    fn add_liquidity(
        &mut self,
        token: Address,
        token_amount: Amount,
        native_amount: Amount,
        from: Address,
        recipient: Address,
        deadline: Block,
    ) -> Result<Amount, AnyStakeError> {
        if deadline < self.block {
            return Err(AnyStakeError::InvalidState(format!(
                "liquidity deadline {} passed at block {}",
                deadline, self.block
            )));
        }
        let pair = self
            .find_pair(token, self.native)
            .cloned()
            .ok_or_else(|| AnyStakeError::UnknownPair(format!("{} / native", token)))?;
        self.deposit_pair(&pair, token, token_amount, native_amount, from, recipient)
    }
}

impl LoyaltyRegistry for InMemoryMarket {
    fn mint_stipend(&mut self, user: Address, amount: Amount) -> Result<(), AnyStakeError> {
        let points = self
            .points_token
            .ok_or_else(|| AnyStakeError::NotInitialized("points token".to_string()))?;
        self.bank.mint(points, user, amount)?;
        self.stipends_minted += 1;
        Ok(())
    }

    fn override_fee_exemption(&mut self, account: Address, discount_bps: u32) -> Result<(), AnyStakeError> {
        self.bank.set_fee_discount(account, discount_bps);
        Ok(())
    }

    fn burn_from_pair(&mut self, pair: Address, amount: Amount) -> Result<Amount, AnyStakeError> {
        let points = self
            .points_token
            .ok_or_else(|| AnyStakeError::NotInitialized("points token".to_string()))?;
        if !self.pair(pair)?.contains(points) {
            return Err(AnyStakeError::UnknownPair(format!("{} has no points side", pair)));
        }
        // Never drain a side completely.
        let reserve = self.bank.balance(points, pair);
        let burned = amount.min(reserve.saturating_sub(1));
        if burned > 0 {
            self.bank.burn(points, pair, burned)?;
            tracing::debug!(%pair, burned, "points burned from pair");
        }
        Ok(burned)
    }
}

impl GovernanceRegistry for InMemoryMarket {
    fn set_actor_level(&mut self, account: Address, level: u8) -> Result<(), AnyStakeError> {
        self.actor_levels.insert(account, level);
        Ok(())
    }

    fn set_fee_destination(&mut self, account: Address) -> Result<(), AnyStakeError> {
        self.bank.set_fee_destination(account);
        Ok(())
    }
}
