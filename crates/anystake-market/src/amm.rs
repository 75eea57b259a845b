// crates/anystake-market/src/amm.rs
//
// Constant-product liquidity pairs.
//
// A pair's reserves are simply the bank balances held by the pair's own
// address (which doubles as its LP token), so fee-on-transfer tokens are
// accounted for by construction. Swaps follow x * y = k with a 0.3% fee.

use serde::{Deserialize, Serialize};

use anystake_core::math::{checked_add, mul_div, normalize_to_wad, PER_MILLE, WAD};
use anystake_core::{Address, AnyStakeError, Amount};

/// Swap fee retained by liquidity providers, per mille of the input.
pub const SWAP_FEE_PER_MILLE: Amount = 3;

/// A registered pair. `lp` is both the pair's account and its LP token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub lp: Address,
    pub token0: Address,
    pub token1: Address,
}

impl Pair {
    pub fn new(lp: Address, token0: Address, token1: Address) -> Self {
        Self { lp, token0, token1 }
    }

    pub fn contains(&self, token: Address) -> bool {
        self.token0 == token || self.token1 == token
    }

    /// The token on the other side of `token`.
    pub fn other(&self, token: Address) -> Result<Address, AnyStakeError> {
        if token == self.token0 {
            Ok(self.token1)
        } else if token == self.token1 {
            Ok(self.token0)
        } else {
            Err(AnyStakeError::UnknownPair(format!(
                "{} is not a side of pair {}",
                token, self.lp
            )))
        }
    }
}

/// Output of a constant-product swap after the LP fee.
pub fn amount_out(amount_in: Amount, reserve_in: Amount, reserve_out: Amount) -> Result<Amount, AnyStakeError> {
    if reserve_in == 0 || reserve_out == 0 {
        return Err(AnyStakeError::InvalidState(
            "swap against an empty pair".to_string(),
        ));
    }
    let in_with_fee = mul_div(amount_in, PER_MILLE - SWAP_FEE_PER_MILLE, PER_MILLE, "swap input")?;
    let denominator = checked_add(reserve_in, in_with_fee, "swap reserves")?;
    mul_div(in_with_fee, reserve_out, denominator, "swap output")
}

/// WAD-scaled price of one whole base unit in quote units.
pub fn spot_price(
    reserve_base: Amount,
    base_decimals: u8,
    reserve_quote: Amount,
    quote_decimals: u8,
) -> Result<Amount, AnyStakeError> {
    let base = normalize_to_wad(reserve_base, base_decimals)?;
    let quote = normalize_to_wad(reserve_quote, quote_decimals)?;
    if base == 0 {
        return Err(AnyStakeError::InvalidState(
            "price of an empty pair".to_string(),
        ));
    }
    mul_div(quote, WAD, base, "spot price")
}

/// LP tokens minted for a deposit into a pair with `supply` outstanding.
///
/// The first deposit mints `amount_a` LP tokens; later deposits mint in
/// proportion to the smaller of the two contributions.
pub fn lp_to_mint(
    amount_a: Amount,
    amount_b: Amount,
    reserve_a: Amount,
    reserve_b: Amount,
    supply: Amount,
) -> Result<Amount, AnyStakeError> {
    if supply == 0 || reserve_a == 0 || reserve_b == 0 {
        return Ok(amount_a);
    }
    let by_a = mul_div(amount_a, supply, reserve_a, "lp mint")?;
    let by_b = mul_div(amount_b, supply, reserve_b, "lp mint")?;
    Ok(by_a.min(by_b))
}
