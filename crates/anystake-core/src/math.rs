// crates/anystake-core/src/math.rs
//
// Fixed-point helpers.
//
// All token amounts are raw integer units (`Amount = u128`). Reward
// accumulators, prices and normalized amounts use a 1e18 ("WAD") scale.
// Products that may exceed 128 bits go through a 256-bit intermediate.
// Every helper fails closed: overflow and underflow are errors, never wraps.

use ethnum::U256;

use crate::error::AnyStakeError;

/// Raw token units.
pub type Amount = u128;

/// 1e18 fixed-point scale.
pub const WAD: Amount = 1_000_000_000_000_000_000;

/// Basis-point denominator (fees).
pub const BPS_DENOMINATOR: Amount = 10_000;

/// Per-mille denominator (distribution, buyback and penalty rates).
pub const PER_MILLE: Amount = 1_000;

/// Decimals of a WAD-normalized amount.
pub const WAD_DECIMALS: u8 = 18;

/// Compute `a * b / denominator` with a 256-bit intermediate, rounding down.
///
/// `what` names the computation in the error message.
pub fn mul_div(a: Amount, b: Amount, denominator: Amount, what: &str) -> Result<Amount, AnyStakeError> {
    if denominator == 0 {
        return Err(AnyStakeError::ArithmeticOverflow(format!(
            "{}: division by zero",
            what
        )));
    }
    let product = U256::from(a) * U256::from(b);
    let quotient = product / U256::from(denominator);
    if quotient > U256::from(u128::MAX) {
        return Err(AnyStakeError::ArithmeticOverflow(what.to_string()));
    }
    Ok(quotient.as_u128())
}

pub fn checked_add(a: Amount, b: Amount, what: &str) -> Result<Amount, AnyStakeError> {
    a.checked_add(b)
        .ok_or_else(|| AnyStakeError::ArithmeticOverflow(what.to_string()))
}

pub fn checked_sub(a: Amount, b: Amount, what: &str) -> Result<Amount, AnyStakeError> {
    a.checked_sub(b)
        .ok_or_else(|| AnyStakeError::ArithmeticUnderflow(what.to_string()))
}

/// Apply a basis-point rate: `amount * rate / 10_000`.
pub fn apply_bps(amount: Amount, rate_bps: u32) -> Result<Amount, AnyStakeError> {
    mul_div(amount, rate_bps as Amount, BPS_DENOMINATOR, "basis-point fee")
}

/// Apply a per-mille rate: `amount * rate / 1_000`.
pub fn apply_per_mille(amount: Amount, rate: u32) -> Result<Amount, AnyStakeError> {
    mul_div(amount, rate as Amount, PER_MILLE, "per-mille share")
}

/// `10^exp` as an Amount.
pub fn pow10(exp: u8) -> Result<Amount, AnyStakeError> {
    (10 as Amount)
        .checked_pow(exp as u32)
        .ok_or_else(|| AnyStakeError::ArithmeticOverflow(format!("10^{}", exp)))
}

/// Rescale a raw amount of a token with `decimals` decimals to 18 decimals.
///
/// Used wherever amounts of different tokens are compared against a
/// WAD-denominated threshold (VIP thresholds, peg checks).
pub fn normalize_to_wad(amount: Amount, decimals: u8) -> Result<Amount, AnyStakeError> {
    if decimals == WAD_DECIMALS {
        Ok(amount)
    } else if decimals < WAD_DECIMALS {
        let factor = pow10(WAD_DECIMALS - decimals)?;
        amount
            .checked_mul(factor)
            .ok_or_else(|| AnyStakeError::ArithmeticOverflow("decimal normalization".to_string()))
    } else {
        Ok(amount / pow10(decimals - WAD_DECIMALS)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_basic() {
        assert_eq!(mul_div(10, 20, 4, "t").unwrap(), 50);
        assert_eq!(mul_div(7, 1, 2, "t").unwrap(), 3); // rounds down
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // (1e30 * 1e30) / 1e30 overflows u128 in the product but not the result.
        let big = 1_000_000_000_000_000_000_000_000_000_000u128;
        assert_eq!(mul_div(big, big, big, "t").unwrap(), big);
    }

    #[test]
    fn test_mul_div_result_overflow() {
        let err = mul_div(u128::MAX, 2, 1, "acc").unwrap_err();
        assert!(matches!(err, AnyStakeError::ArithmeticOverflow(_)));
    }

    #[test]
    fn test_mul_div_zero_denominator() {
        assert!(mul_div(1, 1, 0, "t").is_err());
    }

    #[test]
    fn test_checked_sub_underflow() {
        let err = checked_sub(1, 2, "stake").unwrap_err();
        assert_eq!(err, AnyStakeError::ArithmeticUnderflow("stake".to_string()));
        assert_eq!(checked_sub(5, 2, "stake").unwrap(), 3);
    }

    #[test]
    fn test_checked_add_overflow() {
        assert!(checked_add(u128::MAX, 1, "x").is_err());
    }

    #[test]
    fn test_rates() {
        assert_eq!(apply_bps(10_000, 25).unwrap(), 25);
        assert_eq!(apply_per_mille(1_000, 700).unwrap(), 700);
        assert_eq!(apply_per_mille(300, 300).unwrap(), 90);
    }

    #[test]
    fn test_normalize_to_wad() {
        // 1 USDC (6 decimals) -> 1e18
        assert_eq!(normalize_to_wad(1_000_000, 6).unwrap(), WAD);
        // 1 WBTC (8 decimals) -> 1e18
        assert_eq!(normalize_to_wad(100_000_000, 8).unwrap(), WAD);
        assert_eq!(normalize_to_wad(WAD, 18).unwrap(), WAD);
        // 24 decimals scale down
        assert_eq!(normalize_to_wad(WAD * 1_000_000, 24).unwrap(), WAD);
    }
}
