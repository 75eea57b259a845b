// crates/anystake-sim/src/units.rs
//
// Decimal strings <-> raw token units. Scenario files write amounts in
// whole tokens ("12.5") and the runtime converts them with the token's
// declared decimals.

use anystake_core::math::pow10;
use anystake_core::Amount;

use crate::error::SimError;

/// Parse a non-negative decimal string into raw units of a token with
/// `decimals` decimals. Fractions finer than one raw unit are rejected.
pub fn parse_units(text: &str, decimals: u8) -> Result<Amount, SimError> {
    let text = text.trim();
    let (whole, frac) = text.split_once('.').unwrap_or((text, ""));
    let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !digits_only(whole) || !digits_only(frac) {
        return Err(SimError::Config(format!("'{}' is not a decimal amount", text)));
    }
    if frac.len() > decimals as usize {
        return Err(SimError::Config(format!(
            "'{}' has more than {} decimals",
            text, decimals
        )));
    }

    let overflow = || SimError::Config(format!("'{}' does not fit in a token amount", text));
    let whole_units: Amount = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let frac_units: Amount = if frac.is_empty() {
        0
    } else {
        let raw: Amount = frac.parse().map_err(|_| overflow())?;
        raw.checked_mul(pow10(decimals - frac.len() as u8)?)
            .ok_or_else(overflow)?
    };

    whole_units
        .checked_mul(pow10(decimals)?)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or_else(overflow)
}

/// Render raw units as a decimal string, trailing zeros trimmed.
pub fn format_units(amount: Amount, decimals: u8) -> String {
    let scale = match pow10(decimals) {
        Ok(scale) if decimals > 0 => scale,
        _ => return amount.to_string(),
    };
    let whole = amount / scale;
    let frac = amount % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anystake_core::WAD;

    #[test]
    fn test_parse_whole_and_fraction() {
        assert_eq!(parse_units("1", 18).unwrap(), WAD);
        assert_eq!(parse_units("12.5", 6).unwrap(), 12_500_000);
        assert_eq!(parse_units(".25", 2).unwrap(), 25);
        assert_eq!(parse_units("0", 18).unwrap(), 0);
        assert_eq!(parse_units(" 7 ", 0).unwrap(), 7);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_units("", 18).is_err());
        assert!(parse_units(".", 18).is_err());
        assert!(parse_units("-1", 18).is_err());
        assert!(parse_units("1e18", 18).is_err());
        assert!(parse_units("0.1234567", 6).is_err());
    }

    #[test]
    fn test_parse_overflow() {
        assert!(parse_units("1000000000000000000000", 18).is_err());
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(WAD, 18), "1");
        assert_eq!(format_units(12_500_000, 6), "12.5");
        assert_eq!(format_units(1, 18), "0.000000000000000001");
        assert_eq!(format_units(42, 0), "42");
    }
}
