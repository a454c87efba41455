//! Fixed-precision conversion between basic units and human-readable amounts.
//!
//! Both directions go through an intermediate integer scaled by
//! `10^precision`, so large wei values never touch floating point. The
//! contract is a display contract: anything finer than `precision`
//! fractional digits is truncated toward zero and is not recovered by the
//! inverse conversion.

use alloy::primitives::U256;

use crate::error::CoreError;

fn pow10(exp: u32) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

fn check_scale(decimals: u32, precision: u32) -> Result<(), CoreError> {
    if precision > decimals {
        return Err(CoreError::InvalidParameter(format!(
            "precision {precision} exceeds token decimals {decimals}"
        )));
    }
    Ok(())
}

/// Parse a base-10 integer string of basic units (e.g. a wei amount).
pub fn parse_basic_units(value: &str) -> Result<U256, CoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::InvalidAmount(format!("not a basic-unit integer: {value:?}")));
    }
    U256::from_str_radix(trimmed, 10)
        .map_err(|e| CoreError::InvalidAmount(format!("{value:?}: {e}")))
}

/// Convert a basic-unit integer into a decimal string with at most
/// `precision` fractional digits.
///
/// ```
/// use alloy::primitives::U256;
/// use courier_core::units::to_human_readable_unit;
/// let wei = U256::from(1_234_567_000_000_000_000u128);
/// assert_eq!(to_human_readable_unit(wei, 18, 3).unwrap(), "1.234");
/// ```
pub fn to_human_readable_unit(
    value: U256,
    decimals: u32,
    precision: u32,
) -> Result<String, CoreError> {
    check_scale(decimals, precision)?;
    let scaled = value / pow10(decimals - precision);
    if precision == 0 {
        return Ok(scaled.to_string());
    }
    let precision_base = pow10(precision);
    let whole = scaled / precision_base;
    let frac = scaled % precision_base;
    let frac = format!("{:0>width$}", frac.to_string(), width = precision as usize);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        Ok(whole.to_string())
    } else {
        Ok(format!("{whole}.{frac}"))
    }
}

/// Convert a decimal amount into basic units, truncating beyond `precision`
/// fractional digits.
///
/// ```
/// use alloy::primitives::U256;
/// use courier_core::units::to_basic_token_unit;
/// let wei = to_basic_token_unit("0.5", 18, 3).unwrap();
/// assert_eq!(wei, U256::from(500_000_000_000_000_000u128));
/// ```
pub fn to_basic_token_unit(value: &str, decimals: u32, precision: u32) -> Result<U256, CoreError> {
    check_scale(decimals, precision)?;
    let trimmed = value.trim();
    let (whole, frac) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    let digits_ok = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !digits_ok(whole) || !digits_ok(frac) {
        return Err(CoreError::InvalidAmount(format!("not a decimal amount: {value:?}")));
    }

    let mut kept: String = frac.chars().take(precision as usize).collect();
    while kept.len() < precision as usize {
        kept.push('0');
    }
    let scaled_digits = format!("{whole}{kept}");
    let scaled = if scaled_digits.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(&scaled_digits, 10)
            .map_err(|e| CoreError::InvalidAmount(format!("{value:?}: {e}")))?
    };

    scaled
        .checked_mul(pow10(decimals - precision))
        .ok_or_else(|| CoreError::InvalidAmount(format!("{value:?} overflows 256 bits")))
}
