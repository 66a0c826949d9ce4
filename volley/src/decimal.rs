//! Banker's rounding on the decimal representation of a float.
//!
//! Rounding happens on the shortest decimal string that round-trips to the given `f64`
//! (what a human reads when printing the value), not on its binary expansion. That makes
//! `0.125`, `2.675` or `0.00005` behave as decimal ties.

/// Default number of fractional digits kept in reported ratios and rates.
pub const DEFAULT_DIGITS: u32 = 4;

/// Rounds `value` to `digits` fractional digits, resolving exact ties to the even digit.
///
/// ```
/// use volley::decimal::round_half_even;
///
/// assert_eq!(round_half_even(0.125, 2), 0.12);
/// assert_eq!(round_half_even(0.135, 2), 0.14);
/// assert_eq!(round_half_even(0.12345, 4), 0.1234);
/// ```
pub fn round_half_even(value: f64, digits: u32) -> f64 {
    if !value.is_finite() || value == 0.0 {
        return value;
    }
    let Some((mantissa, exponent)) = decompose(value.abs()) else {
        return value;
    };

    // value = mantissa * 10^exponent, keep `digits` fractional digits
    let shift = exponent + digits as i32;
    let scaled = if shift >= 0 {
        match 10u128
            .checked_pow(shift as u32)
            .and_then(|p| mantissa.checked_mul(p))
        {
            Some(v) => v,
            // already an integer far beyond the requested precision
            None => return value,
        }
    } else {
        let drop = (-shift) as u32;
        if drop > 38 {
            0
        } else {
            let divisor = 10u128.pow(drop);
            let kept = mantissa / divisor;
            let rest = mantissa % divisor;
            let half = divisor / 2;
            if rest > half || (rest == half && kept % 2 == 1) {
                kept + 1
            } else {
                kept
            }
        }
    };

    let sign = if value.is_sign_negative() { "-" } else { "" };
    format!("{sign}{scaled}e-{digits}")
        .parse::<f64>()
        .unwrap_or(value)
}

/// Splits a positive finite float into `(mantissa, exponent)` with
/// `value == mantissa * 10^exponent`, using the shortest round-trip representation.
fn decompose(value: f64) -> Option<(u128, i32)> {
    let repr = format!("{value:e}");
    let (digits, exp) = repr.split_once('e')?;
    let exp: i32 = exp.parse().ok()?;
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let mantissa: u128 = format!("{int_part}{frac_part}").parse().ok()?;
    Some((mantissa, exp - frac_part.len() as i32))
}
