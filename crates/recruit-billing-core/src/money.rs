//! Currency helpers.
//!
//! Amounts are carried as integer cents (`i64`). Configuration and API
//! payloads may express amounts as decimal strings ("0.50"), which are
//! parsed exactly, without going through floating point.

/// Number of cents in one currency unit.
pub const CENTS_PER_UNIT: i64 = 100;

/// Errors from parsing a decimal currency amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    /// The input is empty or contains non-digit characters.
    #[error("malformed amount: {0:?}")]
    Malformed(String),

    /// More than two fractional digits.
    #[error("amount has sub-cent precision: {0:?}")]
    SubCentPrecision(String),

    /// The amount does not fit in 64-bit cents.
    #[error("amount out of range: {0:?}")]
    OutOfRange(String),
}

/// Parse a decimal amount such as `"10"`, `"0.5"`, `"0.50"` or `"-2.25"`
/// into cents.
///
/// # Errors
///
/// Returns an error for malformed input, more than two decimal places, or
/// values that overflow `i64` cents.
pub fn parse_cents(input: &str) -> Result<i64, MoneyError> {
    let trimmed = input.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('$').unwrap_or(trimmed)),
    };

    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    let well_formed = !whole.is_empty()
        && whole.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
        && !(digits.contains('.') && fraction.is_empty());
    if !well_formed {
        return Err(MoneyError::Malformed(input.to_string()));
    }
    if fraction.len() > 2 {
        return Err(MoneyError::SubCentPrecision(input.to_string()));
    }

    let out_of_range = || MoneyError::OutOfRange(input.to_string());
    let whole: i64 = whole.parse().map_err(|_| out_of_range())?;
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().map_err(|_| out_of_range())? * 10,
        _ => fraction.parse().map_err(|_| out_of_range())?,
    };

    let cents = whole
        .checked_mul(CENTS_PER_UNIT)
        .and_then(|c| c.checked_add(fraction))
        .ok_or_else(out_of_range)?;

    Ok(if negative { -cents } else { cents })
}

/// Format cents as a dollar string, e.g. `1050` -> `"$10.50"`, `-50` -> `"-$0.50"`.
#[must_use]
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let per_unit = CENTS_PER_UNIT.unsigned_abs();
    format!("{sign}${}.{:02}", abs / per_unit, abs % per_unit)
}

/// Multiply a quantity by a price in cents, rounding half away from zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn scale_cents(quantity: f64, unit_price_cents: i64) -> i64 {
    (quantity * unit_price_cents as f64).round() as i64
}

/// Like [`scale_cents`], but `None` when the product is not finite or does
/// not fit in `i64` cents.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn checked_scale_cents(quantity: f64, unit_price_cents: i64) -> Option<i64> {
    let scaled = (quantity * unit_price_cents as f64).round();
    // 2^63 is the first f64 past i64::MAX.
    (scaled.is_finite() && scaled.abs() < i64::MAX as f64).then(|| scaled as i64)
}
