//! Decimal-string helpers.
//!
//! Prices and sizes stay as the exchange's own decimal strings on every
//! emitted payload. Comparisons (zero-size detection, book ordering) and the
//! few derived ticker fields are computed with [`rust_decimal::Decimal`];
//! nothing here converts through `f64`.

use std::str::FromStr;

use rust_decimal::Decimal;

/// Decimal places kept for derived values such as `changePercent`.
const DERIVED_DP: u32 = 8;

/// Parse a decimal string. Accepts plain (`"0.001"`) and scientific
/// (`"1e-8"`) notation.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    Decimal::from_str(s)
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}

/// Returns `true` if `s` parses to zero. Unparseable input is not zero.
pub fn is_zero_size(s: &str) -> bool {
    parse_decimal(s).is_some_and(|d| d.is_zero())
}

/// Returns `true` if `s` is a finite decimal number.
pub fn is_decimal_string(s: &str) -> bool {
    parse_decimal(s).is_some()
}

/// Render a JSON number as a decimal string.
///
/// Relies on serde_json's `arbitrary_precision` feature: the number's text
/// is exactly what was on the wire. Scientific notation is expanded to
/// plain decimal.
pub fn number_to_string(n: &serde_json::Number) -> String {
    let text = n.to_string();
    if text.contains(['e', 'E']) {
        if let Ok(d) = Decimal::from_scientific(&text) {
            return format_decimal(d);
        }
    }
    text
}

/// Render a decimal without trailing zeros.
pub fn format_decimal(d: Decimal) -> String {
    d.normalize().to_string()
}

/// `last - open`, or `None` if either side does not parse.
pub fn change(last: &str, open: &str) -> Option<String> {
    let last = parse_decimal(last)?;
    let open = parse_decimal(open)?;
    Some(format_decimal(last - open))
}

/// `(last - open) / open * 100`, rounded to 8 decimal places.
///
/// Returns `None` when `open` is zero or either side does not parse.
pub fn change_percent(last: &str, open: &str) -> Option<String> {
    let last = parse_decimal(last)?;
    let open = parse_decimal(open)?;
    if open.is_zero() {
        return None;
    }
    let pct = (last - open).checked_div(open)? * Decimal::ONE_HUNDRED;
    Some(format_decimal(pct.round_dp(DERIVED_DP)))
}

/// `value * factor` for a decimal string, rounded to 8 decimal places.
pub fn scale(value: &str, factor: Decimal) -> Option<String> {
    let value = parse_decimal(value)?;
    Some(format_decimal(value.checked_mul(factor)?.round_dp(DERIVED_DP)))
}
