//! Balance amounts as reported by aggregators.
//!
//! Aggregators send balances either as JSON numbers (`1234.5`) or as decimal
//! strings (`"1234.50"`). Both are stored as integer minor units.

use serde_json::Value;

/// Parses a decimal string into minor units.
///
/// Accepts `.` or `,` as decimal separator and an optional leading `+`/`-`.
/// Returns `None` on empty input, garbage, more than 2 fractional digits or
/// overflow.
pub fn parse_minor_units(s: &str) -> Option<i64> {
    let trimmed = s.trim();
    let (negative, rest) = if let Some(stripped) = trimmed.strip_prefix('-') {
        (true, stripped)
    } else if let Some(stripped) = trimmed.strip_prefix('+') {
        (false, stripped)
    } else {
        (false, trimmed)
    };

    let rest = rest.trim().replace(',', ".");
    let mut parts = rest.split('.');
    let units_str = parts.next()?;
    let frac_str = parts.next();
    if parts.next().is_some() {
        return None;
    }

    if units_str.is_empty() || !units_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let units: i64 = units_str.parse().ok()?;

    let frac: i64 = match frac_str {
        None | Some("") => 0,
        Some(frac) if !frac.chars().all(|c| c.is_ascii_digit()) => return None,
        Some(frac) if frac.len() == 1 => frac.parse::<i64>().ok()? * 10,
        Some(frac) if frac.len() == 2 => frac.parse().ok()?,
        Some(_) => return None,
    };

    let total = units.checked_mul(100)?.checked_add(frac)?;
    if negative { total.checked_neg() } else { Some(total) }
}

/// Reads a JSON number or decimal string as minor units.
pub fn minor_units(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => parse_minor_units(s),
        Value::Number(n) => {
            if let Some(units) = n.as_i64() {
                return units.checked_mul(100);
            }
            let float = n.as_f64()?;
            if !float.is_finite() {
                return None;
            }
            parse_minor_units(&format!("{float:.2}"))
        }
        _ => None,
    }
}
