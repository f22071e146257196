use crate::config::Interval;
use crate::error::UplinkError;

const MS_PER_SECOND: f64 = 1_000.0;
const MS_PER_MINUTE: f64 = 60.0 * MS_PER_SECOND;
const MS_PER_HOUR: f64 = 60.0 * MS_PER_MINUTE;
const MS_PER_DAY: f64 = 24.0 * MS_PER_HOUR;
const MS_PER_WEEK: f64 = 7.0 * MS_PER_DAY;
const MS_PER_MONTH: f64 = 30.0 * MS_PER_DAY;
const MS_PER_YEAR: f64 = 365.0 * MS_PER_DAY;

/// Parses a duration literal into milliseconds.
///
/// Bare numbers are taken as milliseconds. String forms accept
/// `<number><unit>` terms with units `ms s m h d w M y` (`m` is a minute,
/// `M` a 30-day month); whitespace-separated terms are summed, so
/// `"1m 30s"` is 90000.
pub fn parse_interval(value: &Interval) -> Result<u64, UplinkError> {
    match value {
        Interval::Millis(n) => Ok(*n),
        Interval::Literal(raw) => parse_literal(raw),
    }
}

fn parse_literal(raw: &str) -> Result<u64, UplinkError> {
    let bad = || UplinkError::BadInterval {
        raw: raw.to_string(),
    };

    let mut total = 0.0f64;
    let mut terms = 0usize;
    for term in raw.split_whitespace() {
        total += parse_term(term).ok_or_else(bad)?;
        terms += 1;
    }
    if terms == 0 {
        return Err(bad());
    }
    if !total.is_finite() || total < 0.0 {
        return Err(bad());
    }
    Ok(total.round() as u64)
}

fn parse_term(term: &str) -> Option<f64> {
    if let Ok(ms) = term.parse::<f64>() {
        return Some(ms);
    }

    let split = term
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '-'))
        .map(|(i, _)| i)?;
    let (number, unit) = term.split_at(split);
    let number = number.parse::<f64>().ok()?;
    if number < 0.0 {
        return None;
    }

    // Units are case-sensitive: `m` is minutes, `M` months.
    let multiplier = match unit {
        "ms" => 1.0,
        "s" => MS_PER_SECOND,
        "m" => MS_PER_MINUTE,
        "h" => MS_PER_HOUR,
        "d" => MS_PER_DAY,
        "w" => MS_PER_WEEK,
        "M" => MS_PER_MONTH,
        "y" => MS_PER_YEAR,
        _ => return None,
    };
    Some(number * multiplier)
}
