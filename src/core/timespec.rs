use lazy_static::lazy_static;
use regex::Regex;

use super::RestoreError;

lazy_static! {
    static ref TIMESPEC_REGEX: Regex = Regex::new(r"^([0-9]+(?:\.[0-9]+)?)([a-z]+)$").unwrap();
}

/// Parses an age specification like `5d` or `1.5h` into a number of
/// seconds. Fractional amounts are truncated to whole seconds.
///
/// Note that `m` means month (31 days), not minute; minutes must be
/// spelled out.
pub fn parse_timespec(value: impl AsRef<str>) -> Result<i64, RestoreError> {
    let value = value.as_ref();
    let captures = TIMESPEC_REGEX
        .captures(value)
        .ok_or_else(|| RestoreError::InvalidTimespec(value.to_string()))?;
    let amount: f64 = captures[1]
        .parse()
        .map_err(|_| RestoreError::InvalidTimespec(value.to_string()))?;
    let factor = match &captures[2] {
        "s" | "second" | "seconds" => 1,
        "minute" | "minutes" => 60,
        "h" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86400,
        "m" | "month" | "months" => 2678400,
        "y" | "year" | "years" => 31536000,
        _ => return Err(RestoreError::InvalidTimespec(value.to_string())),
    };
    Ok((amount * factor as f64) as i64)
}
