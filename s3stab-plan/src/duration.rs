use std::time::Duration;

use crate::error::{PlanError, Result};

const UNITS: &[(char, u64)] = &[('d', 24 * 60 * 60), ('h', 60 * 60), ('m', 60), ('s', 1)];

/// Converts a runtime expression in the form `0d0h0m0s` to a [`Duration`].
///
/// Each component is optional, but present components must appear in the order days, hours,
/// minutes, seconds. The input is split sequentially on each unit character, so `"1d2h3m4s"`,
/// `"90m"` and `"2h30s"` are all accepted.
pub fn convert_to_duration(time: &str) -> Result<Duration> {
    let normalized = time.trim().to_ascii_lowercase();
    let invalid = || PlanError::InvalidDuration(time.to_owned());

    let mut rest = normalized.as_str();
    let mut seconds = 0u64;
    for (unit, multiplier) in UNITS {
        let Some((value, tail)) = rest.split_once(*unit) else {
            continue;
        };
        let value: u64 = value.trim().parse().map_err(|_| invalid())?;
        seconds = value
            .checked_mul(*multiplier)
            .and_then(|s| seconds.checked_add(s))
            .ok_or_else(invalid)?;
        rest = tail;
    }

    if !rest.trim().is_empty() {
        return Err(invalid());
    }

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_expression() {
        let expected = 24 * 3600 + 2 * 3600 + 3 * 60 + 4;
        assert_eq!(
            convert_to_duration("1d2h3m4s").unwrap(),
            Duration::from_secs(expected)
        );
    }

    #[test]
    fn partial_expressions() {
        assert_eq!(convert_to_duration("90m").unwrap(), Duration::from_secs(5400));
        assert_eq!(convert_to_duration("2H30S").unwrap(), Duration::from_secs(7230));
        assert_eq!(convert_to_duration("3d").unwrap(), Duration::from_secs(259_200));
        assert_eq!(convert_to_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_malformed() {
        assert!(convert_to_duration("h").is_err());
        assert!(convert_to_duration("10").is_err());
        assert!(convert_to_duration("1x").is_err());
        assert!(convert_to_duration("5s3m").is_err());
    }
}
