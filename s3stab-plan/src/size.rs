use crate::error::{PlanError, Result};

/// Multiplier for the `kb` family of suffixes.
pub const KB: u64 = 1024;
/// Multiplier for the `kib` family of suffixes.
pub const KIB: u64 = 1024;

/// Suffixes in matching order. Longer suffixes sharing a tail with shorter ones come first.
const UNITS: &[(&str, u64)] = &[
    ("tib", KIB * KIB * KIB * KIB),
    ("tb", KB * KB * KB * KB),
    ("gib", KIB * KIB * KIB),
    ("gb", KB * KB * KB),
    ("mib", KIB * KIB),
    ("mb", KB * KB),
    ("kib", KIB),
    ("kb", KB),
    ("bytes", 1),
    ("byte", 1),
];

/// A half-open byte range `[start, end)`.
///
/// Fixed sizes are represented as `start..start + 1`, so that drawing a random value from the
/// range always yields the fixed size.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ByteRange {
    /// Inclusive lower bound.
    pub start: u64,
    /// Exclusive upper bound.
    pub end: u64,
}

impl ByteRange {
    /// Creates a range holding exactly one size.
    pub fn fixed(size: u64) -> Self {
        Self {
            start: size,
            end: size.saturating_add(1),
        }
    }

    /// Returns `true` if no value can be drawn from this range.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Converts a human-readable size such as `"10MB"` or `"5 GiB"` to a number of bytes.
///
/// Matching is case-insensitive and accepts `byte(s)`, `kb`, `kib`, `mb`, `mib`, `gb`, `gib`,
/// `tb` and `tib`. A bare number is interpreted as bytes.
pub fn convert_to_bytes(size: &str) -> Result<u64> {
    let normalized = size.trim().to_ascii_lowercase();
    let invalid = || PlanError::InvalidSize(size.to_owned());

    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, multiplier)| {
            normalized
                .strip_suffix(suffix)
                .map(|number| (number, *multiplier))
        })
        .unwrap_or((normalized.as_str(), 1));

    let value: u64 = number.trim().parse().map_err(|_| invalid())?;
    let bytes = value.checked_mul(multiplier).ok_or_else(invalid)?;

    tracing::trace!(size, bytes, "converted size");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_every_suffix() {
        assert_eq!(convert_to_bytes("7byte").unwrap(), 7);
        assert_eq!(convert_to_bytes("7bytes").unwrap(), 7);
        assert_eq!(convert_to_bytes("5KB").unwrap(), 5 * 1024);
        assert_eq!(convert_to_bytes("5kib").unwrap(), 5 * 1024);
        assert_eq!(convert_to_bytes("3MB").unwrap(), 3 * 1024 * 1024);
        assert_eq!(convert_to_bytes("3MiB").unwrap(), 3 * 1024 * 1024);
        assert_eq!(convert_to_bytes("2GB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(convert_to_bytes("2GiB").unwrap(), 2 << 30);
        assert_eq!(convert_to_bytes("1TB").unwrap(), 1 << 40);
        assert_eq!(convert_to_bytes("1tib").unwrap(), 1 << 40);
    }

    #[test]
    fn bare_numbers_are_bytes() {
        assert_eq!(convert_to_bytes("4096").unwrap(), 4096);
        assert_eq!(convert_to_bytes(" 12 MiB ").unwrap(), 12 << 20);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            convert_to_bytes("lots"),
            Err(PlanError::InvalidSize(s)) if s == "lots"
        ));
        assert!(convert_to_bytes("MB").is_err());
        assert!(convert_to_bytes("-1KB").is_err());
        assert!(convert_to_bytes("99999999999TiB").is_err());
    }

    #[test]
    fn fixed_range_holds_one_value() {
        let range = ByteRange::fixed(10);
        assert_eq!(range, ByteRange { start: 10, end: 11 });
        assert!(!range.is_empty());
        assert!(ByteRange { start: 0, end: 0 }.is_empty());
    }
}
