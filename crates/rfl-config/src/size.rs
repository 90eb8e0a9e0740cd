//! Human byte sizes ("1000 GB", "512mb", "4096").

use crate::ConfigError;

const UNITS: &[(&str, u64)] = &[
    ("tb", 1 << 40),
    ("gb", 1 << 30),
    ("mb", 1 << 20),
    ("kb", 1 << 10),
    ("t", 1 << 40),
    ("g", 1 << 30),
    ("m", 1 << 20),
    ("k", 1 << 10),
    ("b", 1),
];

/// Parse a size with an optional binary unit suffix. Fractions are allowed
/// ("1.5 GB").
pub fn parse_byte_size(input: &str) -> Result<u64, ConfigError> {
    let normalized = input.trim().to_ascii_lowercase();
    let invalid = || ConfigError::ByteSize(input.to_string());

    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, mult)| {
            normalized
                .strip_suffix(suffix)
                .map(|rest| (rest.trim_end(), *mult))
        })
        .unwrap_or((normalized.as_str(), 1));

    if number.is_empty() {
        return Err(invalid());
    }
    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(multiplier).ok_or_else(invalid);
    }
    let value: f64 = number.parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok((value * multiplier as f64) as u64)
}
