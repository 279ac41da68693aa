//! Phone number normalization.
//!
//! Canonical numbers are `+` followed by a non-zero digit and 7 to 14 more
//! digits.

use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    #[error("empty phone number")]
    Empty,

    #[error("invalid phone number: {0}")]
    Invalid(String),
}

/// Numbers accepted and rejected by [`normalize_many`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedBatch {
    /// Canonical numbers, deduplicated, in first-seen order.
    pub accepted: Vec<String>,
    /// Raw inputs that could not be normalized.
    pub rejected: Vec<String>,
}

fn digits_of(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn validate(digits: &str, raw: &str) -> Result<String, PhoneError> {
    let valid = (8..=15).contains(&digits.len()) && !digits.starts_with('0');
    if valid {
        Ok(format!("+{}", digits))
    } else {
        Err(PhoneError::Invalid(raw.to_string()))
    }
}

/// Convert `raw` into a canonical international number.
///
/// `default_dial` is the country dial code (with or without `+`) applied to
/// numbers that do not carry one.
pub fn normalize(raw: &str, default_dial: &str) -> Result<String, PhoneError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PhoneError::Empty);
    }

    // International call prefixes
    let rewritten = if let Some(rest) = trimmed.strip_prefix("011") {
        format!("+{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("00") {
        format!("+{}", rest)
    } else {
        trimmed.to_string()
    };

    if let Some(rest) = rewritten.strip_prefix('+') {
        return validate(&digits_of(rest), raw);
    }

    let digits = digits_of(&rewritten);
    let dial = digits_of(default_dial);

    if !dial.is_empty() && digits.starts_with(&dial) {
        validate(&digits, raw)
    } else if (6..=15).contains(&digits.len()) {
        validate(&format!("{}{}", dial, digits), raw)
    } else {
        Err(PhoneError::Invalid(raw.to_string()))
    }
}

/// Normalize a list, keeping rejects instead of dropping them.
pub fn normalize_many<I, S>(inputs: I, default_dial: &str) -> NormalizedBatch
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut batch = NormalizedBatch::default();
    let mut seen = HashSet::new();

    for input in inputs {
        let input = input.as_ref();
        match normalize(input, default_dial) {
            Ok(number) => {
                if seen.insert(number.clone()) {
                    batch.accepted.push(number);
                }
            }
            Err(_) => batch.rejected.push(input.to_string()),
        }
    }

    batch
}

/// Normalize when possible, otherwise keep the trimmed input.
pub fn normalize_or_trim(raw: &str, default_dial: &str) -> String {
    normalize(raw, default_dial).unwrap_or_else(|_| raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_international_forms() {
        assert_eq!(normalize("+1 (555) 123-4567", "1").unwrap(), "+15551234567");
        assert_eq!(normalize("0044 20 7946 0958", "1").unwrap(), "+442079460958");
        assert_eq!(normalize("011 44 20 7946 0958", "1").unwrap(), "+442079460958");
        assert_eq!(normalize("  +639171234567 ", "1").unwrap(), "+639171234567");
    }

    #[test]
    fn test_default_dial_code() {
        // Already carries the dial code
        assert_eq!(normalize("15551234567", "1").unwrap(), "+15551234567");
        // Local number
        assert_eq!(normalize("555-123-4567", "1").unwrap(), "+15551234567");
        assert_eq!(normalize("9171234567", "+63").unwrap(), "+639171234567");
        assert_eq!(normalize("639171234567", "+63").unwrap(), "+639171234567");
    }

    #[test]
    fn test_rejects() {
        assert_eq!(normalize("", "1"), Err(PhoneError::Empty));
        assert_eq!(normalize("   ", "1"), Err(PhoneError::Empty));
        // Too short
        assert!(normalize("12345", "44").is_err());
        assert!(normalize("+1234567", "1").is_err());
        // Too long
        assert!(normalize("+1234567890123456", "1").is_err());
        // Leading zero after the sign
        assert!(normalize("+05551234567", "1").is_err());
        assert!(normalize("hello", "1").is_err());
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "+1 (555) 123-4567",
            "0044 20 7946 0958",
            "011 81 3 1234 5678",
            "555-123-4567",
            "15551234567",
            "9171234567",
            "+49 30 901820",
            "123456",
        ];

        for dial in ["1", "+44", "63"] {
            for input in inputs {
                if let Ok(canonical) = normalize(input, dial) {
                    assert_eq!(
                        normalize(&canonical, dial).as_deref(),
                        Ok(canonical.as_str()),
                        "input {input:?} with dial {dial}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_normalize_many() {
        let batch = normalize_many(
            ["555-123-4567", "bogus", "+15551234567", "+15550000002", ""],
            "1",
        );

        assert_eq!(batch.accepted, vec!["+15551234567", "+15550000002"]);
        assert_eq!(batch.rejected, vec!["bogus", ""]);
    }

    #[test]
    fn test_normalize_or_trim() {
        assert_eq!(normalize_or_trim(" 555-123-4567 ", "1"), "+15551234567");
        assert_eq!(normalize_or_trim(" SHORTCODE ", "1"), "SHORTCODE");
    }
}
