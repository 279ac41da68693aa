//! Shared webhook secret check.

use crate::error::GatewayError;
use secrecy::{ExposeSecret, SecretString};

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check the secret presented with a provider push.
///
/// With no secret configured every push is accepted.
pub fn verify_webhook_secret(
    expected: Option<&SecretString>,
    presented: Option<&str>,
) -> Result<(), GatewayError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    match presented {
        Some(presented)
            if constant_time_eq(expected.expose_secret().as_bytes(), presented.as_bytes()) =>
        {
            Ok(())
        }
        Some(_) => Err(GatewayError::Unauthorized("webhook secret mismatch".into())),
        None => Err(GatewayError::Unauthorized("webhook secret missing".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_secret_configured() {
        assert!(verify_webhook_secret(None, None).is_ok());
        assert!(verify_webhook_secret(None, Some("anything")).is_ok());
    }

    #[test]
    fn test_secret_must_match_exactly() {
        let secret = SecretString::new("s3cret".into());

        assert!(verify_webhook_secret(Some(&secret), Some("s3cret")).is_ok());
        assert!(verify_webhook_secret(Some(&secret), Some("S3CRET")).is_err());
        assert!(verify_webhook_secret(Some(&secret), Some("s3cret ")).is_err());
        assert!(verify_webhook_secret(Some(&secret), Some("")).is_err());
        assert!(matches!(
            verify_webhook_secret(Some(&secret), None),
            Err(GatewayError::Unauthorized(_))
        ));
    }
}
