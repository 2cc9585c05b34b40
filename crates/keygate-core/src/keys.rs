//! Secret key generation and validation

use crate::error::KeygateError;
use uuid::Uuid;

/// Longest key accepted from an operator
pub const MAX_KEY_LEN: usize = 255;

/// Route prefix the server mounts downloads under
pub const DOWNLOAD_ROUTE: &str = "/special-download";

/// Generate a random 32-character lowercase hex key
pub fn generate_secret_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Reject keys that cannot live in a single URL path segment
pub fn validate_secret_key(key: &str) -> Result<(), KeygateError> {
    if key.is_empty() {
        return Err(KeygateError::InvalidInput(
            "secret key must not be empty".to_string(),
        ));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(KeygateError::InvalidInput(format!(
            "secret key is longer than {} characters",
            MAX_KEY_LEN
        )));
    }
    if let Some(c) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~')))
    {
        return Err(KeygateError::InvalidInput(format!(
            "secret key contains invalid character {:?}",
            c
        )));
    }
    Ok(())
}

/// Public URL for a key, e.g. `https://example.org/special-download/<key>`
pub fn download_url(base_url: &str, key: &str) -> String {
    format!(
        "{}{}/{}",
        base_url.trim_end_matches('/'),
        DOWNLOAD_ROUTE,
        urlencoding::encode(key)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_hex_and_unique() {
        let a = generate_secret_key();
        let b = generate_secret_key();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
        assert!(validate_secret_key(&a).is_ok());
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(validate_secret_key("").is_err());
        assert!(validate_secret_key("has/slash").is_err());
        assert!(validate_secret_key("with space").is_err());
        assert!(validate_secret_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(validate_secret_key("your_forum_secret_123").is_ok());
        assert!(validate_secret_key("a.b-c~d").is_ok());
    }

    #[test]
    fn builds_download_url() {
        assert_eq!(
            download_url("https://example.org/", "abc123"),
            "https://example.org/special-download/abc123"
        );
        assert_eq!(
            download_url("http://localhost:8087", "k"),
            "http://localhost:8087/special-download/k"
        );
    }
}
