//! Keyspace shared by every process coordinating through the same store.
//!
//! ```text
//! global-lock
//! usage+<endpoint base>+<suffix>
//! reservation+<endpoint base>+<suffix>
//! ```

/// The single store-wide selection lock.
pub const GLOBAL_LOCK_KEY: &str = "global-lock";

const USAGE_NAMESPACE: &str = "usage";
const RESERVATION_NAMESPACE: &str = "reservation";
const SEPARATOR: char = '+';

/// Prefix matching every usage marker of one endpoint.
pub fn usage_prefix(endpoint_base: &str) -> String {
    format!("{USAGE_NAMESPACE}{SEPARATOR}{endpoint_base}{SEPARATOR}")
}

pub fn usage_key(endpoint_base: &str, suffix: &str) -> String {
    format!("{}{}", usage_prefix(endpoint_base), suffix)
}

pub fn reservation_key(endpoint_base: &str, suffix: &str) -> String {
    format!("{RESERVATION_NAMESPACE}{SEPARATOR}{endpoint_base}{SEPARATOR}{suffix}")
}

/// Fresh random suffix for one reservation.
pub fn new_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Escape glob metacharacters so a literal prefix can be used in a
/// Redis `MATCH` pattern.
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_key_layout() {
        assert_eq!(
            usage_key("https://api.com/posts", "abc"),
            "usage+https://api.com/posts+abc"
        );
        assert!(usage_key("https://api.com/posts", "abc")
            .starts_with(&usage_prefix("https://api.com/posts")));
    }

    #[test]
    fn test_reservation_key_layout() {
        assert_eq!(
            reservation_key("https://mirror1.com/posts", "abc"),
            "reservation+https://mirror1.com/posts+abc"
        );
    }

    #[test]
    fn test_usage_prefix_does_not_match_longer_base() {
        // "usage+https://a.com+" must not be a prefix of keys for "https://a.com/v2"
        let key = usage_key("https://a.com/v2", "x");
        assert!(!key.starts_with(&usage_prefix("https://a.com")));
    }

    #[test]
    fn test_suffixes_are_unique() {
        let a = new_suffix();
        let b = new_suffix();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("usage+https://a.com/?q=[1]*"), "usage+https://a.com/\\?q=\\[1\\]\\*");
        assert_eq!(escape_glob("plain"), "plain");
    }
}
