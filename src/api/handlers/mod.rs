//! Route handlers.

pub mod health;
pub mod publications;
pub mod users;

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Lightweight email sanity check used before persisting data.
pub fn valid_email(email: &str) -> bool {
    (*EMAIL).as_ref().is_some_and(|re| re.is_match(email))
}

/// Emails are compared case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_checks() {
        assert!(valid_email("ada@example.com"));
        assert!(!valid_email("ada@example"));
        assert!(!valid_email("ada example@x.org"));
        assert!(EMAIL.is_some(), "email pattern must compile");
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }
}
