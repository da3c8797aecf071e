//! Credential verifier: Argon2id password hashing.
//!
//! Hashing is CPU bound, so both operations run on the blocking thread pool.

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, Result};

pub const MIN_PASSWORD_LEN: usize = 8;

/// # Errors
/// Returns [`Error::Validation`] for a password shorter than [`MIN_PASSWORD_LEN`].
pub fn check_strength(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Hash `password` into a PHC string.
///
/// # Errors
/// Returns an error if hashing fails or the blocking task is cancelled.
pub async fn hash_password(password: SecretString) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| Error::Internal(format!("failed to hash password: {err}")))
    })
    .await
    .map_err(|err| Error::Internal(format!("password hashing task failed: {err}")))?
}

/// Check `password` against a stored PHC string. A malformed stored hash
/// verifies as `false`.
///
/// # Errors
/// Returns an error only if the blocking task is cancelled.
pub async fn verify_password(password: SecretString, stored_hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        let Ok(parsed) = PasswordHash::new(&stored_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .map_err(|err| Error::Internal(format!("password verification task failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_verify() -> Result<()> {
        let hash = hash_password(SecretString::from("correct horse")).await?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(SecretString::from("correct horse"), hash.clone()).await?);
        assert!(!verify_password(SecretString::from("wrong horse"), hash).await?);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_hash_does_not_verify() -> Result<()> {
        assert!(!verify_password(SecretString::from("x"), "not-a-hash".to_string()).await?);
        Ok(())
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(check_strength("1234567").is_err());
        assert!(check_strength("12345678").is_ok());
    }
}
