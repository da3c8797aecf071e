//! Session gatekeeper: issues, revokes and authorizes bearer tokens, and runs
//! the password-reset token lifecycle.
//!
//! A token is valid while it is correctly signed, unexpired and not revoked.
//! Revoked, expired and consumed are terminal. Validity is never cached; every
//! authorization goes to the revocation store.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, warn};

use super::{
    password,
    revocation::RevocationStore,
    token::{Claims, IssuedToken, TokenError, TokenIssuer, TokenPurpose},
};
use crate::{
    error::{Error, Result},
    kv::KvStore,
    storage::Store,
};

const SESSION_TTL_DAYS: i64 = 7;
const PASSWORD_RESET_TTL_HOURS: i64 = 24;

#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    session_ttl: TimeDelta,
    password_reset_ttl: TimeDelta,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: TimeDelta::days(SESSION_TTL_DAYS),
            password_reset_ttl: TimeDelta::hours(PASSWORD_RESET_TTL_HOURS),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: TimeDelta) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_password_reset_ttl(mut self, ttl: TimeDelta) -> Self {
        self.password_reset_ttl = ttl;
        self
    }

    #[must_use]
    pub fn session_ttl(&self) -> TimeDelta {
        self.session_ttl
    }

    #[must_use]
    pub fn password_reset_ttl(&self) -> TimeDelta {
        self.password_reset_ttl
    }
}

/// Identity resolved from an authorized request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// Token from an `Authorization: Bearer <token>` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Time left until `expires_at`, or `None` if already past.
fn remaining(expires_at: DateTime<Utc>) -> Option<Duration> {
    (expires_at - Utc::now())
        .to_std()
        .ok()
        .filter(|left| !left.is_zero())
}

#[derive(Clone, Debug)]
pub struct SessionManager {
    issuer: TokenIssuer,
    revocations: RevocationStore,
    config: SessionConfig,
}

impl SessionManager {
    #[must_use]
    pub fn new(secret: &SecretString, kv: Arc<dyn KvStore>) -> Self {
        Self {
            issuer: TokenIssuer::new(secret),
            revocations: RevocationStore::new(kv),
            config: SessionConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn revocations(&self) -> &RevocationStore {
        &self.revocations
    }

    /// Sign a session token for `user_id`. Nothing is written to the store.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if signing fails.
    pub fn issue_session_token(&self, user_id: i64) -> Result<IssuedToken> {
        self.issuer
            .issue(user_id, None, self.config.session_ttl)
            .map_err(|err| Error::Internal(err.to_string()))
    }

    /// Blacklist `token` for the rest of its lifetime (at most the session
    /// TTL). Revoking twice is harmless; revoking an expired token does nothing.
    ///
    /// # Errors
    /// [`Error::Unauthorized`] for a token that does not verify,
    /// [`Error::RevocationStore`] if the blacklist entry cannot be written.
    pub async fn revoke_session_token(&self, token: &str) -> Result<()> {
        let claims = match self.issuer.verify(token) {
            Ok(claims) => claims,
            Err(TokenError::Expired) => return Ok(()),
            Err(err) => {
                debug!("refusing to revoke token: {err}");
                return Err(Error::Unauthorized);
            }
        };
        let Some(left) = remaining(claims.expires_at()) else {
            return Ok(());
        };
        let cap = self
            .config
            .session_ttl
            .to_std()
            .unwrap_or(Duration::from_secs(0));
        let ttl = if cap.is_zero() { left } else { left.min(cap) };
        self.revocations.revoke(token, ttl).await?;
        Ok(())
    }

    /// Authorize a request from its headers.
    ///
    /// # Errors
    /// [`Error::Unauthorized`] for any token problem, [`Error::RevocationStore`]
    /// if the blacklist cannot be consulted.
    pub async fn authorize(&self, headers: &HeaderMap) -> Result<Principal> {
        let token = bearer_token(headers).ok_or(Error::Unauthorized)?;
        self.authorize_token(token).await
    }

    /// # Errors
    /// Same as [`authorize`](Self::authorize).
    pub async fn authorize_token(&self, token: &str) -> Result<Principal> {
        let claims = self.issuer.verify(token).map_err(|err| {
            debug!("rejected bearer token: {err}");
            Error::Unauthorized
        })?;
        if claims.purpose.is_some() {
            debug!("rejected purpose-tagged token as session token");
            return Err(Error::Unauthorized);
        }
        let user_id = claims.user_id().map_err(|_| Error::Unauthorized)?;

        if self.revocations.is_revoked(token).await? {
            debug!(user_id, "rejected revoked token");
            return Err(Error::Unauthorized);
        }

        Ok(Principal {
            user_id,
            expires_at: claims.expires_at(),
        })
    }

    /// Sign a single-use reset token for `user_id` and make it redeemable.
    ///
    /// # Errors
    /// [`Error::Internal`] if signing fails, [`Error::RevocationStore`] if the
    /// presence entry cannot be written.
    pub async fn issue_password_reset_token(&self, user_id: i64) -> Result<IssuedToken> {
        let issued = self
            .issuer
            .issue(
                user_id,
                Some(TokenPurpose::PasswordReset),
                self.config.password_reset_ttl,
            )
            .map_err(|err| Error::Internal(err.to_string()))?;
        let ttl = remaining(issued.expires_at).unwrap_or(Duration::from_secs(1));
        self.revocations.grant(&issued.token, ttl).await?;
        Ok(issued)
    }

    fn reset_claims(&self, token: &str) -> Result<(Claims, i64)> {
        let claims = self.issuer.verify(token).map_err(|err| {
            debug!("rejected reset token: {err}");
            Error::InvalidOrExpired
        })?;
        if !claims.has_purpose(TokenPurpose::PasswordReset) {
            debug!("rejected reset token without reset purpose");
            return Err(Error::InvalidOrExpired);
        }
        let user_id = claims.user_id().map_err(|_| Error::InvalidOrExpired)?;
        Ok((claims, user_id))
    }

    /// Set a new password using a reset token. Succeeds at most once per token.
    /// Returns the id of the user whose password changed.
    ///
    /// # Errors
    /// [`Error::InvalidOrExpired`] for any token problem (including reuse),
    /// [`Error::Validation`] for a weak password, [`Error::RevocationStore`] or
    /// [`Error::Storage`] on collaborator failure.
    pub async fn redeem_password_reset_token(
        &self,
        token: &str,
        new_password: SecretString,
        store: &dyn Store,
    ) -> Result<i64> {
        let (claims, user_id) = self.reset_claims(token)?;
        password::check_strength(new_password.expose_secret())?;

        if !self.revocations.is_redeemable(token).await? {
            debug!(user_id, "reset token already used or unknown");
            return Err(Error::InvalidOrExpired);
        }

        let password_hash = password::hash_password(new_password).await?;

        // Only the caller that removes the presence entry may proceed.
        if !self.revocations.consume(token).await? {
            debug!(user_id, "reset token consumed concurrently");
            return Err(Error::InvalidOrExpired);
        }

        match store.set_password_hash(user_id, &password_hash).await {
            Ok(true) => Ok(user_id),
            Ok(false) => {
                warn!(user_id, "reset token for unknown user");
                Err(Error::InvalidOrExpired)
            }
            Err(err) => {
                if let Some(left) = remaining(claims.expires_at())
                    && let Err(restore_err) = self.revocations.restore(token, left).await
                {
                    error!(user_id, "failed to restore reset token: {restore_err}");
                }
                Err(err.into())
            }
        }
    }
}
