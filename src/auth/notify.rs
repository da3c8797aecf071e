use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// A password-reset token ready to be delivered to its owner.
#[derive(Clone, Debug)]
pub struct ResetNotice {
    pub user_id: i64,
    pub to_email: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Out-of-band delivery of reset tokens (email in production).
pub trait ResetNotifier: Send + Sync {
    /// Deliver the notice or return an error; failures are logged by the caller.
    fn send(&self, notice: &ResetNotice) -> Result<()>;
}

/// Local dev notifier that logs instead of sending email.
#[derive(Clone, Debug)]
pub struct LogResetNotifier;

impl ResetNotifier for LogResetNotifier {
    fn send(&self, notice: &ResetNotice) -> Result<()> {
        info!(
            user_id = notice.user_id,
            to_email = %notice.to_email,
            expires_at = %notice.expires_at,
            "password reset send stub"
        );
        debug!(token = %notice.token, "password reset token");
        Ok(())
    }
}
