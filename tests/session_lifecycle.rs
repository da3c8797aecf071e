//! Session tokens, logout revocation and single-use password reset against
//! the in-process key-value and relational stores.

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use chrono::TimeDelta;
use freescholar::{
    Error,
    auth::{SessionConfig, SessionManager, password},
    kv::{KvStore, MemoryKv},
    storage::{
        MemoryStore, NewUser, ProfileUpdate, Publication, PublicationFilter, PublicationPage,
        Store, StoreError, User, UserCredentials, WriteTx,
    },
};
use secrecy::SecretString;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

const SECRET: &str = "integration-secret";

/// Delegates to [`MemoryStore`] but can fail password updates on demand.
struct FlakyStore {
    inner: MemoryStore,
    fail_password_update: AtomicBool,
}

#[async_trait]
impl Store for FlakyStore {
    async fn begin(&self) -> Result<Box<dyn WriteTx>, StoreError> {
        self.inner.begin().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn fetch_publication(&self, id: i64) -> Result<Option<Publication>, StoreError> {
        self.inner.fetch_publication(id).await
    }

    async fn list_publications(
        &self,
        filter: &PublicationFilter,
    ) -> Result<PublicationPage, StoreError> {
        self.inner.list_publications(filter).await
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError> {
        self.inner.create_user(user).await
    }

    async fn fetch_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        self.inner.fetch_user(id).await
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>, StoreError> {
        self.inner.find_credentials(email).await
    }

    async fn record_login(&self, id: i64) -> Result<(), StoreError> {
        self.inner.record_login(id).await
    }

    async fn update_profile(
        &self,
        id: i64,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, StoreError> {
        self.inner.update_profile(id, update).await
    }

    async fn set_password_hash(&self, id: i64, password_hash: &str) -> Result<bool, StoreError> {
        if self.fail_password_update.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.set_password_hash(id, password_hash).await
    }
}

struct Harness {
    kv: Arc<MemoryKv>,
    store: FlakyStore,
    sessions: SessionManager,
    user: User,
}

impl Harness {
    async fn new() -> Result<Self> {
        let kv = Arc::new(MemoryKv::new());
        let sessions = SessionManager::new(&SecretString::from(SECRET), kv.clone());
        let store = FlakyStore {
            inner: MemoryStore::new(),
            fail_password_update: AtomicBool::new(false),
        };
        let password_hash = password::hash_password(SecretString::from("original-pass")).await?;
        let user = store
            .create_user(&NewUser {
                username: "ada".to_string(),
                email: "ada@example.com".to_string(),
                password_hash,
            })
            .await?;
        Ok(Self {
            kv,
            store,
            sessions,
            user,
        })
    }

    async fn password_hash(&self) -> Result<String> {
        Ok(self
            .store
            .find_credentials(&self.user.email)
            .await?
            .context("user vanished")?
            .password_hash)
    }
}

#[tokio::test]
async fn logout_revokes_only_that_token() -> Result<()> {
    let harness = Harness::new().await?;
    let first = harness.sessions.issue_session_token(harness.user.id)?;
    let second = harness.sessions.issue_session_token(harness.user.id)?;

    let principal = harness.sessions.authorize_token(&first.token).await?;
    ensure!(principal.user_id == harness.user.id);

    harness.sessions.revoke_session_token(&first.token).await?;

    let revoked = harness.sessions.authorize_token(&first.token).await;
    ensure!(matches!(revoked, Err(Error::Unauthorized)), "{revoked:?}");

    let other = harness.sessions.authorize_token(&second.token).await?;
    ensure!(other.user_id == harness.user.id);
    Ok(())
}

#[tokio::test]
async fn tokens_from_another_secret_are_rejected() -> Result<()> {
    let harness = Harness::new().await?;
    let foreign = SessionManager::new(&SecretString::from("other-secret"), harness.kv.clone());
    let issued = foreign.issue_session_token(harness.user.id)?;

    let result = harness.sessions.authorize_token(&issued.token).await;
    ensure!(matches!(result, Err(Error::Unauthorized)), "{result:?}");
    Ok(())
}

#[tokio::test]
async fn expired_session_is_rejected() -> Result<()> {
    let harness = Harness::new().await?;
    let sessions = SessionManager::new(&SecretString::from(SECRET), harness.kv.clone())
        .with_config(SessionConfig::new().with_session_ttl(TimeDelta::seconds(-5)));
    let issued = sessions.issue_session_token(harness.user.id)?;

    let result = sessions.authorize_token(&issued.token).await;
    ensure!(matches!(result, Err(Error::Unauthorized)), "{result:?}");

    // Revoking an expired token has nothing left to protect.
    sessions.revoke_session_token(&issued.token).await?;
    Ok(())
}

#[tokio::test]
async fn revocation_store_outage_is_reported() -> Result<()> {
    let harness = Harness::new().await?;
    let issued = harness.sessions.issue_session_token(harness.user.id)?;
    harness.kv.set_available(false);

    let result = harness.sessions.authorize_token(&issued.token).await;
    ensure!(matches!(result, Err(Error::RevocationStore(_))), "{result:?}");
    Ok(())
}

#[tokio::test]
async fn reset_token_redeems_exactly_once() -> Result<()> {
    let harness = Harness::new().await?;
    let before = harness.password_hash().await?;
    let issued = harness
        .sessions
        .issue_password_reset_token(harness.user.id)
        .await?;

    let user_id = harness
        .sessions
        .redeem_password_reset_token(
            &issued.token,
            SecretString::from("brand-new-pass"),
            &harness.store,
        )
        .await?;
    ensure!(user_id == harness.user.id);

    let after = harness.password_hash().await?;
    ensure!(after != before, "password hash unchanged");
    ensure!(password::verify_password(SecretString::from("brand-new-pass"), after.clone()).await?);

    let replay = harness
        .sessions
        .redeem_password_reset_token(
            &issued.token,
            SecretString::from("another-pass"),
            &harness.store,
        )
        .await;
    ensure!(matches!(replay, Err(Error::InvalidOrExpired)), "{replay:?}");
    ensure!(harness.password_hash().await? == after, "replay changed the password");
    Ok(())
}

#[tokio::test]
async fn concurrent_redemptions_have_one_winner() -> Result<()> {
    let harness = Arc::new(Harness::new().await?);
    let issued = harness
        .sessions
        .issue_password_reset_token(harness.user.id)
        .await?;

    let mut tasks = Vec::new();
    for attempt in 0..4 {
        let harness = Arc::clone(&harness);
        let token = issued.token.clone();
        tasks.push(tokio::spawn(async move {
            harness
                .sessions
                .redeem_password_reset_token(
                    &token,
                    SecretString::from(format!("new-password-{attempt}")),
                    &harness.store,
                )
                .await
        }));
    }

    let mut winners = 0;
    for task in tasks {
        match task.await? {
            Ok(_) => winners += 1,
            Err(Error::InvalidOrExpired) => {}
            Err(err) => return Err(err.into()),
        }
    }
    ensure!(winners == 1, "expected one winner, got {winners}");
    Ok(())
}

#[tokio::test]
async fn reset_and_session_tokens_do_not_mix() -> Result<()> {
    let harness = Harness::new().await?;
    let session = harness.sessions.issue_session_token(harness.user.id)?;
    let reset = harness
        .sessions
        .issue_password_reset_token(harness.user.id)
        .await?;

    let redeem = harness
        .sessions
        .redeem_password_reset_token(
            &session.token,
            SecretString::from("brand-new-pass"),
            &harness.store,
        )
        .await;
    ensure!(matches!(redeem, Err(Error::InvalidOrExpired)), "{redeem:?}");

    let authorize = harness.sessions.authorize_token(&reset.token).await;
    ensure!(matches!(authorize, Err(Error::Unauthorized)), "{authorize:?}");
    Ok(())
}

#[tokio::test]
async fn weak_password_keeps_token_redeemable() -> Result<()> {
    let harness = Harness::new().await?;
    let issued = harness
        .sessions
        .issue_password_reset_token(harness.user.id)
        .await?;

    let weak = harness
        .sessions
        .redeem_password_reset_token(&issued.token, SecretString::from("short"), &harness.store)
        .await;
    ensure!(matches!(weak, Err(Error::Validation(_))), "{weak:?}");
    ensure!(harness.sessions.revocations().is_redeemable(&issued.token).await?);
    Ok(())
}

#[tokio::test]
async fn storage_failure_restores_reset_token() -> Result<()> {
    let harness = Harness::new().await?;
    let before = harness.password_hash().await?;
    let issued = harness
        .sessions
        .issue_password_reset_token(harness.user.id)
        .await?;

    harness
        .store
        .fail_password_update
        .store(true, Ordering::SeqCst);
    let failed = harness
        .sessions
        .redeem_password_reset_token(
            &issued.token,
            SecretString::from("brand-new-pass"),
            &harness.store,
        )
        .await;
    ensure!(matches!(failed, Err(Error::Storage(_))), "{failed:?}");
    ensure!(harness.password_hash().await? == before);

    harness
        .store
        .fail_password_update
        .store(false, Ordering::SeqCst);
    harness
        .sessions
        .redeem_password_reset_token(
            &issued.token,
            SecretString::from("brand-new-pass"),
            &harness.store,
        )
        .await?;
    ensure!(harness.password_hash().await? != before);
    Ok(())
}

#[tokio::test]
async fn revocation_outage_blocks_redemption() -> Result<()> {
    let harness = Harness::new().await?;
    let before = harness.password_hash().await?;
    let issued = harness
        .sessions
        .issue_password_reset_token(harness.user.id)
        .await?;

    harness.kv.set_available(false);
    let outage = harness
        .sessions
        .redeem_password_reset_token(
            &issued.token,
            SecretString::from("brand-new-pass"),
            &harness.store,
        )
        .await;
    ensure!(matches!(outage, Err(Error::RevocationStore(_))), "{outage:?}");
    ensure!(harness.password_hash().await? == before);

    harness.kv.set_available(true);
    ensure!(harness.kv.ping().await.is_ok());
    ensure!(harness.sessions.revocations().is_redeemable(&issued.token).await?);
    Ok(())
}
