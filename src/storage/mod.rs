//! Relational storage.
//!
//! [`Store`] covers plain reads and single-statement user writes. Multi-step
//! publication writes go through a [`WriteTx`] obtained from [`Store::begin`]:
//! nothing done through it is visible to other readers until
//! [`WriteTx::commit`], and dropping it (or calling [`WriteTx::rollback`])
//! discards every step.
//!
//! Associations are plain rows keyed by `(publication_id, author_id)` and
//! `(publication_id, keyword_id)`; the publication never owns author or keyword
//! records.

mod memory;
pub mod models;
mod postgres;

pub use self::memory::{MemoryStore, TableCounts};
pub use self::models::{
    AuthorRef, KeywordRef, NewUser, ProfileUpdate, Publication, PublicationFields,
    PublicationFilter, PublicationPage, User, UserCredentials,
};
pub use self::postgres::PgStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint violation; carries the constraint name.
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error(transparent)]
    Database(sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err
            && db_err.code().is_some_and(|code| code.as_ref() == "23505")
        {
            return Self::Conflict(db_err.constraint().unwrap_or("unique").to_string());
        }
        Self::Database(err)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Open a write transaction.
    async fn begin(&self) -> Result<Box<dyn WriteTx>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn fetch_publication(&self, id: i64) -> Result<Option<Publication>, StoreError>;

    async fn list_publications(
        &self,
        filter: &PublicationFilter,
    ) -> Result<PublicationPage, StoreError>;

    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError>;

    async fn fetch_user(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>, StoreError>;

    async fn record_login(&self, id: i64) -> Result<(), StoreError>;

    /// Returns `None` when the user does not exist.
    async fn update_profile(
        &self,
        id: i64,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, StoreError>;

    /// Returns `false` when the user does not exist.
    async fn set_password_hash(&self, id: i64, password_hash: &str) -> Result<bool, StoreError>;
}

/// Steps of a publication write, all inside one transaction.
#[async_trait]
pub trait WriteTx: Send {
    async fn insert_publication(
        &mut self,
        fields: &PublicationFields,
        publication_date: NaiveDate,
    ) -> Result<i64, StoreError>;

    /// Returns `false` when the publication does not exist.
    async fn update_publication(
        &mut self,
        id: i64,
        fields: &PublicationFields,
        publication_date: Option<NaiveDate>,
    ) -> Result<bool, StoreError>;

    /// Returns `false` when the publication does not exist.
    async fn delete_publication(&mut self, id: i64) -> Result<bool, StoreError>;

    async fn find_or_create_keyword(&mut self, name: &str) -> Result<i64, StoreError>;

    async fn clear_keywords(&mut self, publication_id: i64) -> Result<(), StoreError>;

    async fn link_keyword(&mut self, publication_id: i64, keyword_id: i64)
    -> Result<(), StoreError>;

    async fn author_exists(&mut self, author_id: i64) -> Result<bool, StoreError>;

    async fn clear_authors(&mut self, publication_id: i64) -> Result<(), StoreError>;

    async fn link_author(
        &mut self,
        publication_id: i64,
        author_id: i64,
        order: i32,
    ) -> Result<(), StoreError>;

    /// Read a publication as seen by this transaction.
    async fn load_publication(&mut self, id: i64) -> Result<Option<Publication>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
