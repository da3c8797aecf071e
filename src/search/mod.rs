//! Full-text search: the denormalized document, the index abstraction and the
//! background synchronizer that mirrors committed publications into it.
//!
//! The search index is never authoritative. It may lag behind the relational
//! store or briefly miss a document; readers that need exact state go to
//! [`crate::storage::Store`].

mod elasticsearch;
mod memory;
mod sync;

pub use self::elasticsearch::ElasticsearchIndex;
pub use self::memory::MemoryIndex;
pub use self::sync::{SearchSync, SyncStats};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::storage::Publication;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("search engine returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("search engine unavailable: {0}")]
    Unavailable(String),
}

/// Flattened projection of a [`Publication`], keyed by the publication id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SearchDocument {
    pub id: i64,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Author names in byline order.
    pub authors: Vec<String>,
    pub keywords: Vec<String>,
    pub doi: Option<String>,
    pub publication_date: NaiveDate,
    pub journal: String,
    pub citation_count: i32,
}

impl From<&Publication> for SearchDocument {
    fn from(publication: &Publication) -> Self {
        let mut authors = publication.authors.clone();
        authors.sort_by_key(|author| author.order);
        Self {
            id: publication.id,
            title: publication.title.clone(),
            abstract_text: publication.abstract_text.clone(),
            authors: authors.into_iter().map(|author| author.name).collect(),
            keywords: publication
                .keywords
                .iter()
                .map(|keyword| keyword.name.clone())
                .collect(),
            doi: publication.doi.clone(),
            publication_date: publication.publication_date,
            journal: publication.journal.clone(),
            citation_count: publication.citation_count,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SearchQuery {
    pub text: String,
    pub from: u64,
    pub size: u64,
}

#[derive(Clone, Debug, Default)]
pub struct SearchHits {
    pub total: u64,
    pub documents: Vec<SearchDocument>,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Index `document` under its id, replacing any previous version.
    async fn upsert(&self, document: &SearchDocument) -> Result<(), SearchError>;

    /// Remove the document with `id`. Removing an absent document succeeds.
    async fn delete(&self, id: i64) -> Result<(), SearchError>;

    /// Ranked query: best match first, newer publications first among equals.
    async fn search(&self, query: &SearchQuery) -> Result<SearchHits, SearchError>;

    async fn ping(&self) -> Result<(), SearchError>;
}
