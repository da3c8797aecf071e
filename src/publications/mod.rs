//! Publication write coordinator.
//!
//! A publication row, its ordered author rows and its keyword rows change in
//! one transaction. Any failed step rolls the whole write back. Only after
//! commit is the committed state handed to the search synchronizer, whose
//! outcome never reaches the caller.

pub mod input;

pub use self::input::{PublicationDraft, PublicationInput, WriteMode};

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    auth::Principal,
    error::{Error, Result},
    search::SearchSync,
    storage::{Publication, PublicationFilter, PublicationPage, Store, WriteTx},
};

#[derive(Clone)]
pub struct PublicationService {
    store: Arc<dyn Store>,
    sync: SearchSync,
}

impl std::fmt::Debug for PublicationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicationService")
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl PublicationService {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, sync: SearchSync) -> Self {
        Self { store, sync }
    }

    #[must_use]
    pub fn sync(&self) -> &SearchSync {
        &self.sync
    }

    /// # Errors
    /// Validation, not found (author), conflict (DOI) or storage errors.
    pub async fn create(&self, principal: &Principal, input: PublicationInput) -> Result<Publication> {
        let draft = input.validate(WriteMode::Create)?;
        self.save(principal, &draft, None).await
    }

    /// # Errors
    /// Validation, not found (publication or author), conflict or storage errors.
    pub async fn update(
        &self,
        principal: &Principal,
        id: i64,
        input: PublicationInput,
    ) -> Result<Publication> {
        let draft = input.validate(WriteMode::Update)?;
        self.save(principal, &draft, Some(id)).await
    }

    /// Create (`existing` is `None`) or update a publication with its
    /// associations, then schedule indexing of the committed result.
    ///
    /// # Errors
    /// Any failed step; nothing is committed in that case.
    #[instrument(skip(self, principal, draft), fields(user_id = principal.user_id))]
    pub async fn save(
        &self,
        principal: &Principal,
        draft: &PublicationDraft,
        existing: Option<i64>,
    ) -> Result<Publication> {
        let mut tx = self.store.begin().await?;
        let publication = match apply(tx.as_mut(), draft, existing).await {
            Ok(publication) => publication,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("rollback failed: {rollback_err}");
                }
                return Err(err);
            }
        };
        tx.commit().await?;

        info!(
            publication_id = publication.id,
            created = existing.is_none(),
            "publication saved"
        );
        self.sync.index_publication(&publication);
        Ok(publication)
    }

    /// Delete a publication and its associations, then schedule removal of its
    /// search document.
    ///
    /// # Errors
    /// [`Error::NotFound`] if it does not exist, or storage errors.
    #[instrument(skip(self, principal), fields(user_id = principal.user_id))]
    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<()> {
        let mut tx = self.store.begin().await?;
        if let Err(err) = remove(tx.as_mut(), id).await {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("rollback failed: {rollback_err}");
            }
            return Err(err);
        }
        tx.commit().await?;

        info!(publication_id = id, "publication deleted");
        self.sync.remove_publication(id);
        Ok(())
    }

    /// # Errors
    /// [`Error::NotFound`] if it does not exist, or storage errors.
    pub async fn get(&self, id: i64) -> Result<Publication> {
        self.store
            .fetch_publication(id)
            .await?
            .ok_or_else(|| Error::NotFound("Publication not found".to_string()))
    }

    /// # Errors
    /// Storage errors.
    pub async fn list(&self, filter: &PublicationFilter) -> Result<PublicationPage> {
        Ok(self.store.list_publications(filter).await?)
    }
}

async fn apply(
    tx: &mut dyn WriteTx,
    draft: &PublicationDraft,
    existing: Option<i64>,
) -> Result<Publication> {
    let id = match existing {
        None => {
            let date = draft.publication_date.ok_or_else(|| {
                Error::Validation("Publication date is required (YYYY-MM-DD)".to_string())
            })?;
            tx.insert_publication(&draft.fields, date).await?
        }
        Some(id) => {
            if !tx
                .update_publication(id, &draft.fields, draft.publication_date)
                .await?
            {
                return Err(Error::NotFound("Publication not found".to_string()));
            }
            id
        }
    };

    if let Some(keywords) = &draft.keywords {
        if existing.is_some() {
            tx.clear_keywords(id).await?;
        }
        for name in keywords {
            let keyword_id = tx.find_or_create_keyword(name).await?;
            tx.link_keyword(id, keyword_id).await?;
        }
    }

    if let Some(authors) = &draft.authors {
        for author_id in authors {
            if !tx.author_exists(*author_id).await? {
                return Err(Error::NotFound(format!("Author not found: {author_id}")));
            }
        }
        if existing.is_some() {
            tx.clear_authors(id).await?;
        }
        for (position, author_id) in authors.iter().enumerate() {
            let order = i32::try_from(position)
                .map_err(|_| Error::Validation("Too many authors".to_string()))?;
            tx.link_author(id, *author_id, order).await?;
        }
    }

    tx.load_publication(id)
        .await?
        .ok_or_else(|| Error::Internal(format!("publication {id} missing after write")))
}

async fn remove(tx: &mut dyn WriteTx, id: i64) -> Result<()> {
    tx.clear_authors(id).await?;
    tx.clear_keywords(id).await?;
    if !tx.delete_publication(id).await? {
        return Err(Error::NotFound("Publication not found".to_string()));
    }
    Ok(())
}
