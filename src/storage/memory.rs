//! In-process relational store for local runs and tests.
//!
//! A transaction takes the table lock for its whole lifetime and works on a
//! staged copy of the tables; commit swaps the copy in. Transactions are thus
//! serialized, which is stricter than the read-committed isolation assumed of
//! the real store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    AuthorRef, KeywordRef, NewUser, ProfileUpdate, Publication, PublicationFields,
    PublicationFilter, PublicationPage, Store, StoreError, User, UserCredentials, WriteTx,
};

#[derive(Clone, Debug)]
struct AuthorRow {
    name: String,
}

#[derive(Clone, Debug)]
struct PublicationRow {
    fields: PublicationFields,
    publication_date: NaiveDate,
    citation_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
struct UserRow {
    user: User,
    password_hash: String,
}

#[derive(Clone, Debug, Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, UserRow>,
    authors: BTreeMap<i64, AuthorRow>,
    keywords: BTreeMap<i64, String>,
    publications: BTreeMap<i64, PublicationRow>,
    /// `(publication_id, author_id) -> order`
    publication_authors: BTreeMap<(i64, i64), i32>,
    /// `(publication_id, keyword_id)`
    publication_keywords: BTreeSet<(i64, i64)>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn assemble(&self, id: i64) -> Option<Publication> {
        let row = self.publications.get(&id)?;

        let mut authors: Vec<AuthorRef> = self
            .publication_authors
            .range((id, i64::MIN)..=(id, i64::MAX))
            .filter_map(|(&(_, author_id), &order)| {
                self.authors.get(&author_id).map(|author| AuthorRef {
                    id: author_id,
                    name: author.name.clone(),
                    order,
                })
            })
            .collect();
        authors.sort_by_key(|author| author.order);

        let mut keywords: Vec<KeywordRef> = self
            .publication_keywords
            .range((id, i64::MIN)..=(id, i64::MAX))
            .filter_map(|&(_, keyword_id)| {
                self.keywords.get(&keyword_id).map(|name| KeywordRef {
                    id: keyword_id,
                    name: name.clone(),
                })
            })
            .collect();
        keywords.sort_by(|a, b| a.name.cmp(&b.name));

        Some(Publication {
            id,
            title: row.fields.title.clone(),
            abstract_text: row.fields.abstract_text.clone(),
            doi: row.fields.doi.clone(),
            publication_date: row.publication_date,
            journal: row.fields.journal.clone(),
            volume: row.fields.volume.clone(),
            issue: row.fields.issue.clone(),
            pages: row.fields.pages.clone(),
            publisher: row.fields.publisher.clone(),
            url: row.fields.url.clone(),
            citation_count: row.citation_count,
            authors,
            keywords,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn check_doi(&self, doi: Option<&str>, except: Option<i64>) -> Result<(), StoreError> {
        let Some(doi) = doi else {
            return Ok(());
        };
        let taken = self
            .publications
            .iter()
            .any(|(id, row)| Some(*id) != except && row.fields.doi.as_deref() == Some(doi));
        if taken {
            Err(StoreError::Conflict("publications_doi_key".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_user_unique(
        &self,
        username: Option<&str>,
        email: Option<&str>,
        except: Option<i64>,
    ) -> Result<(), StoreError> {
        for (id, row) in &self.users {
            if Some(*id) == except {
                continue;
            }
            if username == Some(row.user.username.as_str()) {
                return Err(StoreError::Conflict("users_username_key".to_string()));
            }
            if email == Some(row.user.email.as_str()) {
                return Err(StoreError::Conflict("users_email_key".to_string()));
            }
        }
        Ok(())
    }
}

/// Row counts, to assert on atomicity from tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub publications: usize,
    pub keywords: usize,
    pub author_links: usize,
    pub keyword_links: usize,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Authors are managed outside the publication write path; this seeds one.
    pub async fn insert_author(&self, name: &str) -> i64 {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        tables.authors.insert(
            id,
            AuthorRow {
                name: name.to_string(),
            },
        );
        id
    }

    pub async fn counts(&self) -> TableCounts {
        let tables = self.tables.lock().await;
        TableCounts {
            publications: tables.publications.len(),
            keywords: tables.keywords.len(),
            author_links: tables.publication_authors.len(),
            keyword_links: tables.publication_keywords.len(),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn WriteTx>, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn fetch_publication(&self, id: i64) -> Result<Option<Publication>, StoreError> {
        Ok(self.tables.lock().await.assemble(id))
    }

    async fn list_publications(
        &self,
        filter: &PublicationFilter,
    ) -> Result<PublicationPage, StoreError> {
        let tables = self.tables.lock().await;
        let journal = filter.journal.as_ref().map(|j| j.to_lowercase());

        let mut matching: Vec<Publication> = tables
            .publications
            .iter()
            .filter(|(_, row)| {
                journal
                    .as_ref()
                    .is_none_or(|j| row.fields.journal.to_lowercase().contains(j))
                    && filter.from_date.is_none_or(|d| row.publication_date >= d)
                    && filter.to_date.is_none_or(|d| row.publication_date <= d)
            })
            .filter_map(|(id, _)| tables.assemble(*id))
            .collect();
        matching.sort_by(|a, b| {
            b.publication_date
                .cmp(&a.publication_date)
                .then(b.id.cmp(&a.id))
        });

        let total = i64::try_from(matching.len()).unwrap_or(i64::MAX);
        let offset = usize::try_from(filter.offset).unwrap_or(0);
        let limit = usize::try_from(filter.limit).unwrap_or(0);
        let publications = matching.into_iter().skip(offset).take(limit).collect();

        Ok(PublicationPage {
            publications,
            total,
        })
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_user_unique(Some(&user.username), Some(&user.email), None)?;
        let id = tables.next_id();
        let record = User {
            id,
            username: user.username.clone(),
            email: user.email.clone(),
            is_active: true,
            is_admin: false,
            date_joined: Utc::now(),
            last_login: None,
            profile_image_url: String::new(),
            biography: String::new(),
            institution: String::new(),
        };
        tables.users.insert(
            id,
            UserRow {
                user: record.clone(),
                password_hash: user.password_hash.clone(),
            },
        );
        Ok(record)
    }

    async fn fetch_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.get(&id).map(|row| row.user.clone()))
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|row| row.user.email == email)
            .map(|row| UserCredentials {
                user: row.user.clone(),
                password_hash: row.password_hash.clone(),
            }))
    }

    async fn record_login(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(row) = tables.users.get_mut(&id) {
            row.user.last_login = Some(Utc::now());
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: i64,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&id) {
            return Ok(None);
        }
        tables.check_user_unique(update.username.as_deref(), update.email.as_deref(), Some(id))?;

        let Some(row) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        let user = &mut row.user;
        if let Some(username) = &update.username {
            user.username.clone_from(username);
        }
        if let Some(email) = &update.email {
            user.email.clone_from(email);
        }
        if let Some(url) = &update.profile_image_url {
            user.profile_image_url.clone_from(url);
        }
        if let Some(biography) = &update.biography {
            user.biography.clone_from(biography);
        }
        if let Some(institution) = &update.institution {
            user.institution.clone_from(institution);
        }
        Ok(Some(user.clone()))
    }

    async fn set_password_hash(&self, id: i64, password_hash: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .users
            .get_mut(&id)
            .map(|row| row.password_hash = password_hash.to_string())
            .is_some())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

#[async_trait]
impl WriteTx for MemoryTx {
    async fn insert_publication(
        &mut self,
        fields: &PublicationFields,
        publication_date: NaiveDate,
    ) -> Result<i64, StoreError> {
        self.staged.check_doi(fields.doi.as_deref(), None)?;
        let id = self.staged.next_id();
        let now = Utc::now();
        self.staged.publications.insert(
            id,
            PublicationRow {
                fields: fields.clone(),
                publication_date,
                citation_count: 0,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn update_publication(
        &mut self,
        id: i64,
        fields: &PublicationFields,
        publication_date: Option<NaiveDate>,
    ) -> Result<bool, StoreError> {
        if !self.staged.publications.contains_key(&id) {
            return Ok(false);
        }
        self.staged.check_doi(fields.doi.as_deref(), Some(id))?;
        if let Some(row) = self.staged.publications.get_mut(&id) {
            row.fields = fields.clone();
            if let Some(date) = publication_date {
                row.publication_date = date;
            }
            row.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn delete_publication(&mut self, id: i64) -> Result<bool, StoreError> {
        Ok(self.staged.publications.remove(&id).is_some())
    }

    async fn find_or_create_keyword(&mut self, name: &str) -> Result<i64, StoreError> {
        if let Some((id, _)) = self.staged.keywords.iter().find(|(_, n)| n.as_str() == name) {
            return Ok(*id);
        }
        let id = self.staged.next_id();
        self.staged.keywords.insert(id, name.to_string());
        Ok(id)
    }

    async fn clear_keywords(&mut self, publication_id: i64) -> Result<(), StoreError> {
        self.staged
            .publication_keywords
            .retain(|&(pub_id, _)| pub_id != publication_id);
        Ok(())
    }

    async fn link_keyword(
        &mut self,
        publication_id: i64,
        keyword_id: i64,
    ) -> Result<(), StoreError> {
        if !self
            .staged
            .publication_keywords
            .insert((publication_id, keyword_id))
        {
            return Err(StoreError::Conflict(
                "publication_keywords_pkey".to_string(),
            ));
        }
        Ok(())
    }

    async fn author_exists(&mut self, author_id: i64) -> Result<bool, StoreError> {
        Ok(self.staged.authors.contains_key(&author_id))
    }

    async fn clear_authors(&mut self, publication_id: i64) -> Result<(), StoreError> {
        self.staged
            .publication_authors
            .retain(|&(pub_id, _), _| pub_id != publication_id);
        Ok(())
    }

    async fn link_author(
        &mut self,
        publication_id: i64,
        author_id: i64,
        order: i32,
    ) -> Result<(), StoreError> {
        let links = &self.staged.publication_authors;
        if links.contains_key(&(publication_id, author_id)) {
            return Err(StoreError::Conflict("publication_authors_pkey".to_string()));
        }
        let position_taken = links
            .range((publication_id, i64::MIN)..=(publication_id, i64::MAX))
            .any(|(_, &existing)| existing == order);
        if position_taken {
            return Err(StoreError::Conflict(
                "publication_authors_publication_id_position_key".to_string(),
            ));
        }
        self.staged
            .publication_authors
            .insert((publication_id, author_id), order);
        Ok(())
    }

    async fn load_publication(&mut self, id: i64) -> Result<Option<Publication>, StoreError> {
        Ok(self.staged.assemble(id))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
