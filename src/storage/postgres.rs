//! PostgreSQL store. Schema lives in `sql/schema.sql`.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{
    PgConnection, PgPool, Postgres, Row, Transaction,
    postgres::{PgPoolOptions, PgRow},
};
use std::{collections::HashMap, time::Duration};
use tracing::{Instrument, Span};

use super::{
    AuthorRef, KeywordRef, NewUser, ProfileUpdate, Publication, PublicationFields,
    PublicationFilter, PublicationPage, Store, StoreError, User, UserCredentials, WriteTx,
};

const PUBLICATION_COLUMNS: &str = "id, title, abstract, doi, publication_date, journal, volume, \
     issue, pages, publisher, url, citation_count, created_at, updated_at";

const USER_COLUMNS: &str = "id, username, email, is_active, is_admin, date_joined, last_login, \
     profile_image_url, biography, institution";

fn query_span(operation: &'static str, statement: &str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool to `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be reached.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .max_lifetime(Duration::from_secs(60 * 30))
            .test_before_acquire(true)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// `ILIKE` pattern matching `needle` anywhere, with its wildcards taken literally.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn publication_row(row: &PgRow) -> Result<Publication, sqlx::Error> {
    Ok(Publication {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        abstract_text: row.try_get("abstract")?,
        doi: row.try_get("doi")?,
        publication_date: row.try_get("publication_date")?,
        journal: row.try_get("journal")?,
        volume: row.try_get("volume")?,
        issue: row.try_get("issue")?,
        pages: row.try_get("pages")?,
        publisher: row.try_get("publisher")?,
        url: row.try_get("url")?,
        citation_count: row.try_get("citation_count")?,
        authors: Vec::new(),
        keywords: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn user_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        is_active: row.try_get("is_active")?,
        is_admin: row.try_get("is_admin")?,
        date_joined: row.try_get("date_joined")?,
        last_login: row.try_get("last_login")?,
        profile_image_url: row.try_get("profile_image_url")?,
        biography: row.try_get("biography")?,
        institution: row.try_get("institution")?,
    })
}

/// Fill authors (by position) and keywords (by name) for a batch of publications.
async fn attach_associations(
    conn: &mut PgConnection,
    publications: &mut [Publication],
) -> Result<(), StoreError> {
    if publications.is_empty() {
        return Ok(());
    }
    let ids: Vec<i64> = publications.iter().map(|p| p.id).collect();

    let query = r"
        SELECT pa.publication_id, a.id, a.name, pa.position
        FROM publication_authors pa
        JOIN authors a ON a.id = pa.author_id
        WHERE pa.publication_id = ANY($1)
        ORDER BY pa.publication_id, pa.position
    ";
    let rows = sqlx::query(query)
        .bind(&ids)
        .fetch_all(&mut *conn)
        .instrument(query_span("SELECT", query))
        .await?;
    let mut authors: HashMap<i64, Vec<AuthorRef>> = HashMap::new();
    for row in rows {
        authors
            .entry(row.try_get("publication_id")?)
            .or_default()
            .push(AuthorRef {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                order: row.try_get("position")?,
            });
    }

    let query = r"
        SELECT pk.publication_id, k.id, k.name
        FROM publication_keywords pk
        JOIN keywords k ON k.id = pk.keyword_id
        WHERE pk.publication_id = ANY($1)
        ORDER BY pk.publication_id, k.name
    ";
    let rows = sqlx::query(query)
        .bind(&ids)
        .fetch_all(&mut *conn)
        .instrument(query_span("SELECT", query))
        .await?;
    let mut keywords: HashMap<i64, Vec<KeywordRef>> = HashMap::new();
    for row in rows {
        keywords
            .entry(row.try_get("publication_id")?)
            .or_default()
            .push(KeywordRef {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
            });
    }

    for publication in publications.iter_mut() {
        publication.authors = authors.remove(&publication.id).unwrap_or_default();
        publication.keywords = keywords.remove(&publication.id).unwrap_or_default();
    }
    Ok(())
}

async fn load_publication(
    conn: &mut PgConnection,
    id: i64,
) -> Result<Option<Publication>, StoreError> {
    let query = format!("SELECT {PUBLICATION_COLUMNS} FROM publications WHERE id = $1");
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(&mut *conn)
        .instrument(query_span("SELECT", &query))
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut publications = [publication_row(&row)?];
    attach_associations(conn, &mut publications).await?;
    let [publication] = publications;
    Ok(Some(publication))
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn WriteTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgWriteTx { tx }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(())
    }

    async fn fetch_publication(&self, id: i64) -> Result<Option<Publication>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        load_publication(&mut conn, id).await
    }

    async fn list_publications(
        &self,
        filter: &PublicationFilter,
    ) -> Result<PublicationPage, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let journal = filter.journal.as_deref().map(contains_pattern);
        let conditions = r"
            ($1::text IS NULL OR journal ILIKE $1 ESCAPE '\')
            AND ($2::date IS NULL OR publication_date >= $2)
            AND ($3::date IS NULL OR publication_date <= $3)
        ";

        let query = format!("SELECT COUNT(*) AS total FROM publications WHERE {conditions}");
        let total: i64 = sqlx::query(&query)
            .bind(journal.as_deref())
            .bind(filter.from_date)
            .bind(filter.to_date)
            .fetch_one(&mut *conn)
            .instrument(query_span("SELECT", &query))
            .await?
            .try_get("total")?;

        let query = format!(
            "SELECT {PUBLICATION_COLUMNS} FROM publications WHERE {conditions} \
             ORDER BY publication_date DESC, id DESC OFFSET $4 LIMIT $5"
        );
        let rows = sqlx::query(&query)
            .bind(journal.as_deref())
            .bind(filter.from_date)
            .bind(filter.to_date)
            .bind(filter.offset)
            .bind(filter.limit)
            .fetch_all(&mut *conn)
            .instrument(query_span("SELECT", &query))
            .await?;
        let mut publications = rows
            .iter()
            .map(publication_row)
            .collect::<Result<Vec<_>, _>>()?;
        attach_associations(&mut conn, &mut publications).await?;

        Ok(PublicationPage {
            publications,
            total,
        })
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let query = format!(
            "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, $3) \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await?;
        Ok(user_row(&row)?)
    }

    async fn fetch_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?;
        Ok(row.as_ref().map(user_row).transpose()?)
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(UserCredentials {
            user: user_row(&row)?,
            password_hash: row.try_get("password_hash")?,
        }))
    }

    async fn record_login(&self, id: i64) -> Result<(), StoreError> {
        let query = "UPDATE users SET last_login = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await?;
        Ok(())
    }

    async fn update_profile(
        &self,
        id: i64,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, StoreError> {
        let query = format!(
            "UPDATE users SET \
                username = COALESCE($2, username), \
                email = COALESCE($3, email), \
                profile_image_url = COALESCE($4, profile_image_url), \
                biography = COALESCE($5, biography), \
                institution = COALESCE($6, institution) \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(update.username.as_deref())
            .bind(update.email.as_deref())
            .bind(update.profile_image_url.as_deref())
            .bind(update.biography.as_deref())
            .bind(update.institution.as_deref())
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", &query))
            .await?;
        Ok(row.as_ref().map(user_row).transpose()?)
    }

    async fn set_password_hash(&self, id: i64, password_hash: &str) -> Result<bool, StoreError> {
        let query = "UPDATE users SET password_hash = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct PgWriteTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl WriteTx for PgWriteTx {
    async fn insert_publication(
        &mut self,
        fields: &PublicationFields,
        publication_date: NaiveDate,
    ) -> Result<i64, StoreError> {
        let query = r"
            INSERT INTO publications
                (title, abstract, doi, publication_date, journal, volume, issue, pages, publisher, url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
        ";
        let id: i64 = sqlx::query(query)
            .bind(&fields.title)
            .bind(&fields.abstract_text)
            .bind(fields.doi.as_deref())
            .bind(publication_date)
            .bind(&fields.journal)
            .bind(&fields.volume)
            .bind(&fields.issue)
            .bind(&fields.pages)
            .bind(&fields.publisher)
            .bind(&fields.url)
            .fetch_one(&mut *self.tx)
            .instrument(query_span("INSERT", query))
            .await?
            .try_get("id")?;
        Ok(id)
    }

    async fn update_publication(
        &mut self,
        id: i64,
        fields: &PublicationFields,
        publication_date: Option<NaiveDate>,
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE publications SET
                title = $2, abstract = $3, doi = $4,
                publication_date = COALESCE($5, publication_date),
                journal = $6, volume = $7, issue = $8, pages = $9, publisher = $10, url = $11,
                updated_at = NOW()
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(id)
            .bind(&fields.title)
            .bind(&fields.abstract_text)
            .bind(fields.doi.as_deref())
            .bind(publication_date)
            .bind(&fields.journal)
            .bind(&fields.volume)
            .bind(&fields.issue)
            .bind(&fields.pages)
            .bind(&fields.publisher)
            .bind(&fields.url)
            .execute(&mut *self.tx)
            .instrument(query_span("UPDATE", query))
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_publication(&mut self, id: i64) -> Result<bool, StoreError> {
        let query = "DELETE FROM publications WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&mut *self.tx)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_or_create_keyword(&mut self, name: &str) -> Result<i64, StoreError> {
        let query = r"
            INSERT INTO keywords (name) VALUES ($1)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
        ";
        let id: i64 = sqlx::query(query)
            .bind(name)
            .fetch_one(&mut *self.tx)
            .instrument(query_span("INSERT", query))
            .await?
            .try_get("id")?;
        Ok(id)
    }

    async fn clear_keywords(&mut self, publication_id: i64) -> Result<(), StoreError> {
        let query = "DELETE FROM publication_keywords WHERE publication_id = $1";
        sqlx::query(query)
            .bind(publication_id)
            .execute(&mut *self.tx)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(())
    }

    async fn link_keyword(
        &mut self,
        publication_id: i64,
        keyword_id: i64,
    ) -> Result<(), StoreError> {
        let query = "INSERT INTO publication_keywords (publication_id, keyword_id) VALUES ($1, $2)";
        sqlx::query(query)
            .bind(publication_id)
            .bind(keyword_id)
            .execute(&mut *self.tx)
            .instrument(query_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn author_exists(&mut self, author_id: i64) -> Result<bool, StoreError> {
        let query = "SELECT EXISTS (SELECT 1 FROM authors WHERE id = $1) AS found";
        let found: bool = sqlx::query(query)
            .bind(author_id)
            .fetch_one(&mut *self.tx)
            .instrument(query_span("SELECT", query))
            .await?
            .try_get("found")?;
        Ok(found)
    }

    async fn clear_authors(&mut self, publication_id: i64) -> Result<(), StoreError> {
        let query = "DELETE FROM publication_authors WHERE publication_id = $1";
        sqlx::query(query)
            .bind(publication_id)
            .execute(&mut *self.tx)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(())
    }

    async fn link_author(
        &mut self,
        publication_id: i64,
        author_id: i64,
        order: i32,
    ) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO publication_authors (publication_id, author_id, position)
            VALUES ($1, $2, $3)
        ";
        sqlx::query(query)
            .bind(publication_id)
            .bind(author_id)
            .bind(order)
            .execute(&mut *self.tx)
            .instrument(query_span("INSERT", query))
            .await?;
        Ok(())
    }

    async fn load_publication(&mut self, id: i64) -> Result<Option<Publication>, StoreError> {
        load_publication(&mut self.tx, id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
