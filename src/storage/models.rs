//! Records exchanged with the relational store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// An author linked to a publication, with its position in the byline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthorRef {
    pub id: i64,
    pub name: String,
    pub order: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct KeywordRef {
    pub id: i64,
    pub name: String,
}

/// A publication as committed in the relational store, with its associations
/// resolved. Authors are sorted by `order`, keywords by name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Publication {
    pub id: i64,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub doi: Option<String>,
    pub publication_date: NaiveDate,
    pub journal: String,
    pub volume: String,
    pub issue: String,
    pub pages: String,
    pub publisher: String,
    pub url: String,
    pub citation_count: i32,
    pub authors: Vec<AuthorRef>,
    pub keywords: Vec<KeywordRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Scalar columns written by create and update. The publication date is passed
/// separately because it is mandatory on create and optional on update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublicationFields {
    pub title: String,
    pub abstract_text: String,
    pub doi: Option<String>,
    pub journal: String,
    pub volume: String,
    pub issue: String,
    pub pages: String,
    pub publisher: String,
    pub url: String,
}

/// Relational listing filter (used when no full-text query is given).
#[derive(Clone, Debug, Default)]
pub struct PublicationFilter {
    pub journal: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Clone, Debug, Default)]
pub struct PublicationPage {
    pub publications: Vec<Publication>,
    pub total: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub profile_image_url: String,
    pub biography: String,
    pub institution: String,
}

/// A user together with the stored password hash, for login only.
#[derive(Clone, Debug)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Profile changes; `None` keeps the stored value.
#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub profile_image_url: Option<String>,
    pub biography: Option<String>,
    pub institution: Option<String>,
}
