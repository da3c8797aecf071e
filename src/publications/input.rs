//! Publication write requests and their validation.
//!
//! Validation runs before any transaction is opened.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;
use utoipa::ToSchema;

use crate::{
    error::{Error, Result},
    storage::PublicationFields,
};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Body of a create or update request.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct PublicationInput {
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    pub doi: Option<String>,
    /// `YYYY-MM-DD`; required on create, kept when absent on update.
    pub publication_date: Option<String>,
    #[serde(default)]
    pub journal: String,
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub pages: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub url: String,
    /// Keyword names. When present on update, replaces all keywords.
    pub keywords: Option<Vec<String>>,
    /// Author ids in byline order. When present on update, replaces all authors.
    pub authors: Option<Vec<i64>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

/// A validated write, ready to be applied inside a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicationDraft {
    pub fields: PublicationFields,
    pub publication_date: Option<NaiveDate>,
    pub keywords: Option<Vec<String>>,
    pub authors: Option<Vec<i64>>,
}

/// Parse a `YYYY-MM-DD` date.
///
/// # Errors
/// Returns [`Error::Validation`] if the date does not parse.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        Error::Validation("Invalid publication date format. Use YYYY-MM-DD".to_string())
    })
}

/// Trim, drop empty names and deduplicate, keeping first occurrences.
#[must_use]
pub fn normalize_keywords(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

fn check_authors(authors: &[i64]) -> Result<()> {
    let mut seen = HashSet::new();
    for id in authors {
        if !seen.insert(*id) {
            return Err(Error::Validation(format!("Duplicate author: {id}")));
        }
    }
    Ok(())
}

impl PublicationInput {
    /// # Errors
    /// Returns [`Error::Validation`] for an empty title, a missing or malformed
    /// date, or a repeated author id.
    pub fn validate(self, mode: WriteMode) -> Result<PublicationDraft> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(Error::Validation("Title is required".to_string()));
        }

        let publication_date = match self.publication_date.as_deref().map(str::trim) {
            Some(date) if !date.is_empty() => Some(parse_date(date)?),
            _ if mode == WriteMode::Create => {
                return Err(Error::Validation(
                    "Publication date is required (YYYY-MM-DD)".to_string(),
                ));
            }
            _ => None,
        };

        if let Some(authors) = &self.authors {
            check_authors(authors)?;
        }

        let doi = self
            .doi
            .map(|doi| doi.trim().to_string())
            .filter(|doi| !doi.is_empty());

        Ok(PublicationDraft {
            fields: PublicationFields {
                title,
                abstract_text: self.abstract_text,
                doi,
                journal: self.journal,
                volume: self.volume,
                issue: self.issue,
                pages: self.pages,
                publisher: self.publisher,
                url: self.url,
            },
            publication_date,
            keywords: self.keywords.as_deref().map(normalize_keywords),
            authors: self.authors,
        })
    }
}
