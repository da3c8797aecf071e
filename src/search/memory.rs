use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use super::{SearchDocument, SearchError, SearchHits, SearchIndex, SearchQuery};

/// In-process index for local runs and tests.
///
/// Scoring is a case-insensitive substring match per query term, weighted like
/// the Elasticsearch query (title 3, abstract 2, other fields 1). Can be
/// switched off to simulate an outage.
#[derive(Debug)]
pub struct MemoryIndex {
    documents: Mutex<BTreeMap<i64, SearchDocument>>,
    available: AtomicBool,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Current version of a document, if indexed.
    pub fn get(&self, id: i64) -> Option<SearchDocument> {
        self.documents
            .lock()
            .ok()
            .and_then(|documents| documents.get(&id).cloned())
    }

    pub fn len(&self) -> usize {
        self.documents.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_documents<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<i64, SearchDocument>) -> T,
    ) -> Result<T, SearchError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SearchError::Unavailable("memory index offline".to_string()));
        }
        let mut documents = self
            .documents
            .lock()
            .map_err(|_| SearchError::Unavailable("memory index lock poisoned".to_string()))?;
        Ok(f(&mut documents))
    }
}

fn score(document: &SearchDocument, terms: &[String]) -> u32 {
    let contains = |field: &str, term: &str| field.to_lowercase().contains(term);
    terms
        .iter()
        .map(|term| {
            let mut score = 0;
            if contains(&document.title, term) {
                score += 3;
            }
            if contains(&document.abstract_text, term) {
                score += 2;
            }
            if document.authors.iter().any(|a| contains(a, term)) {
                score += 1;
            }
            if document.keywords.iter().any(|k| contains(k, term)) {
                score += 1;
            }
            if contains(&document.journal, term) {
                score += 1;
            }
            score
        })
        .sum()
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn upsert(&self, document: &SearchDocument) -> Result<(), SearchError> {
        self.with_documents(|documents| {
            documents.insert(document.id, document.clone());
        })
    }

    async fn delete(&self, id: i64) -> Result<(), SearchError> {
        self.with_documents(|documents| {
            documents.remove(&id);
        })
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchHits, SearchError> {
        let terms: Vec<String> = query
            .text
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        self.with_documents(|documents| {
            let mut ranked: Vec<(u32, &SearchDocument)> = documents
                .values()
                .map(|document| (score(document, &terms), document))
                .filter(|(score, _)| *score > 0)
                .collect();
            ranked.sort_by(|(sa, a), (sb, b)| {
                sb.cmp(sa)
                    .then(b.publication_date.cmp(&a.publication_date))
                    .then(b.id.cmp(&a.id))
            });
            let total = ranked.len() as u64;
            let from = usize::try_from(query.from).unwrap_or(usize::MAX);
            let size = usize::try_from(query.size).unwrap_or(usize::MAX);
            SearchHits {
                total,
                documents: ranked
                    .into_iter()
                    .skip(from)
                    .take(size)
                    .map(|(_, document)| document.clone())
                    .collect(),
            }
        })
    }

    async fn ping(&self) -> Result<(), SearchError> {
        self.with_documents(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn document(id: i64, title: &str, abstract_text: &str, year: i32) -> SearchDocument {
        SearchDocument {
            id,
            title: title.to_string(),
            abstract_text: abstract_text.to_string(),
            authors: vec![],
            keywords: vec![],
            doi: None,
            publication_date: NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or_default(),
            journal: String::new(),
            citation_count: 0,
        }
    }

    #[tokio::test]
    async fn title_matches_rank_first() -> Result<(), SearchError> {
        let index = MemoryIndex::new();
        index.upsert(&document(1, "Other", "graphs everywhere", 2024)).await?;
        index.upsert(&document(2, "Graphs", "", 2020)).await?;
        index.upsert(&document(3, "Unrelated", "", 2024)).await?;

        let hits = index
            .search(&SearchQuery {
                text: "graphs".to_string(),
                from: 0,
                size: 10,
            })
            .await?;
        assert_eq!(hits.total, 2);
        let ids: Vec<i64> = hits.documents.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![2, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn offline_index_errors() {
        let index = MemoryIndex::new();
        index.set_available(false);
        assert!(index.upsert(&document(1, "A", "", 2024)).await.is_err());
        assert!(index.is_empty());
    }
}
