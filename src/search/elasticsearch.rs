use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{Instrument, info_span, warn};
use url::Url;

use super::{SearchDocument, SearchError, SearchHits, SearchIndex, SearchQuery};

/// Elasticsearch index spoken to over its REST API.
#[derive(Clone, Debug)]
pub struct ElasticsearchIndex {
    client: Client,
    base_url: Url,
    index: String,
}

impl ElasticsearchIndex {
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, index: &str) -> Result<Self, SearchError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|err| SearchError::Unavailable(format!("invalid url {base_url}: {err}")))?;
        // Without a trailing slash, joining would replace the last path segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url,
            index: index.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SearchError> {
        self.base_url
            .join(&format!("{}/{path}", self.index))
            .map_err(|err| SearchError::Unavailable(format!("invalid endpoint {path}: {err}")))
    }

    /// Create the index with its mappings unless it already exists.
    ///
    /// # Errors
    /// Returns an error if the search engine cannot be reached or rejects the mappings.
    pub async fn ensure_index(&self) -> Result<(), SearchError> {
        let url = self.endpoint("")?;
        let span = info_span!("search.request", http.method = "HEAD", url = %url);
        let response = self.client.head(url.clone()).send().instrument(span).await?;
        if response.status().is_success() {
            return Ok(());
        }

        let span = info_span!("search.request", http.method = "PUT", url = %url);
        let response = self
            .client
            .put(url)
            .json(&index_mappings())
            .send()
            .instrument(span)
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

fn index_mappings() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "long" },
                "title": { "type": "text" },
                "abstract": { "type": "text" },
                "authors": { "type": "text" },
                "keywords": { "type": "text" },
                "doi": { "type": "keyword" },
                "publication_date": { "type": "date", "format": "yyyy-MM-dd" },
                "journal": { "type": "text" },
                "citation_count": { "type": "integer" }
            }
        }
    })
}

/// Request body for a ranked full-text query.
pub(crate) fn build_query(query: &SearchQuery) -> Value {
    json!({
        "from": query.from,
        "size": query.size,
        "query": {
            "multi_match": {
                "query": query.text,
                "fields": ["title^3", "abstract^2", "authors", "keywords", "journal"],
                "type": "best_fields",
                "fuzziness": "AUTO"
            }
        },
        "sort": [
            { "_score": { "order": "desc" } },
            { "publication_date": { "order": "desc" } }
        ]
    })
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SearchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SearchError::Status {
        status: status.as_u16(),
        body,
    })
}

fn parse_hits(body: &Value) -> SearchHits {
    let total = body
        .pointer("/hits/total/value")
        .or_else(|| body.pointer("/hits/total"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let documents = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let source = hit.get("_source")?;
                    match serde_json::from_value::<SearchDocument>(source.clone()) {
                        Ok(document) => Some(document),
                        Err(err) => {
                            warn!("skipping unreadable search hit: {err}");
                            None
                        }
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    SearchHits { total, documents }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn upsert(&self, document: &SearchDocument) -> Result<(), SearchError> {
        let url = self.endpoint(&format!("_doc/{}", document.id))?;
        let span = info_span!("search.request", http.method = "PUT", url = %url);
        let response = self
            .client
            .put(url)
            .json(document)
            .send()
            .instrument(span)
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), SearchError> {
        let url = self.endpoint(&format!("_doc/{id}"))?;
        let span = info_span!("search.request", http.method = "DELETE", url = %url);
        let response = self.client.delete(url).send().instrument(span).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchHits, SearchError> {
        let url = self.endpoint("_search")?;
        let span = info_span!("search.request", http.method = "POST", url = %url);
        let response = self
            .client
            .post(url)
            .json(&build_query(query))
            .send()
            .instrument(span)
            .await?;
        let body: Value = check_status(response).await?.json().await?;
        Ok(parse_hits(&body))
    }

    async fn ping(&self) -> Result<(), SearchError> {
        let span = info_span!("search.request", http.method = "GET", url = %self.base_url);
        let response = self
            .client
            .get(self.base_url.clone())
            .send()
            .instrument(span)
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
