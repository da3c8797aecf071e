use axum::{
    Json,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{
        AppState,
        error::{ErrorBody, MessageBody, json_body},
    },
    error::Result,
    publications::{PublicationInput, input::parse_date},
    search::{SearchDocument, SearchQuery},
    storage::{Publication, PublicationFilter},
};

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Full-text query; when set the search index is used.
    q: Option<String>,
    /// 1-based page number.
    page: Option<String>,
    /// Page size, 1 to 100.
    limit: Option<String>,
    /// Journal substring (relational listing only).
    journal: Option<String>,
    /// `YYYY-MM-DD`, inclusive (relational listing only).
    from_date: Option<String>,
    /// `YYYY-MM-DD`, inclusive (relational listing only).
    to_date: Option<String>,
}

/// Pagination resolved from query parameters. Unparsable or out-of-range
/// values fall back to the defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Paging {
    pub page: i64,
    pub limit: i64,
}

impl Paging {
    pub(crate) fn from_params(page: Option<&str>, limit: Option<&str>) -> Self {
        let page = page
            .and_then(|page| page.trim().parse::<i64>().ok())
            .filter(|page| *page >= 1)
            .unwrap_or(1);
        let limit = limit
            .and_then(|limit| limit.trim().parse::<i64>().ok())
            .filter(|limit| (1..=MAX_PAGE_SIZE).contains(limit))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        Self { page, limit }
    }

    pub(crate) fn offset(self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub(crate) fn pages(self, total: i64) -> i64 {
        total / self.limit + i64::from(total % self.limit != 0)
    }
}

/// A listed publication: the stored record, or the search document when the
/// listing came from a full-text query.
#[derive(ToSchema, Serialize, Debug)]
#[serde(untagged)]
pub enum ListedPublication {
    Stored(Publication),
    Indexed(SearchDocument),
}

#[derive(ToSchema, Serialize, Debug)]
pub struct PublicationList {
    publications: Vec<ListedPublication>,
    total: i64,
    page: i64,
    limit: i64,
    pages: i64,
}

fn optional_date(value: Option<&str>) -> Result<Option<chrono::NaiveDate>> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => parse_date(value).map(Some),
        _ => Ok(None),
    }
}

#[utoipa::path(
    get,
    path= "/api/publication",
    params(ListParams),
    responses (
        (status = 200, description = "Page of publications", body = PublicationList),
        (status = 400, description = "Malformed date filter", body = ErrorBody),
        (status = 502, description = "Search engine failure", body = ErrorBody),
    ),
    tag= "publication"
)]
#[instrument(skip(state))]
pub async fn list_publications(
    state: Extension<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<PublicationList>> {
    let paging = Paging::from_params(params.page.as_deref(), params.limit.as_deref());
    let text = params.q.as_deref().map(str::trim).unwrap_or_default();

    let (publications, total) = if text.is_empty() {
        let filter = PublicationFilter {
            journal: params
                .journal
                .map(|journal| journal.trim().to_string())
                .filter(|journal| !journal.is_empty()),
            from_date: optional_date(params.from_date.as_deref())?,
            to_date: optional_date(params.to_date.as_deref())?,
            offset: paging.offset(),
            limit: paging.limit,
        };
        let page = state.publications.list(&filter).await?;
        (
            page.publications
                .into_iter()
                .map(ListedPublication::Stored)
                .collect(),
            page.total,
        )
    } else {
        let hits = state
            .search
            .search(&SearchQuery {
                text: text.to_string(),
                from: u64::try_from(paging.offset()).unwrap_or(0),
                size: u64::try_from(paging.limit).unwrap_or(0),
            })
            .await?;
        (
            hits.documents
                .into_iter()
                .map(ListedPublication::Indexed)
                .collect(),
            i64::try_from(hits.total).unwrap_or(i64::MAX),
        )
    };

    Ok(Json(PublicationList {
        publications,
        total,
        page: paging.page,
        limit: paging.limit,
        pages: paging.pages(total),
    }))
}

#[utoipa::path(
    get,
    path= "/api/publication/{id}",
    params(("id" = i64, Path, description = "Publication id")),
    responses (
        (status = 200, description = "Publication with ordered authors and keywords", body = Publication),
        (status = 404, description = "Publication not found", body = ErrorBody),
    ),
    tag= "publication"
)]
#[instrument(skip(state))]
pub async fn get_publication(
    state: Extension<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Publication>> {
    Ok(Json(state.publications.get(id).await?))
}

#[utoipa::path(
    post,
    path= "/api/publication",
    request_body = PublicationInput,
    responses (
        (status = 201, description = "Publication created", body = Publication),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 404, description = "Author not found", body = ErrorBody),
        (status = 409, description = "DOI already exists", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "publication"
)]
#[instrument(skip(state, headers, payload))]
pub async fn create_publication(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<PublicationInput>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let principal = state.sessions.authorize(&headers).await?;
    let input = json_body(payload)?;
    let publication = state.publications.create(&principal, input).await?;
    Ok((StatusCode::CREATED, Json(publication)))
}

#[utoipa::path(
    put,
    path= "/api/publication/{id}",
    request_body = PublicationInput,
    params(("id" = i64, Path, description = "Publication id")),
    responses (
        (status = 200, description = "Publication updated", body = Publication),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 404, description = "Publication or author not found", body = ErrorBody),
        (status = 409, description = "DOI already exists", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "publication"
)]
#[instrument(skip(state, headers, payload))]
pub async fn update_publication(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    payload: std::result::Result<Json<PublicationInput>, JsonRejection>,
) -> Result<Json<Publication>> {
    let principal = state.sessions.authorize(&headers).await?;
    let input = json_body(payload)?;
    Ok(Json(state.publications.update(&principal, id, input).await?))
}

#[utoipa::path(
    delete,
    path= "/api/publication/{id}",
    params(("id" = i64, Path, description = "Publication id")),
    responses (
        (status = 200, description = "Publication deleted", body = MessageBody),
        (status = 401, description = "Missing or invalid token", body = ErrorBody),
        (status = 404, description = "Publication not found", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "publication"
)]
#[instrument(skip(state, headers))]
pub async fn delete_publication(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<MessageBody>> {
    let principal = state.sessions.authorize(&headers).await?;
    state.publications.delete(&principal, id).await?;
    Ok(MessageBody::new("Publication deleted successfully"))
}
