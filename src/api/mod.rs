use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::options,
};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    auth::{ResetNotifier, SessionManager},
    kv::KvStore,
    publications::PublicationService,
    search::{SearchIndex, SearchSync},
    storage::Store,
};

pub mod error;
pub(crate) mod handlers;
mod openapi;

pub use openapi::openapi;

const SYNC_WORKER_GRACE_SECONDS: u64 = 10;

/// Collaborators shared by every handler.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub kv: Arc<dyn KvStore>,
    pub search: Arc<dyn SearchIndex>,
    pub sessions: SessionManager,
    pub publications: PublicationService,
    pub notifier: Arc<dyn ResetNotifier>,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        kv: Arc<dyn KvStore>,
        search: Arc<dyn SearchIndex>,
        sessions: SessionManager,
        sync: SearchSync,
        notifier: Arc<dyn ResetNotifier>,
    ) -> Self {
        let publications = PublicationService::new(Arc::clone(&store), sync);
        Self {
            store,
            kv,
            search,
            sessions,
            publications,
            notifier,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sessions", &self.sessions)
            .field("publications", &self.publications)
            .finish_non_exhaustive()
    }
}

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// The full application: documented routes plus the HTTP layers.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(Any);

    let (router, _openapi) = router().split_for_parts();
    router
        .route("/health", options(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state)),
        )
}

/// Serve until SIGINT/SIGTERM, then drain the search queue.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve(port: u16, state: Arc<AppState>, sync_worker: JoinHandle<()>) -> Result<()> {
    let sync = state.publications.sync().clone();
    let app = app(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining search sync queue");
    sync.flush().await;
    let stats = sync.stats();
    info!(
        indexed = stats.indexed,
        removed = stats.removed,
        failed = stats.failed,
        dropped = stats.dropped,
        "search sync stopped"
    );
    drop(sync);
    match tokio::time::timeout(Duration::from_secs(SYNC_WORKER_GRACE_SECONDS), sync_worker).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("search sync worker ended abnormally: {err}"),
        Err(_) => warn!("search sync worker still running at exit"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
