//! Drives the axum router end-to-end with in-process collaborators.

use anyhow::{Context, Result, ensure};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        Method, Request, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use freescholar::{
    api::{AppState, app},
    auth::{ResetNotice, ResetNotifier, SessionManager},
    kv::MemoryKv,
    search::{MemoryIndex, SearchSync},
    storage::MemoryStore,
};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<ResetNotice>>,
}

impl RecordingNotifier {
    fn tokens(&self) -> Vec<String> {
        self.sent
            .lock()
            .map(|sent| sent.iter().map(|notice| notice.token.clone()).collect())
            .unwrap_or_default()
    }
}

impl ResetNotifier for RecordingNotifier {
    fn send(&self, notice: &ResetNotice) -> anyhow::Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("notifier lock poisoned"))?
            .push(notice.clone());
        Ok(())
    }
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    store: Arc<MemoryStore>,
    kv: Arc<MemoryKv>,
    index: Arc<MemoryIndex>,
    notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let kv = Arc::new(MemoryKv::new());
        let index = Arc::new(MemoryIndex::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let (sync, _worker) = SearchSync::spawn(index.clone(), 64);
        let sessions = SessionManager::new(&SecretString::from("http-test-secret"), kv.clone());
        let state = Arc::new(AppState::new(
            store.clone(),
            kv.clone(),
            index.clone(),
            sessions,
            sync,
            notifier.clone(),
        ));
        Self {
            router: app(Arc::clone(&state)),
            state,
            store,
            kv,
            index,
            notifier,
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))?,
            None => request.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).context("response is not JSON")?
        };
        Ok((status, value))
    }

    async fn register_and_login(&self, username: &str, email: &str) -> Result<String> {
        let (status, _) = self
            .call(
                Method::POST,
                "/api/user/register",
                None,
                Some(json!({"username": username, "email": email, "password": "correct-horse"})),
            )
            .await?;
        ensure!(status == StatusCode::CREATED, "register: {status}");

        let (status, body) = self
            .call(
                Method::POST,
                "/api/user/login",
                None,
                Some(json!({"email": email, "password": "correct-horse"})),
            )
            .await?;
        ensure!(status == StatusCode::OK, "login: {status}");
        body["token"]
            .as_str()
            .map(str::to_string)
            .context("login response without token")
    }
}

#[tokio::test]
async fn health_reports_dependencies() -> Result<()> {
    let app = TestApp::new();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-42")
                .body(Body::empty())?,
        )
        .await?;
    ensure!(response.status() == StatusCode::OK);
    ensure!(response.headers().contains_key("x-app"));
    ensure!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            == Some("req-42")
    );

    app.kv.set_available(false);
    let (status, body) = app.call(Method::GET, "/health", None, None).await?;
    ensure!(status == StatusCode::SERVICE_UNAVAILABLE);
    ensure!(body["kv"] == "error" && body["database"] == "ok", "{body}");
    Ok(())
}

#[tokio::test]
async fn registration_validates_and_rejects_duplicates() -> Result<()> {
    let app = TestApp::new();

    let (status, body) = app
        .call(
            Method::POST,
            "/api/user/register",
            None,
            Some(json!({"username": "ada", "email": " Ada@Example.com ", "password": "correct-horse"})),
        )
        .await?;
    ensure!(status == StatusCode::CREATED, "{status}");
    ensure!(body["email"] == "ada@example.com", "{body}");

    let (status, _) = app
        .call(
            Method::POST,
            "/api/user/register",
            None,
            Some(json!({"username": "ada2", "email": "ada@example.com", "password": "correct-horse"})),
        )
        .await?;
    ensure!(status == StatusCode::CONFLICT, "{status}");

    for payload in [
        json!({"username": "bob", "email": "not-an-email", "password": "correct-horse"}),
        json!({"username": "bob", "email": "bob@example.com", "password": "short"}),
        json!({"username": "  ", "email": "bob@example.com", "password": "correct-horse"}),
    ] {
        let (status, _) = app
            .call(Method::POST, "/api/user/register", None, Some(payload))
            .await?;
        ensure!(status == StatusCode::BAD_REQUEST, "{status}");
    }
    Ok(())
}

#[tokio::test]
async fn login_failures_are_indistinguishable() -> Result<()> {
    let app = TestApp::new();
    app.register_and_login("ada", "ada@example.com").await?;

    let (wrong_password, wrong_body) = app
        .call(
            Method::POST,
            "/api/user/login",
            None,
            Some(json!({"email": "ada@example.com", "password": "nope-nope"})),
        )
        .await?;
    let (unknown, unknown_body) = app
        .call(
            Method::POST,
            "/api/user/login",
            None,
            Some(json!({"email": "ghost@example.com", "password": "nope-nope"})),
        )
        .await?;

    ensure!(wrong_password == StatusCode::UNAUTHORIZED && unknown == StatusCode::UNAUTHORIZED);
    ensure!(wrong_body == unknown_body);
    ensure!(wrong_body == json!({"error": "Unauthorized"}));
    Ok(())
}

#[tokio::test]
async fn logout_revokes_the_presented_token() -> Result<()> {
    let app = TestApp::new();
    let token = app.register_and_login("ada", "ada@example.com").await?;

    let (status, body) = app
        .call(Method::GET, "/api/user/profile", Some(&token), None)
        .await?;
    ensure!(status == StatusCode::OK && body["username"] == "ada", "{status} {body}");

    let (status, _) = app
        .call(Method::GET, "/api/user/logout", Some(&token), None)
        .await?;
    ensure!(status == StatusCode::OK);

    let (status, body) = app
        .call(Method::GET, "/api/user/profile", Some(&token), None)
        .await?;
    ensure!(status == StatusCode::UNAUTHORIZED);
    ensure!(body == json!({"error": "Unauthorized"}));

    let (status, _) = app.call(Method::GET, "/api/user/profile", None, None).await?;
    ensure!(status == StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn profile_update_keeps_absent_fields() -> Result<()> {
    let app = TestApp::new();
    let token = app.register_and_login("ada", "ada@example.com").await?;
    app.register_and_login("bob", "bob@example.com").await?;

    let (status, body) = app
        .call(
            Method::PUT,
            "/api/user/profile",
            Some(&token),
            Some(json!({"institution": "Analytical Engines", "biography": ""})),
        )
        .await?;
    ensure!(status == StatusCode::OK, "{status}");
    ensure!(body["institution"] == "Analytical Engines");
    ensure!(body["username"] == "ada" && body["email"] == "ada@example.com");

    let (status, _) = app
        .call(
            Method::PUT,
            "/api/user/profile",
            Some(&token),
            Some(json!({"username": "bob"})),
        )
        .await?;
    ensure!(status == StatusCode::CONFLICT, "{status}");
    Ok(())
}

#[tokio::test]
async fn password_reset_round_trip() -> Result<()> {
    let app = TestApp::new();
    app.register_and_login("ada", "ada@example.com").await?;

    let (status, _) = app
        .call(
            Method::POST,
            "/api/user/reset-password",
            None,
            Some(json!({"email": "ghost@example.com"})),
        )
        .await?;
    ensure!(status == StatusCode::ACCEPTED);
    ensure!(app.notifier.tokens().is_empty());

    let (status, _) = app
        .call(
            Method::POST,
            "/api/user/reset-password",
            None,
            Some(json!({"email": "ada@example.com"})),
        )
        .await?;
    ensure!(status == StatusCode::ACCEPTED);
    let token = app
        .notifier
        .tokens()
        .pop()
        .context("no reset token delivered")?;

    let confirm = format!("/api/user/reset-password/{token}");
    let (status, _) = app
        .call(
            Method::POST,
            &confirm,
            None,
            Some(json!({"new_password": "battery-staple"})),
        )
        .await?;
    ensure!(status == StatusCode::OK, "{status}");

    let (status, body) = app
        .call(
            Method::POST,
            &confirm,
            None,
            Some(json!({"new_password": "battery-staple-2"})),
        )
        .await?;
    ensure!(status == StatusCode::BAD_REQUEST);
    ensure!(body == json!({"error": "Invalid or expired token"}));

    let (status, _) = app
        .call(
            Method::POST,
            "/api/user/login",
            None,
            Some(json!({"email": "ada@example.com", "password": "battery-staple"})),
        )
        .await?;
    ensure!(status == StatusCode::OK);

    // A reset token is not a session token.
    let (status, _) = app
        .call(Method::GET, "/api/user/profile", Some(&token), None)
        .await?;
    ensure!(status == StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn publication_lifecycle() -> Result<()> {
    let app = TestApp::new();
    let token = app.register_and_login("ada", "ada@example.com").await?;
    let first = app.store.insert_author("Name1").await;
    let second = app.store.insert_author("Name3").await;

    let payload = json!({
        "title": "Attention over graphs",
        "abstract": "We study attention.",
        "doi": "10.1000/graphs",
        "publication_date": "2024-01-15",
        "journal": "Journal of Tests",
        "keywords": ["ml", "nlp"],
        "authors": [first, second],
    });

    let (status, _) = app
        .call(Method::POST, "/api/publication", None, Some(payload.clone()))
        .await?;
    ensure!(status == StatusCode::UNAUTHORIZED);

    let (status, created) = app
        .call(Method::POST, "/api/publication", Some(&token), Some(payload.clone()))
        .await?;
    ensure!(status == StatusCode::CREATED, "{status} {created}");
    let id = created["id"].as_i64().context("missing id")?;
    ensure!(created["authors"][0]["name"] == "Name1" && created["authors"][0]["order"] == 0);
    ensure!(created["authors"][1]["name"] == "Name3" && created["authors"][1]["order"] == 1);
    ensure!(created["abstract"] == "We study attention.");

    let (status, _) = app
        .call(Method::POST, "/api/publication", Some(&token), Some(payload))
        .await?;
    ensure!(status == StatusCode::CONFLICT, "{status}");

    let (status, fetched) = app
        .call(Method::GET, &format!("/api/publication/{id}"), None, None)
        .await?;
    ensure!(status == StatusCode::OK && fetched == created);

    let (status, listed) = app
        .call(Method::GET, "/api/publication?journal=Tests&page=0&limit=1000", None, None)
        .await?;
    ensure!(status == StatusCode::OK);
    ensure!(listed["total"] == 1 && listed["page"] == 1 && listed["limit"] == 10, "{listed}");

    app.state.publications.sync().flush().await;
    let (status, found) = app
        .call(Method::GET, "/api/publication?q=attention", None, None)
        .await?;
    ensure!(status == StatusCode::OK && found["total"] == 1, "{found}");
    ensure!(found["publications"][0]["authors"] == json!(["Name1", "Name3"]));

    let (status, updated) = app
        .call(
            Method::PUT,
            &format!("/api/publication/{id}"),
            Some(&token),
            Some(json!({"title": "Attention over hypergraphs", "authors": [second]})),
        )
        .await?;
    ensure!(status == StatusCode::OK, "{status} {updated}");
    ensure!(updated["authors"].as_array().map(Vec::len) == Some(1));
    ensure!(updated["keywords"].as_array().map(Vec::len) == Some(2));
    ensure!(updated["publication_date"] == "2024-01-15");

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/publication/{id}"), Some(&token), None)
        .await?;
    ensure!(status == StatusCode::OK);

    let (status, _) = app
        .call(Method::GET, &format!("/api/publication/{id}"), None, None)
        .await?;
    ensure!(status == StatusCode::NOT_FOUND);

    app.state.publications.sync().flush().await;
    ensure!(app.index.is_empty());
    Ok(())
}

#[tokio::test]
async fn publication_input_errors() -> Result<()> {
    let app = TestApp::new();
    let token = app.register_and_login("ada", "ada@example.com").await?;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/publication",
            Some(&token),
            Some(json!({"title": "X", "publication_date": "2024-01-15", "authors": [12345]})),
        )
        .await?;
    ensure!(status == StatusCode::NOT_FOUND, "{status} {body}");

    let (status, _) = app
        .call(
            Method::POST,
            "/api/publication",
            Some(&token),
            Some(json!({"title": "X", "publication_date": "January 15"})),
        )
        .await?;
    ensure!(status == StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(
            Method::GET,
            "/api/publication?from_date=yesterday",
            None,
            None,
        )
        .await?;
    ensure!(status == StatusCode::BAD_REQUEST);

    let (status, listed) = app.call(Method::GET, "/api/publication", None, None).await?;
    ensure!(status == StatusCode::OK && listed["total"] == 0 && listed["pages"] == 0);
    Ok(())
}
