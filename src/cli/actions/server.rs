use crate::{
    api::{self, AppState},
    auth::{LogResetNotifier, SessionManager},
    kv::{KvStore, RedisKv},
    search::{ElasticsearchIndex, SearchIndex, SearchSync},
    storage::PgStore,
};
use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub db_max_connections: u32,
    pub redis_url: String,
    pub elasticsearch_url: String,
    pub search_index: String,
    pub search_queue_capacity: usize,
    pub jwt_secret: Option<SecretString>,
    pub secrets_file: Option<PathBuf>,
}

/// Contents of the optional secrets file.
#[derive(Deserialize, Default)]
struct SecretsFile {
    #[serde(rename = "SECRET_KEY")]
    secret_key: Option<String>,
    #[serde(rename = "DATABASE_PASSWORD")]
    database_password: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct Secrets {
    pub secret_key: Option<SecretString>,
    pub database_password: Option<SecretString>,
}

impl Secrets {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read secrets file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid secrets file {}", path.display()))
    }

    pub(crate) fn parse(raw: &str) -> Result<Self> {
        let file: SecretsFile = serde_json::from_str(raw)?;
        let secret = |value: Option<String>| {
            value
                .filter(|value| !value.is_empty())
                .map(SecretString::from)
        };
        Ok(Self {
            secret_key: secret(file.secret_key),
            database_password: secret(file.database_password),
        })
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if secrets are missing, a backing service cannot be reached, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let secrets = match &args.secrets_file {
        Some(path) => Secrets::load(path)?,
        None => Secrets::default(),
    };

    let jwt_secret = signing_secret(args.jwt_secret, secrets.secret_key)?;
    let dsn = dsn_with_password(&args.dsn, secrets.database_password.as_ref())?;

    let store = PgStore::connect(&dsn, args.db_max_connections)
        .await
        .context("Could not connect to the database")?;

    let kv: Arc<dyn KvStore> = Arc::new(
        RedisKv::connect(&args.redis_url)
            .await
            .context("Could not connect to redis")?,
    );

    let elasticsearch = ElasticsearchIndex::new(&args.elasticsearch_url, &args.search_index)
        .context("Could not build the search client")?;

    // Search is best effort: the service starts even if the index is unreachable.
    if let Err(err) = elasticsearch.ensure_index().await {
        warn!(index = %args.search_index, "Could not ensure search index: {err}");
    }

    let search: Arc<dyn SearchIndex> = Arc::new(elasticsearch);
    let (sync, sync_worker) = SearchSync::spawn(Arc::clone(&search), args.search_queue_capacity);

    let sessions = SessionManager::new(&jwt_secret, Arc::clone(&kv));

    let state = AppState::new(
        Arc::new(store),
        kv,
        search,
        sessions,
        sync,
        Arc::new(LogResetNotifier),
    );

    api::serve(args.port, Arc::new(state), sync_worker).await
}

/// The explicit flag wins over the secrets file.
fn signing_secret(
    explicit: Option<SecretString>,
    from_file: Option<SecretString>,
) -> Result<SecretString> {
    explicit.or(from_file).ok_or_else(|| {
        anyhow!("No JWT signing secret: set --jwt-secret or SECRET_KEY in the secrets file")
    })
}

fn dsn_with_password(dsn: &str, password: Option<&SecretString>) -> Result<String> {
    let Some(password) = password else {
        return Ok(dsn.to_string());
    };

    let mut dsn = Url::parse(dsn).context("Invalid DSN")?;

    dsn.set_password(Some(password.expose_secret()))
        .map_err(|()| anyhow!("Error setting password"))?;

    Ok(dsn.to_string())
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("db_max_connections", args.db_max_connections.to_string()),
        ("redis_url", redact_dsn(&args.redis_url)),
        ("elasticsearch_url", args.elasticsearch_url.clone()),
        ("search_index", args.search_index.clone()),
        (
            "search_queue_capacity",
            args.search_queue_capacity.to_string(),
        ),
        ("jwt_secret_set", args.jwt_secret.is_some().to_string()),
        (
            "secrets_file",
            args.secrets_file
                .as_ref()
                .map_or_else(|| "none".to_string(), |path| path.display().to_string()),
        ),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

/// Replace the password of a URL-shaped connection string before it is logged.
pub(crate) fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_file_parsing() {
        let secrets = Secrets::parse(r#"{"SECRET_KEY":"k","DATABASE_PASSWORD":"p@ss"}"#);
        assert!(secrets.is_ok());
        if let Ok(secrets) = secrets {
            assert_eq!(
                secrets.secret_key.map(|s| s.expose_secret().to_string()),
                Some("k".to_string())
            );
            assert_eq!(
                secrets
                    .database_password
                    .map(|s| s.expose_secret().to_string()),
                Some("p@ss".to_string())
            );
        }

        let empty = Secrets::parse(r#"{"SECRET_KEY":""}"#);
        assert!(empty.is_ok_and(|s| s.secret_key.is_none() && s.database_password.is_none()));

        assert!(Secrets::parse("not json").is_err());
    }

    #[test]
    fn explicit_secret_wins() {
        let secret = signing_secret(
            Some(SecretString::from("flag")),
            Some(SecretString::from("file")),
        );
        assert_eq!(
            secret.ok().map(|s| s.expose_secret().to_string()),
            Some("flag".to_string())
        );

        let secret = signing_secret(None, Some(SecretString::from("file")));
        assert_eq!(
            secret.ok().map(|s| s.expose_secret().to_string()),
            Some("file".to_string())
        );

        assert!(signing_secret(None, None).is_err());
    }

    #[test]
    fn password_is_injected_into_dsn() {
        let password = SecretString::from("n3w");
        let dsn = dsn_with_password("postgres://scholar:old@db:5432/freescholar", Some(&password));
        assert_eq!(
            dsn.ok(),
            Some("postgres://scholar:n3w@db:5432/freescholar".to_string())
        );

        let dsn = dsn_with_password("postgres://scholar@db/freescholar", None);
        assert_eq!(dsn.ok(), Some("postgres://scholar@db/freescholar".to_string()));

        assert!(dsn_with_password("not a url", Some(&password)).is_err());
    }

    #[test]
    fn test_redact_dsn() {
        assert_eq!(
            redact_dsn("postgres://scholar:secret@db:5432/freescholar"),
            "postgres://scholar:REDACTED@db:5432/freescholar"
        );
        assert_eq!(redact_dsn("redis://127.0.0.1:6379"), "redis://127.0.0.1:6379");
        assert_eq!(redact_dsn("::"), "invalid-dsn");
    }

    #[test]
    fn test_short_commit() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("abc"), "abc");
    }
}
