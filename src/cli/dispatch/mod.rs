use crate::cli::actions::{Action, server::Args};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8000);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let db_max_connections = matches
        .get_one::<u32>("db-max-connections")
        .copied()
        .unwrap_or(10);

    let redis_url = matches
        .get_one::<String>("redis-url")
        .cloned()
        .context("missing required argument: --redis-url")?;

    let elasticsearch_url = matches
        .get_one::<String>("elasticsearch-url")
        .cloned()
        .context("missing required argument: --elasticsearch-url")?;

    let search_index = matches
        .get_one::<String>("search-index")
        .map(|index| index.trim().to_string())
        .filter(|index| !index.is_empty())
        .context("--search-index must not be empty")?;

    let search_queue_capacity = matches
        .get_one::<usize>("search-queue-capacity")
        .copied()
        .unwrap_or(1024);

    let jwt_secret = matches
        .get_one::<String>("jwt-secret")
        .filter(|secret| !secret.is_empty())
        .map(|secret| SecretString::from(secret.clone()));

    let secrets_file = matches.get_one::<String>("secrets-file").map(PathBuf::from);

    Ok(Action::Server(Args {
        port,
        dsn,
        db_max_connections,
        redis_url,
        elasticsearch_url,
        search_index,
        search_queue_capacity,
        jwt_secret,
        secrets_file,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;

    #[test]
    fn maps_matches_to_server_action() {
        temp_env::with_vars(
            [
                ("FREESCHOLAR_JWT_SECRET", None::<&str>),
                ("FREESCHOLAR_SECRETS_FILE", None),
                ("FREESCHOLAR_SEARCH_INDEX", None),
            ],
            || {
                let matches = commands::new().get_matches_from(vec![
                    "freescholar",
                    "--dsn",
                    "postgres://localhost/freescholar",
                    "--jwt-secret",
                    "s3cret",
                    "--secrets-file",
                    "/etc/freescholar/secrets.json",
                ]);

                let result = handler(&matches);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    assert_eq!(args.dsn, "postgres://localhost/freescholar");
                    assert_eq!(args.search_index, "publications");
                    assert_eq!(
                        args.jwt_secret.as_ref().map(|s| s.expose_secret().to_string()),
                        Some("s3cret".to_string())
                    );
                    assert_eq!(
                        args.secrets_file,
                        Some(PathBuf::from("/etc/freescholar/secrets.json"))
                    );
                }
            },
        );
    }

    #[test]
    fn blank_search_index_is_rejected() {
        let matches = commands::new().get_matches_from(vec![
            "freescholar",
            "--dsn",
            "postgres://localhost/freescholar",
            "--search-index",
            "  ",
        ]);
        assert!(handler(&matches).is_err());
    }
}
