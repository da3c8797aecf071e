pub mod logging;
mod search;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("freescholar")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8000")
                .env("FREESCHOLAR_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .long_help(
                    "PostgreSQL connection string. DATABASE_PASSWORD from the secrets file, when present, replaces the password in the DSN.",
                )
                .env("FREESCHOLAR_DSN")
                .required(true),
        )
        .arg(
            Arg::new("db-max-connections")
                .long("db-max-connections")
                .help("Maximum number of pooled database connections")
                .default_value("10")
                .env("FREESCHOLAR_DB_MAX_CONNECTIONS")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("redis-url")
                .long("redis-url")
                .help("Redis URL used for token revocation and reset tokens")
                .default_value("redis://127.0.0.1:6379")
                .env("FREESCHOLAR_REDIS_URL"),
        )
        .arg(
            Arg::new("jwt-secret")
                .long("jwt-secret")
                .help("Secret used to sign tokens, takes precedence over the secrets file")
                .env("FREESCHOLAR_JWT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("secrets-file")
                .long("secrets-file")
                .help("JSON file with SECRET_KEY and DATABASE_PASSWORD")
                .env("FREESCHOLAR_SECRETS_FILE"),
        );

    let command = search::with_args(command);
    logging::with_args(command)
}
