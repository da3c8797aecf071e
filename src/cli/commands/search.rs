use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("elasticsearch-url")
                .long("elasticsearch-url")
                .help("Elasticsearch base URL")
                .default_value("http://localhost:9200")
                .env("FREESCHOLAR_ELASTICSEARCH_URL"),
        )
        .arg(
            Arg::new("search-index")
                .long("search-index")
                .help("Name of the publications search index")
                .default_value("publications")
                .env("FREESCHOLAR_SEARCH_INDEX"),
        )
        .arg(
            Arg::new("search-queue-capacity")
                .long("search-queue-capacity")
                .help("Pending search sync jobs kept before new ones are dropped")
                .default_value("1024")
                .env("FREESCHOLAR_SEARCH_QUEUE_CAPACITY")
                .value_parser(clap::value_parser!(usize)),
        )
}
