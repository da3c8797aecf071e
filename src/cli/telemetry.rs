//! Logging, plus OTLP span export when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//!
//! Collector credentials never reach the logs: the endpoint is printed with
//! its password redacted and header values are never printed or echoed in
//! errors.

use anyhow::{Context, Result, anyhow};
use once_cell::sync::OnceCell;
use opentelemetry::{
    KeyValue, global, propagation::TextMapCompositePropagator, trace::TracerProvider as _,
};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{env::var, time::Duration};
use tonic::{
    metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;
use url::Url;

use super::actions::server::redact_dsn;

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

const EXPORT_PROTOCOL: &str = "grpc";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

// Dependencies that are only interesting when they fail.
const QUIET_TARGETS: [&str; 6] = [
    "hyper=error",
    "h2=error",
    "tokio=error",
    "sqlx=warn",
    "reqwest=warn",
    "opentelemetry_sdk=warn",
];

/// Dropped and failed index jobs are the only trace a search outage leaves,
/// so the sync worker keeps its warnings even at the quietest verbosity.
const SEARCH_SYNC_TARGET: &str = concat!(env!("CARGO_CRATE_NAME"), "::search::sync");

/// Span exporter settings read from the standard `OTEL_*` variables.
#[derive(Debug)]
struct Exporter {
    endpoint: String,
    tls_domain: Option<String>,
    headers: Vec<(String, String)>,
    instance_id: String,
    ignored_protocol: Option<String>,
}

impl Exporter {
    /// `Ok(None)` when no endpoint is configured.
    fn from_env() -> Result<Option<Self>> {
        let Some(raw) = var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        else {
            return Ok(None);
        };

        // Bare host:port means a TLS collector.
        let endpoint = if raw.contains("://") {
            raw
        } else {
            format!("https://{}", raw.trim_end_matches('/'))
        };
        let url = Url::parse(&endpoint).context("OTEL_EXPORTER_OTLP_ENDPOINT is not a valid URL")?;
        let tls_domain = if url.scheme() == "https" {
            url.host_str().map(str::to_string)
        } else {
            None
        };

        Ok(Some(Self {
            endpoint,
            tls_domain,
            headers: var("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|raw| parse_headers(&raw))
                .unwrap_or_default(),
            instance_id: var("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|_| Ulid::new().to_string()),
            ignored_protocol: var("OTEL_EXPORTER_OTLP_PROTOCOL")
                .ok()
                .filter(|protocol| protocol != EXPORT_PROTOCOL),
        }))
    }

    fn metadata(&self) -> Result<MetadataMap> {
        let mut map = MetadataMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let key = MetadataKey::<Ascii>::from_bytes(name.as_bytes())
                .map_err(|err| anyhow!("invalid OTLP header name {name}: {err}"))?;
            let value = MetadataValue::try_from(value.as_str())
                .map_err(|_| anyhow!("OTLP header {name} must have a printable ASCII value"))?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Safe to log.
    fn summary(&self) -> String {
        let names: Vec<&str> = self.headers.iter().map(|(name, _)| name.as_str()).collect();
        format!(
            "endpoint={} tls={} headers=[{}] instance={}",
            redact_dsn(&self.endpoint),
            self.tls_domain.as_deref().unwrap_or("off"),
            names.join(","),
            self.instance_id
        )
    }

    fn install(&self) -> Result<Tracer> {
        let mut builder = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(self.endpoint.as_str())
            .with_compression(Compression::Gzip)
            .with_timeout(EXPORT_TIMEOUT);

        if let Some(domain) = &self.tls_domain {
            builder = builder.with_tls_config(
                ClientTlsConfig::new()
                    .domain_name(domain.clone())
                    .with_native_roots(),
            );
        }
        if !self.headers.is_empty() {
            builder = builder.with_metadata(self.metadata()?);
        }

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(builder.build()?)
            .with_resource(resource(&self.instance_id))
            .build();

        // kept for shutdown_tracer
        let _ = TRACER_PROVIDER.set(provider.clone());

        global::set_tracer_provider(provider.clone());
        global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));

        Ok(provider.tracer(env!("CARGO_PKG_NAME")))
    }
}

/// `name=value` pairs separated by commas. Names are lowercased, since gRPC
/// metadata keys are; pairs without a name are skipped.
fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

fn resource(instance_id: &str) -> Resource {
    Resource::builder_empty()
        .with_attributes([
            KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", instance_id.to_string()),
            KeyValue::new("vcs.ref.head.revision", crate::GIT_COMMIT_HASH),
        ])
        .build()
}

fn filter(level: Level) -> Result<EnvFilter> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    for directive in QUIET_TARGETS {
        filter = filter.add_directive(directive.parse()?);
    }
    if level < Level::WARN {
        filter = filter.add_directive(format!("{SEARCH_SYNC_TARGET}=warn").parse()?);
    }
    Ok(filter)
}

/// Install the global subscriber. `RUST_LOG` overrides the verbosity-derived
/// level; `None` means errors only.
///
/// # Errors
///
/// Returns an error if the OTLP settings are invalid or a subscriber is already installed
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false)
        .pretty();
    let filter = filter(verbosity_level.unwrap_or(Level::ERROR))?;

    let Some(exporter) = Exporter::from_env()? else {
        tracing::subscriber::set_global_default(Registry::default().with(fmt_layer).with(filter))?;
        return Ok(());
    };

    let otel_layer = tracing_opentelemetry::layer().with_tracer(exporter.install()?);
    tracing::subscriber::set_global_default(
        Registry::default()
            .with(fmt_layer)
            .with(otel_layer)
            .with(filter),
    )?;

    debug!("exporting spans: {}", exporter.summary());
    if let Some(protocol) = &exporter.ignored_protocol {
        debug!("OTEL_EXPORTER_OTLP_PROTOCOL='{protocol}' ignored: spans are exported over {EXPORT_PROTOCOL}");
    }
    Ok(())
}

/// Flush and stop the span exporter, if one was installed.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = provider.shutdown();
    }
}
