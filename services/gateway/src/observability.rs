//! Logs, traces and metrics for the gateway.
//!
//! # Purpose
//! Sets up the `tracing` subscriber, W3C trace-context propagation for
//! inbound requests, and the Prometheus recorder served on the metrics
//! listener.
//!
//! # Notes
//! - Spans leave the process only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! - Every gateway counter is described at startup, so HELP lines show up on
//!   the first scrape.
//! - Setup runs once per process; repeated calls return the same handle.
use crate::api::error::REQUEST_ID_HEADER;
use anyhow::Context;
use axum::http::{HeaderMap, Request};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const SERVICE_NAME: &str = "portcullis-gateway";
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const DEFAULT_LOG_FILTER: &str = "info";

/// Counters the gateway emits, with their HELP text.
pub const GATEWAY_COUNTERS: &[(&str, &str)] = &[
    (
        "portcullis_auth_decisions_total",
        "Request guard outcomes, labelled by reject reason or allow/super.",
    ),
    (
        "portcullis_auth_state_lookups_total",
        "Auth state resolutions by source: cache, store or store_miss.",
    ),
    (
        "portcullis_auth_cache_write_failures_total",
        "Auth state cache writes that failed or timed out.",
    ),
    (
        "portcullis_rate_limit_decisions_total",
        "Rate limiter outcomes on limited routes.",
    ),
    (
        "portcullis_policy_mutations_total",
        "RBAC changes made through the admin API, by operation.",
    ),
    (
        "portcullis_policy_rows_written_total",
        "Policy rows inserted or deleted in Postgres.",
    ),
    (
        "portcullis_identity_revocations_total",
        "Session revocations applied to principals, by operation.",
    ),
];

static TRACING_INIT: OnceLock<()> = OnceLock::new();
static PROPAGATOR_INIT: OnceLock<()> = OnceLock::new();
static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_observability(service_name: &str) -> anyhow::Result<PrometheusHandle> {
    TRACING_INIT.get_or_init(|| init_tracing(service_name));
    let handle = install_metrics_recorder()?;
    describe_gateway_metrics();
    Ok(handle)
}

fn init_tracing(service_name: &str) {
    install_propagator();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let otel_layer = otlp_tracer_provider(service_name).map(|provider| {
        let tracer = provider.tracer(service_name.to_string());
        global::set_tracer_provider(provider);
        tracing_opentelemetry::layer().with_tracer(tracer)
    });
    // Another subscriber may already be installed (tests); keep it.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(otel_layer)
        .try_init();
}

fn otlp_tracer_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var(OTLP_ENDPOINT_ENV).ok()?;
    if endpoint.trim().is_empty() {
        return None;
    }
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
    {
        Ok(exporter) => exporter,
        Err(err) => {
            // The subscriber is not installed yet.
            eprintln!("span export to {endpoint} disabled: {err}");
            return None;
        }
    };
    let resource = Resource::builder_empty()
        .with_attributes(resource_attributes(service_name))
        .build();
    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

fn resource_attributes(service_name: &str) -> Vec<KeyValue> {
    let mut attrs = vec![KeyValue::new("service.name", service_name.to_string())];
    let instance =
        std::env::var("PORTCULLIS_SERVICE_INSTANCE_ID").or_else(|_| std::env::var("HOSTNAME"));
    if let Ok(value) = instance {
        attrs.push(KeyValue::new("service.instance.id", value));
    }
    for (var, key) in [
        ("K8S_NAMESPACE_NAME", "k8s.namespace.name"),
        ("K8S_POD_NAME", "k8s.pod.name"),
        ("DEPLOYMENT_ENVIRONMENT", "deployment.environment"),
    ] {
        if let Ok(value) = std::env::var(var) {
            attrs.push(KeyValue::new(key, value));
        }
    }
    attrs
}

fn install_propagator() {
    PROPAGATOR_INIT.get_or_init(|| {
        global::set_text_map_propagator(TraceContextPropagator::new());
    });
}

/// Root span for an inbound request, parented to the caller's trace context
/// when one was sent.
pub fn http_request_span<B>(request: &Request<B>) -> tracing::Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let span = tracing::info_span!(
        "http.request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id
    );
    span.set_parent(trace_context_from_headers(request.headers()));
    span
}

pub fn trace_context_from_headers(headers: &HeaderMap) -> opentelemetry::Context {
    install_propagator();
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

fn install_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = RECORDER.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("install prometheus recorder")?;
    Ok(RECORDER.get_or_init(|| handle).clone())
}

fn describe_gateway_metrics() {
    for (name, help) in GATEWAY_COUNTERS {
        metrics::describe_counter!(*name, *help);
    }
}

fn metrics_router(handle: PrometheusHandle) -> axum::Router {
    axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

/// Serve `/metrics` on `addr` until the task is dropped.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_metrics_with_listener(handle, listener, std::future::pending()).await
}

pub(crate) async fn serve_metrics_with_listener<F>(
    handle: PrometheusHandle,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, metrics_router(handle).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}
