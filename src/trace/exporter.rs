//! OTLP span/metric export (spec.md §4.F "Export", §6 "OpenTelemetry export").

use super::error::ExportError;
use super::metrics::Metrics;
use super::span::{SpanRecord, SpanStatus};
use crate::config::{Config, OtlpProtocol, TlsPolicy};
use opentelemetry::trace::{SpanId, Status, TraceId, Tracer, TracerProvider as _};
use opentelemetry::{KeyValue, metrics::Meter};
use opentelemetry_otlp::{MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use opentelemetry_semantic_conventions::resource::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::warn;

/// Owns the trace/metric SDK pipelines and spawns one export worker per finalized span,
/// tracked in a [`JoinSet`] so shutdown can drain them (spec.md's "WaitGroup-equivalent").
pub struct Exporter {
    tracer_provider: SdkTracerProvider,
    tracer: SdkTracer,
    meter_provider: SdkMeterProvider,
    metrics: &'static Metrics,
    background_timeout: Duration,
    in_flight: JoinSet<()>,
}

impl Exporter {
    pub fn new(config: &Config) -> Result<Self, ExportError> {
        let resource = build_resource(config);

        let span_exporter = build_span_exporter(config)?;
        let tracer_provider = SdkTracerProvider::builder()
            .with_batch_exporter(span_exporter)
            .with_resource(resource.clone())
            .build();
        let tracer = tracer_provider.tracer("gatewatch");

        let metric_exporter = build_metric_exporter(config)?;
        let reader = PeriodicReader::builder(metric_exporter)
            .with_interval(Duration::from_secs(config.metrics_push_interval_secs))
            .build();
        let meter_provider = SdkMeterProvider::builder().with_reader(reader).with_resource(resource).build();
        let meter: Meter = meter_provider.meter("gatewatch");
        let metrics = Metrics::global(&meter);

        Ok(Self {
            tracer_provider,
            tracer,
            meter_provider,
            metrics,
            background_timeout: Duration::from_secs(config.background_timeout_secs),
            in_flight: JoinSet::new(),
        })
    }

    pub fn metrics(&self) -> &'static Metrics {
        self.metrics
    }

    /// Spawns a background worker exporting `span`. Failures are logged and dropped —
    /// never retried (spec.md §4.F "Export").
    pub fn export(&mut self, span: SpanRecord) {
        let tracer = self.tracer.clone();
        let timeout = self.background_timeout;
        self.in_flight.spawn(async move {
            let result = tokio::time::timeout(timeout, async {
                emit_span(&tracer, span);
            })
            .await;
            if result.is_err() {
                warn!("span export timed out");
            }
        });
    }

    /// Cancels nothing itself (the plugin harness owns the root token) but drains every
    /// in-flight export task and flushes both SDK pipelines.
    pub async fn drain(&mut self) {
        while self.in_flight.join_next().await.is_some() {}
        if let Err(e) = self.tracer_provider.force_flush() {
            warn!(error = %e, "trace provider flush failed during shutdown");
        }
        if let Err(e) = self.meter_provider.force_flush() {
            warn!(error = %e, "meter provider flush failed during shutdown");
        }
    }
}

fn emit_span(tracer: &SdkTracer, record: SpanRecord) {
    let attributes: Vec<KeyValue> = record
        .attributes
        .iter()
        .map(|(k, v)| KeyValue::new(k.clone(), value_to_otel(v)))
        .collect();

    let mut builder = tracer.span_builder(record.name);
    builder.trace_id = parse_trace_id(&record.trace_id);
    builder.span_id = parse_span_id(&record.span_id);
    builder.start_time = Some(record.start_time.into());
    builder.end_time = Some(record.end_time.into());
    builder.attributes = Some(attributes);
    builder.status = match record.status {
        SpanStatus::Ok => Status::Ok,
        SpanStatus::Error => Status::error(""),
    };
    // spec.md §3 fixes kind=SERVER; `span_builder` already defaults to it.
    let span = tracer.build(builder);
    drop(span);
}

fn value_to_otel(value: &serde_json::Value) -> opentelemetry::Value {
    match value {
        serde_json::Value::Bool(b) => opentelemetry::Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                opentelemetry::Value::I64(i)
            } else {
                opentelemetry::Value::F64(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => opentelemetry::Value::String(s.clone().into()),
        other => opentelemetry::Value::String(other.to_string().into()),
    }
}

fn parse_trace_id(hex: &str) -> Option<TraceId> {
    let bytes = parse_hex::<16>(hex)?;
    Some(TraceId::from_bytes(bytes))
}

fn parse_span_id(hex: &str) -> Option<SpanId> {
    let bytes = parse_hex::<8>(hex)?;
    Some(SpanId::from_bytes(bytes))
}

fn parse_hex<const N: usize>(hex: &str) -> Option<[u8; N]> {
    if hex.len() != N * 2 {
        return None;
    }
    let mut out = [0u8; N];
    for i in 0..N {
        out[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

fn build_resource(config: &Config) -> Resource {
    let mut builder = Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attribute(KeyValue::new(SERVICE_VERSION, config.service_version.clone()))
        .with_attribute(KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, config.environment.clone()));
    for (key, value) in &config.resource_attributes {
        builder = builder.with_attribute(KeyValue::new(key.clone(), value.clone()));
    }
    builder.build()
}

fn build_span_exporter(config: &Config) -> Result<SpanExporter, ExportError> {
    let headers = config.otlp_headers.clone().into_iter().collect();
    match config.otlp_protocol {
        OtlpProtocol::Http => SpanExporter::builder()
            .with_http()
            .with_endpoint(&config.otlp_endpoint)
            .with_headers(headers)
            .with_http_client(build_reqwest_client(&config.otlp_tls)?)
            .build()
            .map_err(|e| ExportError::Build(e.to_string())),
        OtlpProtocol::Grpc => {
            let mut builder = SpanExporter::builder().with_tonic().with_endpoint(&config.otlp_endpoint);
            if let Some(tls) = build_tonic_tls(&config.otlp_tls)? {
                builder = builder.with_tls_config(tls);
            }
            builder.build().map_err(|e| ExportError::Build(e.to_string()))
        }
    }
}

fn build_metric_exporter(config: &Config) -> Result<MetricExporter, ExportError> {
    let headers = config.otlp_headers.clone().into_iter().collect();
    match config.otlp_protocol {
        OtlpProtocol::Http => MetricExporter::builder()
            .with_http()
            .with_endpoint(&config.otlp_endpoint)
            .with_headers(headers)
            .with_http_client(build_reqwest_client(&config.otlp_tls)?)
            .build()
            .map_err(|e| ExportError::Build(e.to_string())),
        OtlpProtocol::Grpc => {
            let mut builder = MetricExporter::builder().with_tonic().with_endpoint(&config.otlp_endpoint);
            if let Some(tls) = build_tonic_tls(&config.otlp_tls)? {
                builder = builder.with_tls_config(tls);
            }
            builder.build().map_err(|e| ExportError::Build(e.to_string()))
        }
    }
}

/// Applies the CA-file/insecure/system-roots priority order (spec.md §6) to the HTTP
/// transport's underlying `reqwest` client.
fn build_reqwest_client(tls: &TlsPolicy) -> Result<reqwest::Client, ExportError> {
    let mut builder = reqwest::Client::builder();
    match tls {
        TlsPolicy::CaFile(path) => {
            let pem = std::fs::read(path).map_err(|e| ExportError::Build(e.to_string()))?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| ExportError::Build(e.to_string()))?;
            builder = builder.add_root_certificate(cert).min_tls_version(reqwest::tls::Version::TLS_1_2);
        }
        TlsPolicy::Insecure => {
            builder = builder.danger_accept_invalid_certs(true);
        }
        TlsPolicy::SystemRoots => {
            builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_2);
        }
    }
    builder.build().map_err(|e| ExportError::Build(e.to_string()))
}

/// Same priority order for the gRPC transport's `tonic` channel. Returns `None` for
/// `Insecure` (a plaintext channel needs no TLS config at all).
fn build_tonic_tls(tls: &TlsPolicy) -> Result<Option<tonic::transport::ClientTlsConfig>, ExportError> {
    match tls {
        TlsPolicy::CaFile(path) => {
            let pem = std::fs::read(path).map_err(|e| ExportError::Build(e.to_string()))?;
            let ca = tonic::transport::Certificate::from_pem(pem);
            Ok(Some(tonic::transport::ClientTlsConfig::new().ca_certificate(ca)))
        }
        TlsPolicy::Insecure => Ok(None),
        TlsPolicy::SystemRoots => Ok(Some(tonic::transport::ClientTlsConfig::new().with_native_roots())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips_through_trace_and_span_id_parsing() {
        let trace_hex = "0123456789abcdef0123456789abcdef";
        let span_hex = "0123456789abcdef";
        assert!(parse_trace_id(trace_hex).is_some());
        assert!(parse_span_id(span_hex).is_some());
        assert!(parse_trace_id("too-short").is_none());
    }
}
