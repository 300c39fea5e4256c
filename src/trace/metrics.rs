//! Lazily-initialized OTel counters/histograms (spec.md §4.F "Metrics").

use crate::request::{GatewayRequest, UsageBlock};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::sync::OnceLock;
use std::time::Duration;

/// Attribute set shared by every metric instrument (spec.md §4.F "Dimensions").
#[derive(Debug, Clone, Default)]
pub struct MetricDimensions {
    pub provider: String,
    pub model: String,
    pub method: &'static str,
    pub virtual_key_id: Option<String>,
    pub virtual_key_name: Option<String>,
    pub selected_key_id: Option<String>,
    pub selected_key_name: Option<String>,
    pub number_of_retries: u32,
    pub fallback_index: u32,
    pub team_id: Option<String>,
    pub team_name: Option<String>,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
}

impl MetricDimensions {
    /// Builds a dimension set from a request's tenancy/routing fields, the same source
    /// the span builder draws its `gen_ai.*` tenancy attributes from.
    pub fn from_request(req: &GatewayRequest, method: &'static str) -> Self {
        let t = &req.tenancy;
        Self {
            provider: req.provider.clone(),
            model: req.model.clone(),
            method,
            virtual_key_id: t.virtual_key_id.clone(),
            virtual_key_name: t.virtual_key_name.clone(),
            selected_key_id: t.selected_key_id.clone(),
            selected_key_name: t.selected_key_name.clone(),
            number_of_retries: t.number_of_retries,
            fallback_index: t.fallback_index,
            team_id: t.team_id.clone(),
            team_name: t.team_name.clone(),
            customer_id: t.customer_id.clone(),
            customer_name: t.customer_name.clone(),
        }
    }

    fn to_key_values(&self) -> Vec<KeyValue> {
        let mut kvs = vec![
            KeyValue::new("provider", self.provider.clone()),
            KeyValue::new("model", self.model.clone()),
            KeyValue::new("method", self.method),
            KeyValue::new("number_of_retries", self.number_of_retries as i64),
            KeyValue::new("fallback_index", self.fallback_index as i64),
        ];
        macro_rules! opt {
            ($key:literal, $field:expr) => {
                if let Some(v) = &$field {
                    kvs.push(KeyValue::new($key, v.clone()));
                }
            };
        }
        opt!("virtual_key_id", self.virtual_key_id);
        opt!("virtual_key_name", self.virtual_key_name);
        opt!("selected_key_id", self.selected_key_id);
        opt!("selected_key_name", self.selected_key_name);
        opt!("team_id", self.team_id);
        opt!("team_name", self.team_name);
        opt!("customer_id", self.customer_id);
        opt!("customer_name", self.customer_name);
        kvs
    }
}

/// The full instrument set, built once behind [`OnceLock`] the same way the teacher's
/// one-shot-guarded lazy statics work, generalized to OTel's meter-backed counters.
pub struct Metrics {
    upstream_requests_total: Counter<u64>,
    success_requests_total: Counter<u64>,
    error_requests_total: Counter<u64>,
    cache_hits_total: Counter<u64>,
    input_tokens_total: Counter<u64>,
    output_tokens_total: Counter<u64>,
    cost_total: Counter<f64>,
    upstream_latency_seconds: Histogram<f64>,
    stream_first_token_latency_seconds: Histogram<f64>,
    stream_inter_token_latency_seconds: Histogram<f64>,
    http_request_duration_seconds: Histogram<f64>,
    http_request_size_bytes: Histogram<u64>,
    http_response_size_bytes: Histogram<u64>,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    /// Returns the process-wide instrument set, building it from `meter` on first call.
    /// Every call after the first ignores `meter` and returns the already-built instance,
    /// matching spec.md's "lazy-initialized... under a one-shot guard."
    pub fn global(meter: &Meter) -> &'static Metrics {
        METRICS.get_or_init(|| Metrics::build(meter))
    }

    fn build(meter: &Meter) -> Self {
        Self {
            upstream_requests_total: meter.u64_counter("upstream_requests_total").build(),
            success_requests_total: meter.u64_counter("success_requests_total").build(),
            error_requests_total: meter.u64_counter("error_requests_total").build(),
            cache_hits_total: meter.u64_counter("cache_hits_total").build(),
            input_tokens_total: meter.u64_counter("input_tokens_total").build(),
            output_tokens_total: meter.u64_counter("output_tokens_total").build(),
            cost_total: meter.f64_counter("cost_total").build(),
            upstream_latency_seconds: meter.f64_histogram("upstream_latency_seconds").build(),
            stream_first_token_latency_seconds: meter
                .f64_histogram("stream_first_token_latency_seconds")
                .build(),
            stream_inter_token_latency_seconds: meter
                .f64_histogram("stream_inter_token_latency_seconds")
                .build(),
            http_request_duration_seconds: meter.f64_histogram("http_request_duration_seconds").build(),
            http_request_size_bytes: meter.u64_histogram("http_request_size_bytes").build(),
            http_response_size_bytes: meter.u64_histogram("http_response_size_bytes").build(),
        }
    }

    /// Records one completed (non-streaming) upstream call.
    pub fn record_upstream_completion(
        &self,
        dims: &MetricDimensions,
        latency: Duration,
        success: bool,
        cache_hit: bool,
        usage: Option<UsageBlock>,
        cost: f64,
    ) {
        let kvs = dims.to_key_values();
        self.upstream_requests_total.add(1, &kvs);
        if success {
            self.success_requests_total.add(1, &kvs);
        } else {
            self.error_requests_total.add(1, &kvs);
        }
        if cache_hit {
            self.cache_hits_total.add(1, &kvs);
        }
        if let Some(usage) = usage {
            self.input_tokens_total.add(usage.input_tokens as u64, &kvs);
            self.output_tokens_total.add(usage.output_tokens as u64, &kvs);
        }
        if cost > 0.0 {
            self.cost_total.add(cost, &kvs);
        }
        self.upstream_latency_seconds.record(latency.as_secs_f64(), &kvs);
    }

    pub fn record_stream_first_token(&self, dims: &MetricDimensions, latency: Duration) {
        self.stream_first_token_latency_seconds.record(latency.as_secs_f64(), &dims.to_key_values());
    }

    pub fn record_stream_inter_token(&self, dims: &MetricDimensions, latency: Duration) {
        self.stream_inter_token_latency_seconds.record(latency.as_secs_f64(), &dims.to_key_values());
    }

    pub fn record_http(&self, dims: &MetricDimensions, duration: Duration, request_bytes: u64, response_bytes: u64) {
        let kvs = dims.to_key_values();
        self.http_request_duration_seconds.record(duration.as_secs_f64(), &kvs);
        self.http_request_size_bytes.record(request_bytes, &kvs);
        self.http_response_size_bytes.record(response_bytes, &kvs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_include_required_and_optional_fields() {
        let dims = MetricDimensions {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            method: "chat",
            team_id: Some("t1".into()),
            ..Default::default()
        };
        let kvs = dims.to_key_values();
        assert!(kvs.iter().any(|kv| kv.key.as_str() == "provider"));
        assert!(kvs.iter().any(|kv| kv.key.as_str() == "team_id"));
        assert!(!kvs.iter().any(|kv| kv.key.as_str() == "customer_id"));
    }
}
