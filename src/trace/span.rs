//! Logical span construction (spec.md §4.F, attribute dictionary in §6).

use crate::request::{GatewayRequest, GatewayResponse, RequestBody, UsageBlock};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Fixed SERVER kind per spec.md §3's "logical trace span" definition.
pub const SPAN_KIND: &str = "SERVER";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    Ok,
    Error,
}

/// A finalized logical span, independent of any particular exporter wire format.
#[derive(Debug, Clone)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub name: &'static str,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SpanStatus,
    pub attributes: BTreeMap<String, Value>,
}

/// Projects provider/model usage to a cost, or `None` for an unpriced pair (spec.md §9:
/// an unpriced pair yields `0.0` plus a `cost_unpriced` attribute, not a hard failure).
pub trait PriceOracle: Send + Sync {
    fn price(&self, provider: &str, model: &str, usage: &UsageBlock) -> Option<f64>;
}

/// Default oracle: no pricing table, every pair is unpriced.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPriceOracle;

impl PriceOracle for NullPriceOracle {
    fn price(&self, _provider: &str, _model: &str, _usage: &UsageBlock) -> Option<f64> {
        None
    }
}

/// Accumulates a span's request-side attributes at the pre-LLM hook, then fills in
/// response-side attributes at the post-LLM hook.
pub struct SpanBuilder {
    trace_id: String,
    span_id: String,
    name: &'static str,
    start_time: DateTime<Utc>,
    attributes: BTreeMap<String, Value>,
}

impl SpanBuilder {
    /// Derives `trace_id`/`span_id` from the request-id per spec.md §4.F: a 16-byte hex
    /// trace-id truncated/zero-padded from the request-id's hash, and an 8-byte span-id
    /// hashed from `"<trace_id>-root"`.
    pub fn start(req: &GatewayRequest) -> Self {
        let trace_id = derive_trace_id(&req.request_id);
        let span_id = derive_span_id(&trace_id);

        let mut attributes = BTreeMap::new();
        attributes.insert("gen_ai.provider.name".into(), Value::String(req.provider.clone()));
        attributes.insert("gen_ai.request.model".into(), Value::String(req.model.clone()));
        insert_request_params(&mut attributes, req);
        insert_tenancy(&mut attributes, req);

        Self {
            trace_id,
            span_id,
            name: req.kind.span_name(),
            start_time: Utc::now(),
            attributes,
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Fills response-side attributes and finalizes the span. `cache_hit` and the
    /// oracle-computed cost are folded in here rather than left to the caller.
    pub fn finish(mut self, resp: &GatewayResponse, oracle: &dyn PriceOracle) -> SpanRecord {
        let status = if resp.error.is_some() { SpanStatus::Error } else { SpanStatus::Ok };

        if let Some(err) = &resp.error {
            self.attributes.insert("error.kind".into(), Value::String(err.kind.clone()));
            if let Some(code) = &err.code {
                self.attributes.insert("error.code".into(), Value::String(code.clone()));
            }
            self.attributes.insert("error.message".into(), Value::String(err.message.clone()));
        }

        if let Some(usage) = resp.usage {
            insert_usage(&mut self.attributes, &usage, resp.provider.as_str(), resp.model.as_str(), oracle);
        }

        if resp.cache_hit {
            self.attributes.insert("cache_hit".into(), Value::Bool(true));
        }

        for (key, value) in &resp.extra {
            self.attributes.entry(prefixed_extra_key(resp, key)).or_insert_with(|| value.clone());
        }

        SpanRecord {
            trace_id: self.trace_id,
            span_id: self.span_id,
            name: self.name,
            start_time: self.start_time,
            end_time: Utc::now(),
            status,
            attributes: self.attributes,
        }
    }
}

fn prefixed_extra_key(resp: &GatewayResponse, key: &str) -> String {
    format!("gen_ai.{}.{}", resp.kind.span_name(), key)
}

fn insert_request_params(attributes: &mut BTreeMap<String, Value>, req: &GatewayRequest) {
    let params = &req.params;
    macro_rules! insert_opt {
        ($attr:literal, $field:expr) => {
            if let Some(v) = $field {
                attributes.insert($attr.into(), serde_json::to_value(v).unwrap_or(Value::Null));
            }
        };
    }
    insert_opt!("gen_ai.request.temperature", params.temperature);
    insert_opt!("gen_ai.request.top_p", params.top_p);
    insert_opt!("gen_ai.request.top_k", params.top_k);
    insert_opt!("gen_ai.request.max_tokens", params.max_tokens);
    insert_opt!("gen_ai.request.stop_sequences", &params.stop_sequences);
    insert_opt!("gen_ai.request.presence_penalty", params.presence_penalty);
    insert_opt!("gen_ai.request.frequency_penalty", params.frequency_penalty);
    insert_opt!("gen_ai.request.parallel_tool_calls", params.parallel_tool_calls);
    insert_opt!("gen_ai.request.user", &params.user_id);
    insert_opt!("gen_ai.request.voice", &params.voice);
    insert_opt!("gen_ai.request.tool_choice_digest", &params.tool_set_digest);
    if let Some(choice) = &params.tool_choice {
        attributes.insert("gen_ai.request.tool_choice".into(), choice.clone());
    }

    if let RequestBody::Responses { instructions: Some(instructions), .. } = &req.body {
        attributes.insert("gen_ai.request.instructions".into(), Value::String(instructions.clone()));
    }
}

fn insert_tenancy(attributes: &mut BTreeMap<String, Value>, req: &GatewayRequest) {
    let tenancy = &req.tenancy;
    macro_rules! insert_opt_str {
        ($attr:literal, $field:expr) => {
            if let Some(v) = &$field {
                attributes.insert($attr.into(), Value::String(v.clone()));
            }
        };
    }
    insert_opt_str!("gen_ai.virtual_key_id", tenancy.virtual_key_id);
    insert_opt_str!("gen_ai.virtual_key_name", tenancy.virtual_key_name);
    insert_opt_str!("gen_ai.selected_key_id", tenancy.selected_key_id);
    insert_opt_str!("gen_ai.selected_key_name", tenancy.selected_key_name);
    insert_opt_str!("gen_ai.team_id", tenancy.team_id);
    insert_opt_str!("gen_ai.team_name", tenancy.team_name);
    insert_opt_str!("gen_ai.customer_id", tenancy.customer_id);
    insert_opt_str!("gen_ai.customer_name", tenancy.customer_name);
    attributes.insert("gen_ai.number_of_retries".into(), Value::from(tenancy.number_of_retries));
    attributes.insert("gen_ai.fallback_index".into(), Value::from(tenancy.fallback_index));
}

fn insert_usage(
    attributes: &mut BTreeMap<String, Value>,
    usage: &UsageBlock,
    provider: &str,
    model: &str,
    oracle: &dyn PriceOracle,
) {
    attributes.insert("gen_ai.usage.prompt_tokens".into(), Value::from(usage.prompt_tokens));
    attributes.insert("gen_ai.usage.completion_tokens".into(), Value::from(usage.completion_tokens));
    attributes.insert("gen_ai.usage.total_tokens".into(), Value::from(usage.total_tokens));
    attributes.insert("gen_ai.usage.input_tokens".into(), Value::from(usage.input_tokens));
    attributes.insert("gen_ai.usage.output_tokens".into(), Value::from(usage.output_tokens));

    match oracle.price(provider, model, usage) {
        Some(cost) => {
            attributes.insert("gen_ai.usage.cost".into(), Value::from(cost));
        }
        None => {
            attributes.insert("gen_ai.usage.cost".into(), Value::from(0.0));
            attributes.insert("cost_unpriced".into(), Value::Bool(true));
        }
    }
}

fn derive_trace_id(request_id: &str) -> String {
    let hash = blake3::hash(request_id.as_bytes());
    hex_of(&hash.as_bytes()[..16])
}

fn derive_span_id(trace_id: &str) -> String {
    let hash = blake3::hash(format!("{trace_id}-root").as_bytes());
    hex_of(&hash.as_bytes()[..8])
}

fn hex_of(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{RequestKind, RequestParams, ResponseError, TenancyInfo, TextMessage};
    use std::collections::BTreeMap as Map;

    fn req() -> GatewayRequest {
        GatewayRequest {
            request_id: "r1".into(),
            kind: RequestKind::Chat,
            provider: "openai".into(),
            model: "gpt-4o".into(),
            is_stream: false,
            params: RequestParams { temperature: Some(0.5), ..Default::default() },
            body: RequestBody::Chat {
                native: None,
                messages: vec![TextMessage { role: "user".into(), text: "hi".into() }],
            },
            tenancy: TenancyInfo { team_id: Some("t1".into()), ..Default::default() },
        }
    }

    fn resp(error: bool) -> GatewayResponse {
        GatewayResponse {
            request_id: "r1".into(),
            kind: RequestKind::Chat,
            provider: "openai".into(),
            model: "gpt-4o".into(),
            usage: Some(UsageBlock { total_tokens: 20, prompt_tokens: 10, completion_tokens: 10, ..Default::default() }),
            error: error.then(|| ResponseError { kind: "timeout".into(), code: None, message: "x".into() }),
            cache_hit: false,
            extra: Map::new(),
            native_chat: None,
        }
    }

    #[test]
    fn trace_and_span_ids_are_deterministic_from_request_id() {
        let a = SpanBuilder::start(&req());
        let b = SpanBuilder::start(&req());
        assert_eq!(a.trace_id, b.trace_id);
        assert_eq!(a.span_id, b.span_id);
        assert_eq!(a.trace_id.len(), 32);
        assert_eq!(a.span_id.len(), 16);
    }

    #[test]
    fn successful_response_yields_ok_status_and_unpriced_cost() {
        let span = SpanBuilder::start(&req()).finish(&resp(false), &NullPriceOracle);
        assert_eq!(span.status, SpanStatus::Ok);
        assert_eq!(span.attributes.get("cost_unpriced"), Some(&Value::Bool(true)));
        assert_eq!(span.attributes.get("gen_ai.usage.total_tokens"), Some(&Value::from(20)));
    }

    #[test]
    fn errored_response_yields_error_status_and_error_attributes() {
        let span = SpanBuilder::start(&req()).finish(&resp(true), &NullPriceOracle);
        assert_eq!(span.status, SpanStatus::Error);
        assert_eq!(span.attributes.get("error.kind"), Some(&Value::String("timeout".into())));
    }

    #[test]
    fn tenancy_and_request_attributes_are_present() {
        let span = SpanBuilder::start(&req()).finish(&resp(false), &NullPriceOracle);
        assert_eq!(span.attributes.get("gen_ai.team_id"), Some(&Value::String("t1".into())));
        assert_eq!(span.attributes.get("gen_ai.request.temperature"), Some(&Value::from(0.5)));
    }
}
