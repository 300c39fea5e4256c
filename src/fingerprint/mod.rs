//! Deterministic content/parameter fingerprinting (spec.md §4.A).

pub mod error;

pub use error::FingerprintError;

use crate::hashing::hash_projection;
use crate::request::{GatewayRequest, RequestBody};
use serde_json::{Value, json};
use tracing::instrument;

/// `(content_hash, params_hash)` for a request, matching spec.md §3's fingerprint
/// fields exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub content_hash: u64,
    pub params_hash: u64,
}

/// Computes the content and parameter fingerprints for a request.
///
/// Streaming and non-streaming requests always produce different `content_hash`es (the
/// stream flag is part of the content projection), so their cache entries never collide
/// even when everything else about the request is identical.
#[instrument(skip(req), fields(request_id = %req.request_id, kind = ?req.kind))]
pub fn fingerprint(
    req: &GatewayRequest,
    is_stream: bool,
    exclude_system_prompt: bool,
) -> Result<Fingerprint, FingerprintError> {
    let content_projection = content_projection(req, is_stream, exclude_system_prompt);
    let content_hash = hash_projection(&content_projection)?;

    let params_projection = params_projection(req);
    let params_hash = hash_projection(&params_projection)?;

    Ok(Fingerprint { content_hash, params_hash })
}

fn content_projection(req: &GatewayRequest, is_stream: bool, exclude_system_prompt: bool) -> Value {
    let body = match &req.body {
        RequestBody::Chat { messages, .. } => {
            let filtered: Vec<Value> = messages
                .iter()
                .filter(|m| !(exclude_system_prompt && m.role == "system"))
                .map(|m| json!({"role": m.role, "text": m.text}))
                .collect();
            json!({"messages": filtered})
        }
        RequestBody::Text { prompt } => json!({"prompt": prompt}),
        RequestBody::Embedding { input } => json!({"input": input}),
        RequestBody::Transcription { audio_len_bytes } => json!({"audio_len_bytes": audio_len_bytes}),
        RequestBody::Speech { input_text } => json!({"input_text": input_text}),
        RequestBody::Responses { instructions, input } => {
            let instructions: Option<&String> =
                if exclude_system_prompt { None } else { instructions.as_ref() };
            json!({"instructions": instructions, "input": input})
        }
        RequestBody::Batch { request_count } => json!({"request_count": request_count}),
        RequestBody::File { file_name } => json!({"file_name": file_name}),
    };

    json!({
        "kind": req.kind,
        "model": req.model,
        "is_stream": is_stream,
        "body": body,
    })
}

/// `params_hash` excludes response-destination fields and the fallback provider list
/// (neither exists on [`crate::request::RequestParams`], so nothing to strip here) —
/// everything on the struct participates.
fn params_projection(req: &GatewayRequest) -> Value {
    serde_json::to_value(&req.params).unwrap_or(Value::Null)
}
