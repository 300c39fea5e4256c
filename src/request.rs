//! Typed request/response variant tree.
//!
//! Request kinds are encoded as a tagged sum rather than one struct with nullable
//! branches per kind, so span-name selection, attribute extraction, and cache-payload
//! projection can all exhaustively match on [`RequestKind`] instead of checking which
//! optional field happens to be set.

use async_openai::types::{CreateChatCompletionRequest, CreateChatCompletionResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Discriminates the provider-call shape a [`GatewayRequest`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Chat,
    Text,
    Embedding,
    Transcription,
    Speech,
    Responses,
    Batch,
    File,
}

impl RequestKind {
    /// The fixed span-name string this kind maps to (spec.md §4.F).
    pub fn span_name(self) -> &'static str {
        match self {
            RequestKind::Chat => "chat",
            RequestKind::Text => "text",
            RequestKind::Embedding => "embedding",
            RequestKind::Transcription => "transcription",
            RequestKind::Speech => "speech",
            RequestKind::Responses => "responses",
            RequestKind::Batch => "batch",
            RequestKind::File => "file",
        }
    }

    /// Whether this kind's input ever yields an extractable natural-language string
    /// for fingerprint/embedding purposes. Pure embedding and transcription inputs do
    /// not (spec.md §4.B), so the semantic tier is skipped for them unconditionally.
    pub fn text_extractable(self) -> bool {
        !matches!(self, RequestKind::Embedding | RequestKind::Transcription)
    }
}

/// Non-content request parameters that participate in `params_hash` (spec.md §3).
///
/// Response-destination fields (e.g. a webhook URL) and any field whose variation must
/// not cause a miss (the fallback provider list) are deliberately absent here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    pub tool_choice: Option<Value>,
    /// Digest of the tool set, not the raw tool definitions, so tool ordering/formatting
    /// churn does not defeat the cache.
    pub tool_set_digest: Option<String>,
    pub stop_sequences: Option<Vec<String>>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub parallel_tool_calls: Option<bool>,
    pub user_id: Option<String>,
    pub voice: Option<String>,
    /// Map-valued extras, serialized in sorted-key order by the fingerprinter.
    pub extra: BTreeMap<String, Value>,
}

/// A single chat message's role and a flattened text view, used by the embedder and by
/// the fingerprint's content projection; distinct from `async_openai`'s richer message
/// type, which carries provider-specific fields this core never hashes or embeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextMessage {
    pub role: String,
    pub text: String,
}

/// The provider-call-shape payload carried by a [`GatewayRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestBody {
    Chat {
        #[serde(skip)]
        native: Option<Box<CreateChatCompletionRequest>>,
        messages: Vec<TextMessage>,
    },
    Text {
        prompt: String,
    },
    Embedding {
        input: Vec<String>,
    },
    Transcription {
        audio_len_bytes: usize,
    },
    Speech {
        input_text: String,
    },
    Responses {
        instructions: Option<String>,
        input: String,
    },
    Batch {
        request_count: usize,
    },
    File {
        file_name: String,
    },
}

/// Tenancy/routing identifiers carried alongside a request, surfaced verbatim as span
/// attributes (spec.md §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenancyInfo {
    pub virtual_key_id: Option<String>,
    pub virtual_key_name: Option<String>,
    pub selected_key_id: Option<String>,
    pub selected_key_name: Option<String>,
    pub team_id: Option<String>,
    pub team_name: Option<String>,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub number_of_retries: u32,
    pub fallback_index: u32,
}

/// A request as observed at the plugin boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub request_id: String,
    pub kind: RequestKind,
    pub provider: String,
    pub model: String,
    pub is_stream: bool,
    pub params: RequestParams,
    pub body: RequestBody,
    pub tenancy: TenancyInfo,
}

impl GatewayRequest {
    /// Projects the request to a single joined string per spec.md §4.B.1, or `None` for
    /// kinds/bodies that carry no extractable natural-language content.
    ///
    /// `exclude_system_prompt` must be applied identically here and in the fingerprint's
    /// content projection (spec.md §9's "exclude-system-prompt" note): applying it to one
    /// path only would make embeddings and fingerprints disagree on what the request
    /// "is," producing false semantic hits.
    pub fn extractable_text(&self, exclude_system_prompt: bool) -> Option<String> {
        match &self.body {
            RequestBody::Chat { messages, .. } => {
                let joined: Vec<String> = messages
                    .iter()
                    .filter(|m| !(exclude_system_prompt && m.role == "system"))
                    .map(|m| format!("{}: {}", m.role, m.text))
                    .collect();
                if joined.is_empty() { None } else { Some(joined.join("\n")) }
            }
            RequestBody::Text { prompt } => Some(prompt.clone()),
            RequestBody::Speech { input_text } => Some(input_text.clone()),
            RequestBody::Responses { instructions, input } => {
                if exclude_system_prompt {
                    Some(input.clone())
                } else {
                    match instructions {
                        Some(instr) => Some(format!("{instr}\n{input}")),
                        None => Some(input.clone()),
                    }
                }
            }
            RequestBody::Embedding { .. }
            | RequestBody::Transcription { .. }
            | RequestBody::Batch { .. }
            | RequestBody::File { .. } => None,
        }
    }
}

/// Token usage reported by the provider, used for both cost computation and the
/// `gen_ai.usage.*` span attributes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageBlock {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A response as observed at the plugin boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub request_id: String,
    pub kind: RequestKind,
    pub provider: String,
    pub model: String,
    pub usage: Option<UsageBlock>,
    pub error: Option<ResponseError>,
    /// Set by a previous cache hit so `PostLLMHook` can skip write-back (spec.md §4.E.2.1).
    pub cache_hit: bool,
    /// Provider-kind-specific fields read off when building span attributes
    /// (`gen_ai.chat.*`, `gen_ai.responses.*`, etc).
    pub extra: BTreeMap<String, Value>,
    #[serde(skip)]
    pub native_chat: Option<Box<CreateChatCompletionResponse>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub kind: String,
    pub code: Option<String>,
    pub message: String,
}

/// A single streaming chunk as observed at the `StreamChunkHook` boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// The provider's reported ordering position within the stream.
    pub chunk_index: u64,
    /// Secondary ordering key for image-generation streams (spec.md §4.D).
    pub image_index: Option<u64>,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageBlock>,
    pub error: Option<ResponseError>,
    /// Raw provider payload, passed through opaquely.
    pub payload: Value,
}

impl StreamChunk {
    /// Any of the three completion signals in spec.md §4.D: a non-nil finish reason, a
    /// terminal error, or a usage block reporting nonzero total tokens.
    pub fn is_completion_signal(&self) -> bool {
        self.finish_reason.is_some()
            || self.error.is_some()
            || self.usage.map(|u| u.total_tokens > 0).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_kind_is_text_extractable_embedding_is_not() {
        assert!(RequestKind::Chat.text_extractable());
        assert!(!RequestKind::Embedding.text_extractable());
        assert!(!RequestKind::Transcription.text_extractable());
    }

    #[test]
    fn extractable_text_joins_role_and_text() {
        let req = sample_chat_request(vec![
            ("system", "be terse"),
            ("user", "What is Bifrost?"),
        ]);
        let text = req.extractable_text(false).unwrap();
        assert_eq!(text, "system: be terse\nuser: What is Bifrost?");
    }

    #[test]
    fn extractable_text_excludes_system_prompt_when_configured() {
        let req = sample_chat_request(vec![
            ("system", "be terse"),
            ("user", "What is Bifrost?"),
        ]);
        let text = req.extractable_text(true).unwrap();
        assert_eq!(text, "user: What is Bifrost?");
    }

    #[test]
    fn extractable_text_is_none_for_embedding_requests() {
        let req = GatewayRequest {
            request_id: "r1".into(),
            kind: RequestKind::Embedding,
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            is_stream: false,
            params: RequestParams::default(),
            body: RequestBody::Embedding { input: vec!["hi".into()] },
            tenancy: TenancyInfo::default(),
        };
        assert!(req.extractable_text(false).is_none());
    }

    #[test]
    fn stream_chunk_completion_signal_detection() {
        let base = StreamChunk {
            chunk_index: 0,
            image_index: None,
            finish_reason: None,
            usage: None,
            error: None,
            payload: Value::Null,
        };

        assert!(!base.is_completion_signal());

        let with_finish = StreamChunk {
            finish_reason: Some("stop".into()),
            ..base.clone()
        };
        assert!(with_finish.is_completion_signal());

        let with_usage = StreamChunk {
            usage: Some(UsageBlock { total_tokens: 12, ..Default::default() }),
            ..base.clone()
        };
        assert!(with_usage.is_completion_signal());

        let zero_usage = StreamChunk {
            usage: Some(UsageBlock::default()),
            ..base
        };
        assert!(!zero_usage.is_completion_signal());
    }

    fn sample_chat_request(messages: Vec<(&str, &str)>) -> GatewayRequest {
        GatewayRequest {
            request_id: "r1".into(),
            kind: RequestKind::Chat,
            provider: "openai".into(),
            model: "gpt-4o".into(),
            is_stream: false,
            params: RequestParams::default(),
            body: RequestBody::Chat {
                native: None,
                messages: messages
                    .into_iter()
                    .map(|(role, text)| TextMessage { role: role.into(), text: text.into() })
                    .collect(),
            },
            tenancy: TenancyInfo::default(),
        }
    }
}
