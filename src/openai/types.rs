//! Request and response bodies for the OpenAI-compatible `completions` and
//! `chat/completions` endpoints, including their streamed chunk formats.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Token id of `<|endoftext|>` in the GPT tokenizers.
pub const END_OF_TEXT_TOKEN: &str = "50256";

/// Prompt field of a completion request: one prompt, or a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptInput {
    Single(String),
    Batch(Vec<String>),
}

/// Body for `POST /completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: PromptInput,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub logit_bias: BTreeMap<String, i32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// Response of `POST /completions`, and each streamed chunk of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user" or "assistant".
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Body for `POST /chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub logit_bias: BTreeMap<String, i32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// Non-streamed response of `POST /chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One streamed chunk of `POST /chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChatChunkChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunkChoice {
    #[serde(default)]
    pub delta: ChatDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental message content. The first chunk usually carries only `role`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Error envelope returned with non-success statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Builds the logit bias map for a request. Only end-of-text suppression is
/// supported.
pub fn logit_bias(disable_eos: bool) -> BTreeMap<String, i32> {
    let mut bias = BTreeMap::new();
    if disable_eos {
        bias.insert(END_OF_TEXT_TOKEN.to_string(), -100);
    }
    bias
}

/// `None` for an empty stop list, so the field is left out of the body.
pub fn stop_sequences(stop: &[String]) -> Option<Vec<String>> {
    if stop.is_empty() {
        None
    } else {
        Some(stop.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_request_omits_empty_optionals() {
        let req = CompletionRequest {
            model: "text-davinci-003".into(),
            prompt: PromptInput::Single("Q: 2+2?\nA:".into()),
            temperature: 0.7,
            max_tokens: 16,
            top_p: 1.0,
            stop: None,
            logit_bias: BTreeMap::new(),
            stream: false,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["prompt"], "Q: 2+2?\nA:");
        assert!(json.get("stop").is_none());
        assert!(json.get("logit_bias").is_none());
        assert!(json.get("stream").is_none());
    }

    #[test]
    fn batch_prompt_serializes_as_array() {
        let prompt = PromptInput::Batch(vec!["a".into(), "b".into()]);
        let json = serde_json::to_value(&prompt).unwrap();
        assert_eq!(json, serde_json::json!(["a", "b"]));
    }

    #[test]
    fn chat_request_carries_stream_and_bias() {
        let req = ChatRequest {
            model: "gpt-4".into(),
            messages: vec![ChatMessage::user("hi")],
            temperature: 1.0,
            max_tokens: 100,
            top_p: 1.0,
            stop: stop_sequences(&["\n\n".to_string()]),
            logit_bias: logit_bias(true),
            stream: true,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["logit_bias"]["50256"], -100);
        assert_eq!(json["stop"], serde_json::json!(["\n\n"]));
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn chat_chunk_with_role_only_delta() {
        let chunk: ChatChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"role":"assistant"},"index":0}]}"#)
                .unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
    }

    #[test]
    fn error_envelope_with_null_code() {
        let env: ErrorEnvelope = serde_json::from_str(
            r#"{"error":{"message":"boom","type":"server_error","code":null}}"#,
        )
        .unwrap();
        assert_eq!(env.error.message, "boom");
        assert!(env.error.code.is_none());
    }

    #[test]
    fn no_bias_without_disable_eos() {
        assert!(logit_bias(false).is_empty());
        assert!(stop_sequences(&[]).is_none());
    }
}
