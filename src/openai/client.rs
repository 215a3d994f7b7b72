use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use super::error::ApiError;
use super::sse::SseDecoder;
use super::types::{
    ChatChunk, ChatMessage, ChatRequest, ChatResponse, CompletionRequest, CompletionResponse,
    ErrorEnvelope, PromptInput, logit_bias, stop_sequences,
};
use crate::error::LmrunError;
use crate::model::{GenerationParams, LanguageModel, StreamOutput};

const API_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Which endpoint a model is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Legacy `POST /completions` models that continue raw text.
    Completion,
    /// `POST /chat/completions` models.
    Chat,
}

impl ModelFamily {
    /// Look up a supported model identifier.
    pub fn for_model(model: &str) -> Option<Self> {
        match model {
            "text-davinci-003" | "gpt-3.5-turbo-instruct" => Some(ModelFamily::Completion),
            "gpt-3.5-turbo" | "gpt-3.5-turbo-0301" | "gpt-4" | "gpt-4-0314" | "gpt-4-0613"
            | "gpt-4-32k" => Some(ModelFamily::Chat),
            _ => None,
        }
    }

    fn single_timeout(self) -> Duration {
        match self {
            ModelFamily::Completion => Duration::from_secs(180),
            ModelFamily::Chat => Duration::from_secs(2000),
        }
    }

    /// Longest wait for the response head or the next piece of a stream.
    /// A stream that keeps producing data may run for any total time.
    fn stream_read_timeout(self) -> Duration {
        match self {
            ModelFamily::Completion => Duration::from_secs(180),
            ModelFamily::Chat => Duration::from_secs(60),
        }
    }

    fn batch_timeout(self) -> Duration {
        Duration::from_secs(600)
    }
}

/// Client for an OpenAI-compatible completion service, bound to one model.
pub struct OpenAiClient {
    api_key: String,
    model: String,
    family: ModelFamily,
    client: Client,
    base_url: String,
    stream_read_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(model: &str, api_key: String) -> Result<Self, LmrunError> {
        Self::with_base_url(model, api_key, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (compatible services, tests).
    pub fn with_base_url(
        model: &str,
        api_key: String,
        base_url: String,
    ) -> Result<Self, LmrunError> {
        let family = ModelFamily::for_model(model)
            .ok_or_else(|| LmrunError::UnsupportedModel(model.to_string()))?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Ok(Self {
            api_key,
            model: model.to_string(),
            family,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            stream_read_timeout: family.stream_read_timeout(),
        })
    }

    #[cfg(test)]
    fn with_stream_read_timeout(mut self, timeout: Duration) -> Self {
        self.stream_read_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    fn completion_request(
        &self,
        prompt: PromptInput,
        params: &GenerationParams,
        stream: bool,
    ) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            prompt,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            stop: stop_sequences(&params.stop),
            logit_bias: logit_bias(params.disable_eos),
            stream,
        }
    }

    fn chat_request(
        &self,
        messages: Vec<ChatMessage>,
        params: &GenerationParams,
        stream: bool,
    ) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            stop: stop_sequences(&params.stop),
            logit_bias: logit_bias(params.disable_eos),
            stream,
        }
    }

    fn request<T: Serialize>(&self, endpoint: &str, body: &T) -> RequestBuilder {
        self.client
            .post(format!("{}/{endpoint}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
    }

    /// Send a request whose whole exchange, body included, must finish
    /// within `timeout`.
    async fn post<T: Serialize>(
        &self,
        endpoint: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<Response, ApiError> {
        let response = self.request(endpoint, body).timeout(timeout).send().await?;
        check_status(response).await
    }

    /// Send a streaming request. Only the wait for the response head is
    /// bounded here; `read_stream` bounds each read of the body.
    async fn post_stream<T: Serialize>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<Response, ApiError> {
        let limit = self.stream_read_timeout;
        let response = tokio::time::timeout(limit, self.request(endpoint, body).send())
            .await
            .map_err(|_| ApiError::Timeout(limit))??;
        check_status(response).await
    }

    async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<R, ApiError> {
        let response = self.post(endpoint, body, timeout).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn chat_once(
        &self,
        messages: Vec<ChatMessage>,
        params: &GenerationParams,
        timeout: Duration,
    ) -> Result<String, ApiError> {
        let req = self.chat_request(messages, params, false);
        let resp: ChatResponse = self.post_json("chat/completions", &req, timeout).await?;
        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ApiError::Parse("response has no choices".into()))
    }
}

impl LanguageModel for OpenAiClient {
    async fn infer(&self, prompt: &str, params: &GenerationParams) -> Result<String, ApiError> {
        match self.family {
            ModelFamily::Completion => {
                let req =
                    self.completion_request(PromptInput::Single(prompt.to_string()), params, false);
                let resp: CompletionResponse = self
                    .post_json("completions", &req, self.family.single_timeout())
                    .await?;
                resp.choices
                    .into_iter()
                    .next()
                    .map(|c| c.text)
                    .ok_or_else(|| ApiError::Parse("response has no choices".into()))
            }
            ModelFamily::Chat => {
                let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
                self.chat_once(messages, params, self.family.single_timeout())
                    .await
            }
        }
    }

    async fn infer_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<StreamOutput, ApiError> {
        let limit = self.stream_read_timeout;
        match self.family {
            ModelFamily::Completion => {
                let req =
                    self.completion_request(PromptInput::Single(prompt.to_string()), params, true);
                let response = self.post_stream("completions", &req).await?;
                let extract = |data: &str| {
                    let chunk: CompletionResponse = serde_json::from_str(data).ok()?;
                    Some(chunk.choices.into_iter().next()?.text)
                };
                Ok(read_stream(response, limit, extract, on_chunk).await)
            }
            ModelFamily::Chat => {
                let req = self.chat_request(vec![ChatMessage::user(prompt)], params, true);
                let response = self.post_stream("chat/completions", &req).await?;
                let extract = |data: &str| {
                    let chunk: ChatChunk = serde_json::from_str(data).ok()?;
                    let choice = chunk.choices.into_iter().next()?;
                    Some(choice.delta.content.unwrap_or_default())
                };
                Ok(read_stream(response, limit, extract, on_chunk).await)
            }
        }
    }

    async fn infer_batch(
        &self,
        prompts: &[String],
        params: &GenerationParams,
    ) -> Result<Vec<String>, ApiError> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }
        match self.family {
            ModelFamily::Completion => {
                let req =
                    self.completion_request(PromptInput::Batch(prompts.to_vec()), params, false);
                let resp: CompletionResponse = self
                    .post_json("completions", &req, self.family.batch_timeout())
                    .await?;
                let mut choices = resp.choices;
                if choices.len() != prompts.len() {
                    return Err(ApiError::Parse(format!(
                        "expected {} choices, got {}",
                        prompts.len(),
                        choices.len()
                    )));
                }
                choices.sort_by_key(|c| c.index);
                Ok(choices.into_iter().map(|c| c.text).collect())
            }
            ModelFamily::Chat => {
                // The chat endpoint takes one conversation per request.
                let mut outputs = Vec::with_capacity(prompts.len());
                for prompt in prompts {
                    let text = self
                        .chat_once(
                            vec![ChatMessage::user(prompt.as_str())],
                            params,
                            self.family.batch_timeout(),
                        )
                        .await?;
                    outputs.push(text);
                }
                Ok(outputs)
            }
        }
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(1000);
        return Err(ApiError::RateLimited {
            retry_after_ms: retry_after,
        });
    }

    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(env) => (env.error.code, env.error.message),
            Err(_) => (None, body),
        };
        return Err(ApiError::Api {
            status: status.as_u16(),
            code,
            message,
        });
    }

    Ok(response)
}

/// Drain an SSE body, concatenating the text `extract` pulls out of each
/// event. Events `extract` cannot read contribute nothing. A read that waits
/// longer than `read_timeout` ends the stream as interrupted.
async fn read_stream<F>(
    mut response: Response,
    read_timeout: Duration,
    extract: F,
    on_chunk: &mut dyn FnMut(&str),
) -> StreamOutput
where
    F: Fn(&str) -> Option<String>,
{
    let mut decoder = SseDecoder::default();
    let mut text = String::new();

    loop {
        let read = match tokio::time::timeout(read_timeout, response.chunk()).await {
            Ok(read) => read,
            Err(_) => {
                warn!(
                    timeout_ms = read_timeout.as_millis() as u64,
                    received = text.len(),
                    "stream stalled"
                );
                return StreamOutput::interrupted(text);
            }
        };
        let events = match read {
            Ok(Some(bytes)) => decoder.push(&bytes),
            Ok(None) => {
                let tail = decoder.finish();
                for data in tail.events {
                    append_event(&mut text, &extract, on_chunk, &data);
                }
                if tail.done {
                    return StreamOutput::complete(text);
                }
                warn!(received = text.len(), "stream closed before [DONE]");
                return StreamOutput::interrupted(text);
            }
            Err(e) => {
                warn!(error = %e, received = text.len(), "stream interrupted");
                return StreamOutput::interrupted(text);
            }
        };

        for data in events.events {
            append_event(&mut text, &extract, on_chunk, &data);
        }
        if events.done {
            return StreamOutput::complete(text);
        }
    }
}

fn append_event<F>(text: &mut String, extract: &F, on_chunk: &mut dyn FnMut(&str), data: &str)
where
    F: Fn(&str) -> Option<String>,
{
    match extract(data) {
        Some(piece) => {
            trace!(chunk = %piece, "stream chunk");
            if !piece.is_empty() {
                on_chunk(&piece);
            }
            text.push_str(&piece);
        }
        None => debug!(event = %data, "ignoring unreadable stream event"),
    }
}
