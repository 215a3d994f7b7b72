//! The remote language model as a single capability.
//!
//! [`LanguageModel`] is what the retry loop talks to. The HTTP client in
//! [`crate::openai`] implements it, and tests plug in scripted models.

use crate::openai::ApiError;

/// Sampling and length options for a single generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Sampling randomness.
    pub temperature: f32,
    /// Generation length cap, in tokens.
    pub max_tokens: u32,
    /// Sequences at which the service stops generating.
    pub stop: Vec<String>,
    /// Nucleus sampling threshold.
    pub top_p: f32,
    /// Suppress the natural end-of-sequence token.
    pub disable_eos: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 3333,
            stop: Vec::new(),
            top_p: 1.0,
            disable_eos: false,
        }
    }
}

/// Text collected from one streaming call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutput {
    pub text: String,
    /// The stream broke off before the service signalled the end.
    pub interrupted: bool,
}

impl StreamOutput {
    pub fn complete(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            interrupted: false,
        }
    }

    pub fn interrupted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            interrupted: true,
        }
    }
}

/// Capability surface of a remote completion service.
///
/// `infer_stream` only returns `Err` when no response body could be read at
/// all. A body that breaks off midway is `Ok` with `interrupted` set.
/// `on_chunk` receives each piece of text as it arrives.
pub trait LanguageModel {
    async fn infer(&self, prompt: &str, params: &GenerationParams) -> Result<String, ApiError>;

    async fn infer_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<StreamOutput, ApiError>;

    async fn infer_batch(
        &self,
        prompts: &[String],
        params: &GenerationParams,
    ) -> Result<Vec<String>, ApiError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted model used by the retry and driver tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// One canned reply for `infer_stream`.
    pub enum Reply {
        Complete(&'static str),
        Interrupted(&'static str),
        Fail(fn() -> ApiError),
    }

    /// A streaming call as the model saw it.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Call {
        pub prompt: String,
        pub max_tokens: u32,
    }

    /// Replays `Reply`s in order; once the script runs out every call
    /// completes with `fallback`.
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Reply>>,
        fallback: &'static str,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<Reply>) -> Self {
            Self::with_fallback(replies, "")
        }

        pub fn with_fallback(replies: Vec<Reply>, fallback: &'static str) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub fn context_overflow() -> ApiError {
        ApiError::Api {
            status: 400,
            code: Some(crate::openai::error::CONTEXT_LENGTH_CODE.into()),
            message: "This model's maximum context length is 8192 tokens.".into(),
        }
    }

    pub fn server_error() -> ApiError {
        ApiError::Api {
            status: 500,
            code: None,
            message: "upstream failure".into(),
        }
    }

    impl LanguageModel for ScriptedModel {
        async fn infer(&self, prompt: &str, params: &GenerationParams) -> Result<String, ApiError> {
            self.infer_stream(prompt, params, &mut |_| {})
                .await
                .map(|out| out.text)
        }

        async fn infer_stream(
            &self,
            prompt: &str,
            params: &GenerationParams,
            on_chunk: &mut dyn FnMut(&str),
        ) -> Result<StreamOutput, ApiError> {
            self.calls.lock().unwrap().push(Call {
                prompt: prompt.to_string(),
                max_tokens: params.max_tokens,
            });
            let reply = self.replies.lock().unwrap().pop_front();
            let output = match reply {
                Some(Reply::Complete(text)) => StreamOutput::complete(text),
                Some(Reply::Interrupted(text)) => StreamOutput::interrupted(text),
                Some(Reply::Fail(make)) => return Err(make()),
                None => StreamOutput::complete(self.fallback),
            };
            if !output.text.is_empty() {
                on_chunk(&output.text);
            }
            Ok(output)
        }

        async fn infer_batch(
            &self,
            prompts: &[String],
            params: &GenerationParams,
        ) -> Result<Vec<String>, ApiError> {
            let mut out = Vec::with_capacity(prompts.len());
            for prompt in prompts {
                out.push(self.infer(prompt, params).await?);
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Reply, ScriptedModel};
    use super::*;

    #[test]
    fn default_params() {
        let params = GenerationParams::default();
        assert_eq!(params.max_tokens, 3333);
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.top_p, 1.0);
        assert!(params.stop.is_empty());
        assert!(!params.disable_eos);
    }

    #[test]
    fn stream_output_constructors() {
        assert!(!StreamOutput::complete("a").interrupted);
        assert!(StreamOutput::interrupted("a").interrupted);
    }

    #[tokio::test]
    async fn scripted_model_replays_then_falls_back() {
        let model = ScriptedModel::with_fallback(vec![Reply::Interrupted("part")], "rest");
        let params = GenerationParams::default();

        let mut chunks = Vec::new();
        let first = model
            .infer_stream("p", &params, &mut |c: &str| chunks.push(c.to_string()))
            .await
            .unwrap();
        assert_eq!(first, StreamOutput::interrupted("part"));
        assert_eq!(chunks, vec!["part"]);

        let batch = model
            .infer_batch(&["a".to_string(), "b".to_string()], &params)
            .await
            .unwrap();
        assert_eq!(batch, vec!["rest", "rest"]);
        assert_eq!(model.calls().len(), 3);
    }
}
