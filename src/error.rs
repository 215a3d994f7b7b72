use thiserror::Error;

/// Errors that abort a whole run. Per-attempt failures never reach this type:
/// the retry loop absorbs them.
#[derive(Debug, Error)]
pub enum LmrunError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Malformed job on line {line}: {source}")]
    JobParse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Job on line {line} has no string `input` field")]
    MissingInput { line: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
