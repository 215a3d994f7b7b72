pub mod client;
pub mod error;
mod sse;
pub mod types;

pub use client::OpenAiClient;
pub use error::ApiError;
