//! Client for OpenAI-compatible vision endpoints.
//!
//! Sends one image plus an instruction to a chat-completions endpoint and
//! returns the JSON object the model answers with. Knows nothing about
//! policies or vehicles; callers own the prompts and the field mapping.

mod client;
mod error;
mod models;

pub use client::{VisionClient, VisionClientConfig};
pub use error::{Error, Result};
pub use models::{ChatCompletionRequest, ChatCompletionResponse};
