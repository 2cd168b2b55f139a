//! `OpenAI` Responses API provider.

pub mod provider;
pub mod stream_handler;
pub mod types;

pub use provider::{OpenAiConfig, OpenAiProvider};
