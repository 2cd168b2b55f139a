//! # tabula-llm
//!
//! LLM streaming adapter for the tabula agents.
//!
//! - [`provider`]: the [`Provider`] trait, [`TurnRequest`] and normalized [`ProtocolEvent`]s
//! - [`sse`]: Server-Sent Events line parser
//! - [`window`]: guarantees one created/completed window per turn
//! - [`retry`]: exponential backoff before the first event
//! - [`error_parsing`]: HTTP error classification
//! - [`openai`]: the `OpenAI` Responses API provider
//! - [`testing`]: a scripted provider for tests and offline runs

#![deny(unsafe_code)]

pub mod error_parsing;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod sse;
pub mod testing;
pub mod window;

pub use provider::{
    InputItem, ProtocolEvent, ProtocolEventStream, Provider, ProviderError, ProviderResult,
    ToolSchema, TurnRequest,
};
pub use retry::{RetryConfig, RetryingProvider};
pub use sse::SseParserOptions;
