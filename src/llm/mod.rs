//! LLM completion service interface.

pub mod client;

pub use client::{complete_full, Completion, CompletionClient, Message, OpenAiClient};
