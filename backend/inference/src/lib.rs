//! Vision inference over OpenAI-compatible chat-completions endpoints.

pub mod client;
pub mod messages;

pub use client::{classify_status, ChatCompletionsClient, Endpoint, PromptSettings};
pub use messages::{build_body, build_messages, extract_text};
