//! Chat-completion client for taskgraph.
//!
//! This crate wraps the OpenAI chat-completions API behind a small, owned
//! surface: hand it a prompt and a params object, get back the response
//! text. Transient failures (transport errors, 429s, 5xx) are retried with
//! exponential backoff and jitter; permanent failures surface immediately.
//!
//! The graph engine consumes this as an injected capability - it registers
//! [`OpenAiChatClient::chat`] as an API handler and never sees HTTP.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::OpenAiChatClient;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> llm::Result<()> {
//!     let client = OpenAiChatClient::from_env();
//!     let text = client
//!         .chat(
//!             json!("Give a numbered list of five famous mathematicians."),
//!             json!({ "model": "gpt-4o-mini", "n": 1, "temperature": 1 }),
//!         )
//!         .await?;
//!     println!("{text}");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod openai;
pub mod retry;

pub use error::{LlmError, Result};
pub use openai::{OpenAiChatClient, OpenAiConfig};
pub use retry::RetryPolicy;
