//! Clients for the external model services: chat completion, text
//! embedding and the vision-language describer.

pub mod embeddings;
pub mod openai;
pub mod provider;
pub mod sanitize;
pub mod vlm;

pub use embeddings::{SiliconFlowEmbeddings, TextEmbedder};
pub use openai::OpenAiClient;
pub use provider::{LlmError, LlmProvider};
