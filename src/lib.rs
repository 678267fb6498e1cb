//! Group-chat conversational agent core.
//!
//! One [`session::Session`] per chat group observes incoming messages in
//! batches, updates a simulated VAD emotion state and per-user impressions,
//! maintains a layered memory (bounded short-term buffer with background
//! compression plus a gated long-term associative store), and decides via an
//! Idle/Bubble/Active automaton whether to lurk, surface with a trivial
//! acknowledgment, or engage.
//!
//! The chat platform, LLM completion service, embedding service and
//! vision-language describer are consumed behind traits / thin HTTP clients;
//! the embedding host wires message ingress and reply egress through
//! [`worker::GroupRegistry`].

pub mod adapter;
pub mod commands;
pub mod config;
pub mod emotion;
pub mod image;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod presets;
pub mod profile;
pub mod session;
pub mod worker;

pub use config::Config;
pub use session::Session;
pub use worker::GroupRegistry;
