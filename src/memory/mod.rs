//! Layered memory: a bounded short-term buffer with background compression
//! and a long-term associative store behind a similarity gate.

pub mod chunk;
pub mod index;
pub mod long_term;
pub mod short_term;

pub use index::{AssociativeIndex, IndexError, SqliteVectorIndex};
pub use long_term::LongTermMemory;
pub use short_term::{ChatMessage, MemoryRecord, ShortTermMemory};
