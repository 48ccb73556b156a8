//! Memory and persistence for conversations
//!
//! - `ConversationMemory`: bounded per-session message log with a streaming slot,
//!   saved to and loaded from a JSON file
//! - `InteractionStore`: log of completed interactions used for relevance context,
//!   backed by a JSON Lines file or kept in memory

mod conversation;
mod file;
mod in_memory;
mod interactions;

pub use conversation::{ConversationMemory, MemoryStats, DEFAULT_MAX_MESSAGES};
pub use file::FileInteractionStore;
pub use in_memory::InMemoryInteractionStore;
pub use interactions::*;
