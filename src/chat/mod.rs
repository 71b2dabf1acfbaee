//! Chat module
//!
//! Session message storage (SQLite) and the per-turn streaming relay.

pub mod models;
pub mod relay;
pub mod store;

pub use models::{Message, MessageRole, SYSTEM_PROMPT};
pub use relay::{ChatRelay, StreamEvent};
pub use store::MessageStore;
