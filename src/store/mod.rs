//! File-backed persistence: projects, sessions with their message logs,
//! and per-session conversation contexts.

pub mod context;
pub mod projects;
pub mod sessions;

pub use context::{ContextStore, ConversationContext};
pub use projects::{Project, ProjectStore};
pub use sessions::{ChatSession, Message, MessageMetadata, SessionStore};
