//! The provider dispatch layer: uniform contract, per-family adapters, and
//! the engine that drives admission, retries, timeouts, and accounting.

pub mod adapters;
pub mod engine;
pub mod request;

pub use engine::DispatchEngine;
pub use request::{ChatMessage, ChatRequest, ChatResponse, ChatRole, FinishReason, TokenUsage};
