//! Core domain for Parley: the reducer-driven store, the conversation
//! record model, and the interfaces (storage, signal bus, clock) the
//! application layer is built against.

pub mod clock;
pub mod config;
pub mod conversation;
pub mod error;
pub mod signal;
pub mod storage;
pub mod store;

// Re-export common error type
pub use error::{ParleyError, Result};
