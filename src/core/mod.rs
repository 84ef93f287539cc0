//! Core primitives.
//!
//! Building blocks shared by the coordination state machines. Nothing in
//! here reads wall-clock time.

pub mod hash;
pub mod timer;

// Re-export core types
pub use hash::{StateHash, StateHasher};
pub use timer::{TimerId, TimerQueue};
