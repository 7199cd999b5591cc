//! Single-writer async runtime and event stream APIs.

/// Event stream types emitted by the runtime.
pub mod events;
/// Handle and command loop implementation.
pub mod handle;

pub use events::DocumentEvent;
pub use handle::{DocumentHandle, RuntimeConfig, RuntimeError, spawn_document};
