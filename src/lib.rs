// === Public Modules (The Canonical Paths) ===
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod retry;
pub mod rules;
pub mod store;
pub mod transport;

// === Private Implementation Details ===
mod macros;

// === Convenience ===
pub use crate::engine::{ApplyOutcome, Ctx, PositionEngine, ReplayOutcome};
pub use crate::error::{SwapbookError, SwapbookResult};
