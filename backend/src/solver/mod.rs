//! Schedule solver: model construction, search, and the solve entry point.

pub mod context;
pub mod driver;
pub mod engine;
pub mod model;
pub mod timer;

pub use context::{collect_slot_contexts, SlotContext};
pub use driver::{solve_range, SolveContext};
pub use engine::SearchStatus;
pub use timer::SolveTimer;

/// Errors surfaced by the solve pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    /// Malformed or inverted date range; the caller's fault.
    #[error("{0}")]
    InvalidRange(String),
    /// The persisted document failed structural validation.
    #[error("invalid schedule document: {0}")]
    InvalidState(String),
    /// The worker died without producing a result or cached solution.
    #[error("Solver process terminated without result")]
    WorkerLost,
    #[error("{0}")]
    Internal(String),
}
