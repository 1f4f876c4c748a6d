//! Axum-based HTTP surface. Transport only: every contract it exposes is
//! implemented by the core modules.

pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use error::AppError;
pub use router::create_router;
pub use state::AppState;
