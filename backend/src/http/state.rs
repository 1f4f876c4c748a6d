//! Application state for the HTTP server.

use std::sync::Arc;

use crate::db::FullRepository;
use crate::services::SolverHost;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn FullRepository>,
    pub solver_host: Arc<SolverHost>,
}

impl AppState {
    pub fn new(repository: Arc<dyn FullRepository>) -> Self {
        let solver_host = Arc::new(SolverHost::new(Arc::clone(&repository)));
        Self {
            repository,
            solver_host,
        }
    }
}
