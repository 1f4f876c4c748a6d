//! Service layer: solver orchestration and progress fan-out.

pub mod progress;
pub mod solver_host;

pub use progress::{sse_frame, ProgressBus, KEEPALIVE_FRAME, SUBSCRIBER_QUEUE_CAPACITY};
pub use solver_host::SolverHost;
