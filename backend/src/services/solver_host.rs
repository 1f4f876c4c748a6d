//! Solver orchestration.
//!
//! `SolverHost` is the single owner of process-wide solve state: the solve
//! lock (at most one active solve; callers queue on it), the cancellation
//! flags, and the progress fan-out. Each solve runs in a dedicated worker
//! thread with its own document snapshot, a bounded progress queue, and a
//! heartbeat watchdog that self-cancels the worker if the monitor stops
//! ticking. The engine honors cross-thread cancellation at move granularity,
//! which is what makes a thread-level worker (instead of a subprocess) safe.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::api::{
    AbortResponse, AbortStatus, ProgressEvent, SolveRequest, SolveResponse,
};
use crate::db::{self, FullRepository};
use crate::models::state::{Assignment, AssignmentSource};
use crate::models::time::{format_date_iso, parse_date_iso};
use crate::solver::{solve_range, SolveContext, SolveError, SolveTimer};

use super::progress::ProgressBus;

/// Bounded queue between worker and monitor.
const PROGRESS_QUEUE_CAPACITY: usize = 1000;
/// Monitor tick: drain progress, bump the heartbeat, propagate cancellation.
const MONITOR_TICK: Duration = Duration::from_millis(100);
/// Graceful worker join window, then one more second before giving up.
const JOIN_GRACEFUL: Duration = Duration::from_secs(2);
const JOIN_FORCED: Duration = Duration::from_secs(1);
/// Watchdog: missed heartbeat window before the worker self-cancels.
const WATCHDOG_STALL: Duration = Duration::from_secs(10);

enum WorkerMessage {
    Progress(ProgressEvent),
    Result(Box<SolveResponse>),
    Error(String),
}

pub struct SolverHost {
    repository: Arc<dyn FullRepository>,
    solve_lock: tokio::sync::Mutex<()>,
    is_running: AtomicBool,
    cancel: Arc<AtomicBool>,
    force_abort: Arc<AtomicBool>,
    bus: ProgressBus,
}

impl SolverHost {
    pub fn new(repository: Arc<dyn FullRepository>) -> Self {
        SolverHost {
            repository,
            solve_lock: tokio::sync::Mutex::new(()),
            is_running: AtomicBool::new(false),
            cancel: Arc::new(AtomicBool::new(false)),
            force_abort: Arc::new(AtomicBool::new(false)),
            bus: ProgressBus::new(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn FullRepository> {
        &self.repository
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> mpsc::Receiver<ProgressEvent> {
        self.bus.subscribe()
    }

    /// Abort the running solve. Graceful abort stops at the next solution
    /// boundary; forced abort stops waiting for the worker immediately and
    /// falls back to the last captured solution.
    pub fn abort(&self, force: bool) -> AbortResponse {
        if !self.is_running() {
            return AbortResponse {
                status: AbortStatus::NoSolverRunning,
                message: "No solver is currently running".to_string(),
            };
        }
        self.cancel.store(true, Ordering::SeqCst);
        if force {
            self.force_abort.store(true, Ordering::SeqCst);
            return AbortResponse {
                status: AbortStatus::ForceKilled,
                message: "Solver process terminated immediately".to_string(),
            };
        }
        AbortResponse {
            status: AbortStatus::AbortRequested,
            message: "Solver abort signal sent".to_string(),
        }
    }

    /// Run one solve for `owner`. Concurrent callers queue behind the solve
    /// lock; the running flag and cancellation state are reset per solve.
    pub async fn solve(
        &self,
        owner: &str,
        request: SolveRequest,
    ) -> Result<SolveResponse, SolveError> {
        let _guard = self.solve_lock.lock().await;
        self.is_running.store(true, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
        self.force_abort.store(false, Ordering::SeqCst);

        let result = self.run_worker(owner, &request).await;

        let (start_iso, end_iso) = response_range(&request, result.as_ref().ok());
        match &result {
            Ok(_) => self.bus.broadcast(&ProgressEvent::Complete {
                start_iso,
                end_iso,
                status: "success".to_string(),
                error: None,
            }),
            Err(e) => self.bus.broadcast(&ProgressEvent::Complete {
                start_iso,
                end_iso,
                status: "error".to_string(),
                error: Some(e.to_string()),
            }),
        }

        self.is_running.store(false, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
        result
    }

    async fn run_worker(
        &self,
        owner: &str,
        request: &SolveRequest,
    ) -> Result<SolveResponse, SolveError> {
        self.bus.broadcast(&ProgressEvent::Start {
            start_iso: request.start_iso.clone(),
            end_iso: request.end_iso.clone(),
            timeout_seconds: request.timeout_seconds(),
        });

        let (tx, rx) = std::sync::mpsc::sync_channel::<WorkerMessage>(PROGRESS_QUEUE_CAPACITY);
        let heartbeat = Arc::new(AtomicU64::new(0));
        let worker_cancel = Arc::new(AtomicBool::new(false));

        let worker = {
            let repository = Arc::clone(&self.repository);
            let owner = owner.to_string();
            let request = request.clone();
            let heartbeat = Arc::clone(&heartbeat);
            let worker_cancel = Arc::clone(&worker_cancel);
            std::thread::Builder::new()
                .name("solver-worker".to_string())
                .spawn(move || worker_main(repository, owner, request, tx, worker_cancel, heartbeat))
                .map_err(|e| SolveError::Internal(format!("failed to spawn worker: {e}")))?
        };

        let mut result: Option<SolveResponse> = None;
        let mut error: Option<String> = None;
        let mut last_solution: Option<Vec<Assignment>> = None;

        let mut handle_message = |message: WorkerMessage,
                                  result: &mut Option<SolveResponse>,
                                  error: &mut Option<String>,
                                  last_solution: &mut Option<Vec<Assignment>>| {
            match message {
                WorkerMessage::Progress(event) => {
                    if let ProgressEvent::Solution { assignments, .. } = &event {
                        *last_solution = Some(assignments.clone());
                    }
                    self.bus.broadcast(&event);
                }
                WorkerMessage::Result(response) => *result = Some(*response),
                WorkerMessage::Error(message) => *error = Some(message),
            }
        };

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                worker_cancel.store(true, Ordering::SeqCst);
            }
            let finished = worker.is_finished();
            while let Ok(message) = rx.try_recv() {
                handle_message(message, &mut result, &mut error, &mut last_solution);
            }
            if finished || self.force_abort.load(Ordering::SeqCst) {
                break;
            }
            heartbeat.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(MONITOR_TICK).await;
        }

        // Graceful join, escalating once; a worker that still will not stop
        // is left to its cancellation flag and watchdog.
        worker_cancel.store(true, Ordering::SeqCst);
        let join_task = tokio::task::spawn_blocking(move || worker.join());
        let joined = match tokio::time::timeout(JOIN_GRACEFUL, join_task).await {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                tracing::warn!("solver worker did not stop within the graceful window");
                tokio::time::sleep(JOIN_FORCED).await;
                None
            }
        };
        if let Some(Ok(Err(_))) = joined {
            error.get_or_insert_with(|| "solver worker panicked".to_string());
        }

        // Drain anything that arrived while joining.
        while let Ok(message) = rx.try_recv() {
            handle_message(message, &mut result, &mut error, &mut last_solution);
        }

        if let Some(message) = error {
            return Err(SolveError::Internal(message));
        }
        if result.is_none() {
            if let Some(assignments) = last_solution {
                let (start_iso, end_iso) = response_range(request, None);
                result = Some(SolveResponse {
                    start_iso,
                    end_iso,
                    assignments: assignments
                        .into_iter()
                        .map(|mut a| {
                            a.source = Some(AssignmentSource::Solver);
                            a
                        })
                        .collect(),
                    notes: vec![
                        "Solver was aborted — using last available solution".to_string()
                    ],
                    debug_info: None,
                });
            }
        }
        result.ok_or(SolveError::WorkerLost)
    }
}

fn response_range(request: &SolveRequest, response: Option<&SolveResponse>) -> (String, String) {
    if let Some(response) = response {
        return (response.start_iso.clone(), response.end_iso.clone());
    }
    let end_iso = request.end_iso.clone().unwrap_or_else(|| {
        parse_date_iso(&request.start_iso)
            .map(|d| format_date_iso(d + chrono::Duration::days(6)))
            .unwrap_or_else(|| request.start_iso.clone())
    });
    (request.start_iso.clone(), end_iso)
}

/// Worker body: load + normalize the owner's document, run the solve, and
/// report the outcome through the bounded queue. A watchdog thread cancels
/// the solve when the parent's heartbeat stalls.
fn worker_main(
    repository: Arc<dyn FullRepository>,
    owner: String,
    request: SolveRequest,
    tx: std::sync::mpsc::SyncSender<WorkerMessage>,
    cancel: Arc<AtomicBool>,
    heartbeat: Arc<AtomicU64>,
) {
    let done = Arc::new(AtomicBool::new(false));
    let watchdog = {
        let done = Arc::clone(&done);
        let cancel = Arc::clone(&cancel);
        std::thread::Builder::new()
            .name("solver-watchdog".to_string())
            .spawn(move || {
                let mut last_seen = heartbeat.load(Ordering::SeqCst);
                let mut stalled_since = Instant::now();
                loop {
                    std::thread::sleep(Duration::from_millis(500));
                    if done.load(Ordering::SeqCst) {
                        return;
                    }
                    let current = heartbeat.load(Ordering::SeqCst);
                    if current != last_seen {
                        last_seen = current;
                        stalled_since = Instant::now();
                        continue;
                    }
                    if stalled_since.elapsed() >= WATCHDOG_STALL {
                        tracing::warn!(
                            "solver watchdog: heartbeat stalled, cancelling worker"
                        );
                        cancel.store(true, Ordering::SeqCst);
                        return;
                    }
                }
            })
            .ok()
    };

    let progress_tx = tx.clone();
    let progress: Arc<dyn Fn(ProgressEvent) + Send + Sync> = Arc::new(move |event| {
        // Non-blocking: a full queue skips the event.
        let _ = progress_tx.try_send(WorkerMessage::Progress(event));
    });

    let cores = num_cpus::get();
    let ctx = SolveContext {
        cancel: Arc::clone(&cancel),
        progress: Arc::clone(&progress),
        request_start: Instant::now(),
        cpu_workers: cores.saturating_sub(2).max(1),
        cpu_cores: cores,
    };

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        progress(ProgressEvent::Phase {
            phase: "load_state".to_string(),
            label: "Preparation (1/10): Loading schedule data...".to_string(),
        });
        let mut timer = SolveTimer::new();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| SolveError::Internal(format!("worker runtime: {e}")))?;
        let (doc, _updated_at) = runtime
            .block_on(db::load_document(repository.as_ref(), &owner))
            .map_err(|e| match e {
                db::RepositoryError::Validation(message) => SolveError::InvalidState(message),
                other => SolveError::Internal(other.to_string()),
            })?;
        timer.checkpoint("load_state");

        solve_range(&doc, &request, &ctx, &mut timer)
    }));

    match outcome {
        Ok(Ok(response)) => {
            let _ = tx.send(WorkerMessage::Result(Box::new(response)));
        }
        Ok(Err(e)) => {
            let _ = tx.send(WorkerMessage::Error(e.to_string()));
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "solver worker panicked".to_string());
            let _ = tx.send(WorkerMessage::Error(message));
        }
    }

    done.store(true, Ordering::SeqCst);
    if let Some(watchdog) = watchdog {
        let _ = watchdog.join();
    }
}
