//! Data Transfer Objects for the solver and progress contracts.
//!
//! These types define the wire shapes consumed and produced by the core:
//! solve requests/responses with diagnostics, the progress event stream, and
//! abort outcomes. Transport is out of scope; the HTTP layer merely
//! serializes these.

use serde::{Deserialize, Serialize};

use crate::models::state::Assignment;

/// Default solve budget when the request does not carry one.
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 60.0;

/// Request to solve a date range (a single day, a week, or any range).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveRequest {
    #[serde(rename = "startISO")]
    pub start_iso: String,
    #[serde(rename = "endISO", default)]
    pub end_iso: Option<String>,
    #[serde(default)]
    pub only_fill_required: bool,
    /// Total time budget in seconds; `None` means the default (60s).
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

impl SolveRequest {
    pub fn timeout_seconds(&self) -> f64 {
        self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugCheckpoint {
    pub name: String,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugTiming {
    pub total_ms: f64,
    pub checkpoints: Vec<DebugCheckpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionTime {
    pub solution: usize,
    pub time_ms: f64,
    pub objective: i64,
}

/// Breakdown of the objective into its individual components.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverSubScores {
    /// Slot-days that received at least one assignment.
    pub slots_filled: i64,
    /// Required slot-days left unfilled (slack units).
    pub slots_unfilled: i64,
    pub total_assignments: i64,
    pub preference_score: i64,
    pub time_window_score: i64,
    /// Non-adjacent same-day gaps (lower is better).
    pub gap_penalty: i64,
    pub hours_penalty: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverDebugInfo {
    pub timing: DebugTiming,
    pub solution_times: Vec<SolutionTime>,
    pub num_variables: usize,
    pub num_days: usize,
    pub num_slots: usize,
    pub solver_status: String,
    pub cpu_workers_used: usize,
    pub cpu_cores_available: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_scores: Option<SolverSubScores>,
}

/// Response from the solver containing assignments for the requested range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveResponse {
    #[serde(rename = "startISO")]
    pub start_iso: String,
    #[serde(rename = "endISO")]
    pub end_iso: String,
    pub assignments: Vec<Assignment>,
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<SolverDebugInfo>,
}

/// Progress events relayed from the solver worker to subscribers, framed as
/// `{"event": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    Connected {},
    #[serde(rename_all = "camelCase")]
    Start {
        #[serde(rename = "startISO")]
        start_iso: String,
        #[serde(rename = "endISO")]
        end_iso: Option<String>,
        timeout_seconds: f64,
    },
    Phase {
        phase: String,
        label: String,
    },
    #[serde(rename_all = "camelCase")]
    Solution {
        solution_num: usize,
        time_ms: f64,
        objective: i64,
        assignments: Vec<Assignment>,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        #[serde(rename = "startISO")]
        start_iso: String,
        #[serde(rename = "endISO")]
        end_iso: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortStatus {
    AbortRequested,
    ForceKilled,
    NoSolverRunning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortResponse {
    pub status: AbortStatus,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_request_defaults() {
        let request: SolveRequest =
            serde_json::from_value(serde_json::json!({ "startISO": "2026-01-05" })).unwrap();
        assert_eq!(request.start_iso, "2026-01-05");
        assert_eq!(request.end_iso, None);
        assert!(!request.only_fill_required);
        assert_eq!(request.timeout_seconds(), DEFAULT_TIMEOUT_SECONDS);
    }

    #[test]
    fn test_progress_event_framing() {
        let event = ProgressEvent::Phase {
            phase: "solve".to_string(),
            label: "Preparation (10/10): Solving constraints...".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "phase");
        assert_eq!(value["data"]["phase"], "solve");
    }

    #[test]
    fn test_solution_event_uses_camel_case() {
        let event = ProgressEvent::Solution {
            solution_num: 1,
            time_ms: 12.5,
            objective: -1000,
            assignments: vec![],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"]["solutionNum"], 1);
        assert_eq!(value["data"]["timeMs"], 12.5);
    }
}
