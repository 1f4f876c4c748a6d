//! Orchestrator tests: end-to-end solves through the host, progress
//! streaming, abort semantics, and error surfacing.

mod support;

use std::sync::Arc;

use shiftplan_rust::api::{AbortStatus, ProgressEvent, SolveRequest};
use shiftplan_rust::db::{FullRepository, LocalRepository, StateRepository};
use shiftplan_rust::normalize::normalize;
use shiftplan_rust::services::{sse_frame, SolverHost};
use shiftplan_rust::solver::SolveError;

use support::*;

fn request(start_iso: &str, end_iso: &str) -> SolveRequest {
    SolveRequest {
        start_iso: start_iso.to_string(),
        end_iso: Some(end_iso.to_string()),
        only_fill_required: true,
        timeout_seconds: Some(10.0),
    }
}

async fn seeded_host() -> Arc<SolverHost> {
    let repo: Arc<dyn FullRepository> = Arc::new(LocalRepository::new());
    let doc = build_solver_doc(
        vec![make_clinician("clin-1", &["section-a"])],
        vec![make_slot("slot-a", "col-mon-1", 1, "08:00", "16:00")],
        vec![mon_col_band()],
        plain_settings(),
    );
    let (doc, _) = normalize(doc);
    repo.save_state("alice", &serde_json::to_string(&doc).unwrap())
        .await
        .unwrap();
    Arc::new(SolverHost::new(repo))
}

#[tokio::test]
async fn test_solve_through_host_produces_assignments() {
    let host = seeded_host().await;
    let response = host
        .solve("alice", request("2026-01-05", "2026-01-05"))
        .await
        .expect("solve succeeds");
    assert_eq!(response.assignments.len(), 1);
    assert_eq!(response.assignments[0].row_id, "slot-a");
    assert!(!host.is_running());
}

#[tokio::test]
async fn test_progress_events_arrive_in_order() {
    let host = seeded_host().await;
    let mut rx = host.subscribe();

    host.solve("alice", request("2026-01-05", "2026-01-05"))
        .await
        .expect("solve succeeds");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(ProgressEvent::Connected {})));
    let mut saw_start = false;
    let mut saw_phase = false;
    let mut saw_solution = false;
    let mut complete_status = None;
    for event in &events {
        match event {
            ProgressEvent::Start { .. } => {
                assert!(!saw_phase, "start must precede phases");
                saw_start = true;
            }
            ProgressEvent::Phase { .. } => saw_phase = true,
            ProgressEvent::Solution { assignments, .. } => {
                saw_solution = true;
                assert!(!assignments.is_empty());
            }
            ProgressEvent::Complete { status, .. } => {
                complete_status = Some(status.clone());
            }
            ProgressEvent::Connected {} => {}
        }
    }
    assert!(saw_start);
    assert!(saw_phase);
    assert!(saw_solution);
    assert_eq!(complete_status.as_deref(), Some("success"));

    // Every event frames as an SSE data line.
    for event in &events {
        let frame = sse_frame(event);
        assert!(frame.starts_with("data: "));
        assert!(frame.ends_with("\n\n"));
    }
}

#[tokio::test]
async fn test_abort_without_running_solver() {
    let host = seeded_host().await;
    let response = host.abort(false);
    assert_eq!(response.status, AbortStatus::NoSolverRunning);
    let response = host.abort(true);
    assert_eq!(response.status, AbortStatus::NoSolverRunning);
}

#[tokio::test]
async fn test_invalid_state_surfaces_as_error() {
    let repo: Arc<dyn FullRepository> = Arc::new(LocalRepository::new());
    repo.save_state("alice", "{\"not\": \"a schedule\"}")
        .await
        .unwrap();
    let host = SolverHost::new(repo);

    let err = host
        .solve("alice", request("2026-01-05", "2026-01-05"))
        .await
        .unwrap_err();
    assert!(matches!(err, SolveError::Internal(_) | SolveError::InvalidState(_)));
}

#[tokio::test]
async fn test_missing_document_is_seeded_with_default() {
    // The default document has one required Monday slot and one qualified
    // clinician, so solving a Monday yields one assignment.
    let repo: Arc<dyn FullRepository> = Arc::new(LocalRepository::new());
    let host = SolverHost::new(repo);

    let response = host
        .solve("fresh-user", request("2026-01-05", "2026-01-05"))
        .await
        .expect("solve succeeds");
    assert_eq!(response.assignments.len(), 1);
    assert_eq!(response.assignments[0].clinician_id, "alex-hartmann");
}

#[tokio::test]
async fn test_abort_during_solve_still_returns_a_result() {
    // A larger model keeps the search busy long enough for the abort to land
    // mid-solve; if the solve wins the race the abort reports that nothing
    // is running. Either way the solve call itself must return cleanly.
    let repo: Arc<dyn FullRepository> = Arc::new(LocalRepository::new());
    let clinicians: Vec<_> = (0..12)
        .map(|i| make_clinician(&format!("clin-{i}"), &["section-a"]))
        .collect();
    let slots: Vec<_> = (0..30)
        .map(|i| make_slot(&format!("slot-{i}"), "col-mon-1", 2, "08:00", "09:00"))
        .collect();
    let doc = build_solver_doc(clinicians, slots, vec![mon_col_band()], plain_settings());
    let (doc, _) = normalize(doc);
    repo.save_state("alice", &serde_json::to_string(&doc).unwrap())
        .await
        .unwrap();
    let host = Arc::new(SolverHost::new(repo));

    let solve_host = Arc::clone(&host);
    let solve_task = tokio::spawn(async move {
        solve_host
            .solve(
                "alice",
                SolveRequest {
                    start_iso: "2026-01-05".to_string(),
                    end_iso: Some("2026-01-05".to_string()),
                    only_fill_required: false,
                    timeout_seconds: Some(30.0),
                },
            )
            .await
    });

    for _ in 0..100 {
        if host.is_running() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let abort = host.abort(false);
    assert!(matches!(
        abort.status,
        AbortStatus::AbortRequested | AbortStatus::NoSolverRunning
    ));

    let response = solve_task.await.unwrap().expect("solve returns a result");
    assert!(!response.notes.is_empty() || !response.assignments.is_empty());
    assert!(!host.is_running());
}

#[tokio::test]
async fn test_invalid_range_error_from_host() {
    let host = seeded_host().await;
    let err = host
        .solve(
            "alice",
            SolveRequest {
                start_iso: "2026-01-10".to_string(),
                end_iso: Some("2026-01-05".to_string()),
                only_fill_required: true,
                timeout_seconds: Some(5.0),
            },
        )
        .await
        .unwrap_err();
    // The worker converts the range error into an error message.
    assert!(matches!(err, SolveError::Internal(_)));
}
