//! Videoserver reconciliation background task.
//!
//! A failed start or stop can leave videoserver resources that no domain
//! record accounts for. This task periodically walks the gateway meetings
//! and asks each meeting's actor to tear down:
//! 1. Gateway meetings whose meeting is gone or inactive
//! 2. Gateway sessions without a live participant
//!
//! Work is routed through the meeting actors, so a pass never races a
//! join or leave on the same meeting.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is cancelled. An iteration in
//! progress finishes its current meeting first.

use crate::engine::MeetingEngine;
use crate::observability::metrics;
use crate::services::ReconcileReport;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Run reconciliation every `interval` until cancelled.
#[instrument(skip_all, name = "engine.task.reconciliation")]
pub async fn start_reconciliation(
    engine: Arc<MeetingEngine>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "engine.task.reconciliation",
        interval_seconds = interval.as_secs(),
        "Starting reconciliation task"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_reconciliation(&engine, &cancel_token).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "engine.task.reconciliation",
                    "Reconciliation task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "engine.task.reconciliation", "Reconciliation task stopped");
}

/// Run a single reconciliation pass. Errors are logged, never propagated.
pub async fn run_reconciliation(
    engine: &MeetingEngine,
    cancel_token: &CancellationToken,
) -> ReconcileReport {
    let mut total = ReconcileReport::default();

    let meeting_ids = match engine.gateway_meeting_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            error!(
                target: "engine.task.reconciliation",
                error = %e,
                "Failed to list videoserver meetings"
            );
            return total;
        }
    };

    for meeting_id in meeting_ids {
        if cancel_token.is_cancelled() {
            break;
        }

        match engine.reconcile_meeting(&meeting_id).await {
            Ok(report) => {
                for _ in 0..report.sessions {
                    metrics::record_reconciled("gateway_session");
                }
                for _ in 0..report.meetings {
                    metrics::record_reconciled("gateway_meeting");
                }
                total.sessions += report.sessions;
                total.meetings += report.meetings;
            }
            Err(e) => {
                warn!(
                    target: "engine.task.reconciliation",
                    meeting_id = %meeting_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Failed to reconcile meeting"
                );
            }
        }
    }

    if total != ReconcileReport::default() {
        info!(
            target: "engine.task.reconciliation",
            meetings = total.meetings,
            sessions = total.sessions,
            "Reconciliation pass tore down orphaned resources"
        );
    }
    total
}
