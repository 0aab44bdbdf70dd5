use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::coordinator::WorkflowCoordinator;
use super::domain::AgreementId;
use super::notify::NotificationDispatcher;
use super::render::DocumentRenderer;
use super::store::AgreementStore;

/// Outcome of one expiration/reminder sweep.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: Vec<AgreementId>,
    pub reminded: Vec<AgreementId>,
    pub failures: Vec<SweepFailure>,
}

/// One agreement the sweep could not process; logged, never fatal.
#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub agreement_id: AgreementId,
    pub error: String,
}

/// Walks every non-terminal agreement once: expires those past their
/// deadline, otherwise emits due reminders. Each agreement is handled under
/// the same per-agreement lock interactive operations take, so a sweep can
/// never interleave with a signer action into an invalid state.
pub fn run_sweep<S, D, N>(
    coordinator: &WorkflowCoordinator<S, D, N>,
    now: DateTime<Utc>,
) -> SweepReport
where
    S: AgreementStore,
    D: DocumentRenderer,
    N: NotificationDispatcher,
{
    let mut report = SweepReport::default();

    let candidates = match coordinator.store().sweep_candidates() {
        Ok(ids) => ids,
        Err(err) => {
            warn!("sweep skipped, store unavailable: {err}");
            return report;
        }
    };

    for id in candidates {
        report.examined += 1;

        match coordinator.expire(&id, now) {
            Ok(true) => {
                report.expired.push(id);
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                report.failures.push(SweepFailure {
                    agreement_id: id.clone(),
                    error: err.to_string(),
                });
                continue;
            }
        }

        match coordinator.remind(&id, now) {
            Ok(0) => {}
            Ok(_) => report.reminded.push(id),
            Err(err) => report.failures.push(SweepFailure {
                agreement_id: id,
                error: err.to_string(),
            }),
        }
    }

    if !report.expired.is_empty() || !report.reminded.is_empty() || !report.failures.is_empty() {
        info!(
            examined = report.examined,
            expired = report.expired.len(),
            reminded = report.reminded.len(),
            failures = report.failures.len(),
            "sweep finished"
        );
    }

    report
}
