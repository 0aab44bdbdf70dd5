use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::AgreementId;

/// Actions recorded on an agreement's audit trail, one per accepted
/// state-changing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Dispatched,
    Viewed,
    Signed,
    Declined,
    Cancelled,
    Expired,
    Completed,
    ReminderSent,
}

impl AuditAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Dispatched => "dispatched",
            Self::Viewed => "viewed",
            Self::Signed => "signed",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Completed => "completed",
            Self::ReminderSent => "reminder_sent",
        }
    }
}

/// One immutable line of agreement history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub agreement_id: AgreementId,
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    pub actor: String,
    pub details: BTreeMap<String, String>,
}

/// Append-only, timestamp-ordered history embedded in the agreement record
/// so the per-agreement lock covers the append together with the transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one entry. Wall-clock readings that run behind the previous
    /// entry are clamped so the trail stays ordered.
    pub fn append(
        &mut self,
        agreement_id: AgreementId,
        at: DateTime<Utc>,
        action: AuditAction,
        actor: impl Into<String>,
        details: BTreeMap<String, String>,
    ) {
        let at = match self.entries.last() {
            Some(last) if at < last.at => last.at,
            _ => at,
        };
        self.entries.push(AuditEntry {
            agreement_id,
            at,
            action,
            actor: actor.into(),
            details,
        });
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_action(&self) -> Option<AuditAction> {
        self.entries.last().map(|entry| entry.action)
    }
}
