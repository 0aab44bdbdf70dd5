use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::{AgreementId, SignerId};

/// Kinds of notification events the engine emits. Delivery (email/SMS) is an
/// external concern; the engine only publishes the facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SignatureRequested,
    Reminder,
    Completed,
    Declined,
    Cancelled,
    Expired,
}

impl NotificationKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SignatureRequested => "signature_requested",
            Self::Reminder => "reminder",
            Self::Completed => "completed",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// One outbound event, emitted after the agreement lock is released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub agreement_id: AgreementId,
    pub kind: NotificationKind,
    pub signer_id: Option<SignerId>,
    pub recipient: Option<String>,
}

impl NotificationEvent {
    pub fn broadcast(agreement_id: AgreementId, kind: NotificationKind) -> Self {
        Self {
            agreement_id,
            kind,
            signer_id: None,
            recipient: None,
        }
    }

    pub fn for_signer(
        agreement_id: AgreementId,
        kind: NotificationKind,
        signer_id: SignerId,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            agreement_id,
            kind,
            signer_id: Some(signer_id),
            recipient: Some(recipient.into()),
        }
    }

    /// Key a downstream dispatcher can use to deduplicate retried deliveries.
    pub fn idempotency_key(&self) -> String {
        match &self.signer_id {
            Some(signer) => format!("{}:{}:{}", self.agreement_id.0, self.kind.label(), signer.0),
            None => format!("{}:{}", self.agreement_id.0, self.kind.label()),
        }
    }
}

/// Transport error from a dispatcher adapter.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Fire-and-forget outbound hook. Implementations must tolerate duplicate
/// events carrying the same idempotency key.
pub trait NotificationDispatcher: Send + Sync {
    fn notify(&self, event: NotificationEvent) -> Result<(), NotifyError>;
}

/// Retry schedule for best-effort delivery.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            multiplier: 2,
        }
    }
}

/// Delivers one event, retrying with exponential backoff. A slow or broken
/// dispatcher never blocks the state transition that produced the event;
/// callers run this after the agreement lock is released.
pub async fn deliver_with_backoff(
    dispatcher: Arc<dyn NotificationDispatcher>,
    event: NotificationEvent,
    policy: BackoffPolicy,
) {
    let mut delay = policy.initial_delay;
    for attempt in 1..=policy.max_attempts.max(1) {
        match dispatcher.notify(event.clone()) {
            Ok(()) => return,
            Err(err) if attempt == policy.max_attempts.max(1) => {
                warn!(
                    key = %event.idempotency_key(),
                    attempts = attempt,
                    "dropping notification after exhausting retries: {err}"
                );
                return;
            }
            Err(err) => {
                warn!(key = %event.idempotency_key(), attempt, "notification failed, retrying: {err}");
                tokio::time::sleep(delay).await;
                delay *= policy.multiplier;
            }
        }
    }
}
