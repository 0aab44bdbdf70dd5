use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::audit::{AuditAction, AuditEntry};
use super::capture::SignatureArtifact;
use super::domain::{
    AgreementId, AgreementRecord, AgreementStatus, AuthMethod, AuthProof, CaptureProvenance,
    SignerId, SignerRole, SignerStatus, WorkflowKind,
};
use super::notify::{NotificationDispatcher, NotificationEvent, NotificationKind};
use super::render::{DocumentRenderer, RenderError};
use super::store::{AgreementStore, StoreError};

/// Transition failures surfaced to the caller attempting an invalid action.
/// The agreement itself is left untouched. State errors carry the current
/// status so a client can explain why the action was rejected.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("cannot {action} while agreement is {}: {detail}", .status.label())]
    State {
        action: &'static str,
        status: AgreementStatus,
        detail: String,
    },
    #[error("agreement expired at {expires_at}")]
    RequestExpired { expires_at: DateTime<Utc> },
    #[error("agreement was declined")]
    RequestDeclined,
    #[error("agreement was cancelled")]
    RequestCancelled,
    #[error(
        "authentication insufficient: signer requires {}, got {}",
        .required.label(),
        .provided.label()
    )]
    AuthenticationInsufficient {
        required: AuthMethod,
        provided: AuthMethod,
    },
    #[error("signer {} is not part of this agreement", .0 .0)]
    SignerNotFound(SignerId),
    #[error("rendered document no longer matches the digest bound at creation")]
    DocumentMismatch,
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read-only projection of one signer for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct SignerView {
    pub id: SignerId,
    pub name: String,
    pub email: String,
    pub role: SignerRole,
    pub role_label: &'static str,
    pub required: bool,
    pub status: SignerStatus,
    pub status_label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_method_used: Option<AuthMethod>,
    pub has_signature: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<CaptureProvenance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<String>,
}

/// Read-only projection of one agreement, including the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AgreementView {
    pub id: AgreementId,
    pub status: AgreementStatus,
    pub status_label: &'static str,
    pub workflow: WorkflowKind,
    pub document_digest: String,
    pub sender: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub signers: Vec<SignerView>,
    pub audit: Vec<AuditEntry>,
}

impl From<&AgreementRecord> for AgreementView {
    fn from(record: &AgreementRecord) -> Self {
        Self {
            id: record.id.clone(),
            status: record.status,
            status_label: record.status.label(),
            workflow: record.workflow,
            document_digest: record.document_digest.clone(),
            sender: record.sender.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            completed_at: record.completed_at,
            signers: record
                .signers
                .iter()
                .map(|signer| SignerView {
                    id: signer.id.clone(),
                    name: signer.name.clone(),
                    email: signer.email.clone(),
                    role: signer.role,
                    role_label: signer.role.label(),
                    required: signer.required,
                    status: signer.status,
                    status_label: signer.status.label(),
                    signed_at: signer.signed_at,
                    auth_method_used: signer.auth_method_used,
                    has_signature: signer.artifact.is_some(),
                    provenance: signer.provenance.clone(),
                    decline_reason: signer.decline_reason.clone(),
                })
                .collect(),
            audit: record.audit.entries().to_vec(),
        }
    }
}

/// The state machine owning every agreement transition. Each operation is
/// atomic under the agreement's own lock; whichever caller acquires the lock
/// first wins a race, and the loser sees a state error describing where the
/// agreement actually is.
pub struct WorkflowCoordinator<S, D, N> {
    store: Arc<S>,
    renderer: Arc<D>,
    notifier: Arc<N>,
}

impl<S, D, N> Clone for WorkflowCoordinator<S, D, N> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            renderer: self.renderer.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

impl<S, D, N> WorkflowCoordinator<S, D, N>
where
    S: AgreementStore,
    D: DocumentRenderer,
    N: NotificationDispatcher,
{
    pub fn new(store: Arc<S>, renderer: Arc<D>, notifier: Arc<N>) -> Self {
        Self {
            store,
            renderer,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Registers a freshly instantiated draft with the store.
    pub fn admit(&self, record: AgreementRecord) -> Result<AgreementView, SigningError> {
        let view = AgreementView::from(&record);
        self.store.insert(record)?;
        Ok(view)
    }

    /// Draft -> sent. Activates the first signer (sequential) or every
    /// signer (parallel) and seeds the reminder clock.
    pub fn dispatch(
        &self,
        id: &AgreementId,
        now: DateTime<Utc>,
    ) -> Result<AgreementView, SigningError> {
        let cell = self.store.lease(id)?;
        let mut events = Vec::new();
        let view = {
            let mut record = cell.lock().expect("agreement mutex poisoned");
            dispatch_locked(&mut record, now, &mut events)?;
            AgreementView::from(&*record)
        };
        self.publish(events);
        Ok(view)
    }

    /// Marks a signer as having opened the document. The first view moves
    /// the agreement from sent to in_progress. Re-viewing is an accepted
    /// no-op with no audit entry.
    pub fn view(
        &self,
        id: &AgreementId,
        signer_id: &SignerId,
        now: DateTime<Utc>,
    ) -> Result<AgreementView, SigningError> {
        let cell = self.store.lease(id)?;
        let view = {
            let mut record = cell.lock().expect("agreement mutex poisoned");
            view_locked(&mut record, signer_id, now)?;
            AgreementView::from(&*record)
        };
        Ok(view)
    }

    /// Records a signature for one signer, advances a sequential chain, and
    /// runs the completion check.
    pub fn sign(
        &self,
        id: &AgreementId,
        signer_id: &SignerId,
        artifact: SignatureArtifact,
        proof: AuthProof,
        now: DateTime<Utc>,
    ) -> Result<AgreementView, SigningError> {
        let cell = self.store.lease(id)?;
        let mut events = Vec::new();
        // Events staged before a completion failure (e.g. the next signer's
        // activation in a sequential chain) are already reflected in the
        // record, so they must still go out.
        let outcome = {
            let mut record = cell.lock().expect("agreement mutex poisoned");
            let mut outcome =
                sign_locked(&mut record, signer_id, artifact, proof, now, &mut events);
            if outcome.is_ok()
                && record.all_required_signed()
                && record.status != AgreementStatus::Completed
            {
                outcome = complete_locked(&mut record, self.renderer.as_ref(), now, &mut events);
            }
            outcome.map(|()| AgreementView::from(&*record))
        };
        self.publish(events);
        outcome
    }

    /// One signer declining terminates the whole agreement.
    pub fn decline(
        &self,
        id: &AgreementId,
        signer_id: &SignerId,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<AgreementView, SigningError> {
        let cell = self.store.lease(id)?;
        let mut events = Vec::new();
        let view = {
            let mut record = cell.lock().expect("agreement mutex poisoned");
            decline_locked(&mut record, signer_id, reason, now, &mut events)?;
            AgreementView::from(&*record)
        };
        self.publish(events);
        Ok(view)
    }

    /// Sender-only cancellation, allowed until the agreement is terminal.
    pub fn cancel(
        &self,
        id: &AgreementId,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<AgreementView, SigningError> {
        let cell = self.store.lease(id)?;
        let mut events = Vec::new();
        let view = {
            let mut record = cell.lock().expect("agreement mutex poisoned");
            cancel_locked(&mut record, actor, now, &mut events)?;
            AgreementView::from(&*record)
        };
        self.publish(events);
        Ok(view)
    }

    /// Scheduler-driven expiry. Idempotent: expiring an already terminal
    /// agreement changes nothing and appends nothing.
    pub fn expire(&self, id: &AgreementId, now: DateTime<Utc>) -> Result<bool, SigningError> {
        let cell = self.store.lease(id)?;
        let mut events = Vec::new();
        let changed = {
            let mut record = cell.lock().expect("agreement mutex poisoned");
            expire_locked(&mut record, now, &mut events)
        };
        self.publish(events);
        Ok(changed)
    }

    /// Scheduler-driven reminder emission. Returns how many signer
    /// reminders were sent.
    pub fn remind(&self, id: &AgreementId, now: DateTime<Utc>) -> Result<usize, SigningError> {
        let cell = self.store.lease(id)?;
        let mut events = Vec::new();
        let sent = {
            let mut record = cell.lock().expect("agreement mutex poisoned");
            remind_locked(&mut record, now, &mut events)
        };
        self.publish(events);
        Ok(sent)
    }

    /// Read-only view with status, signer statuses, and the audit trail.
    pub fn agreement(&self, id: &AgreementId) -> Result<AgreementView, SigningError> {
        let cell = self.store.lease(id)?;
        let record = cell.lock().expect("agreement mutex poisoned");
        Ok(AgreementView::from(&*record))
    }

    /// Delivery happens after the lock is released; a broken dispatcher
    /// never stalls a transition.
    fn publish(&self, events: Vec<NotificationEvent>) {
        for event in events {
            let key = event.idempotency_key();
            if let Err(err) = self.notifier.notify(event) {
                warn!(%key, "notification dispatch failed: {err}");
            }
        }
    }
}

fn terminal_error(action: &'static str, record: &AgreementRecord) -> SigningError {
    match record.status {
        AgreementStatus::Declined => SigningError::RequestDeclined,
        AgreementStatus::Cancelled => SigningError::RequestCancelled,
        AgreementStatus::Expired => SigningError::RequestExpired {
            expires_at: record.expires_at,
        },
        status => SigningError::State {
            action,
            status,
            detail: "agreement already reached a terminal status".to_string(),
        },
    }
}

fn waiting_detail(record: &AgreementRecord) -> String {
    let step = record.active_step().unwrap_or(0);
    format!("waiting on signer {} of {}", step + 1, record.signers.len())
}

fn dispatch_locked(
    record: &mut AgreementRecord,
    now: DateTime<Utc>,
    events: &mut Vec<NotificationEvent>,
) -> Result<(), SigningError> {
    if record.status.is_terminal() {
        return Err(terminal_error("dispatch", record));
    }
    if record.status != AgreementStatus::Draft {
        return Err(SigningError::State {
            action: "dispatch",
            status: record.status,
            detail: "agreement was already dispatched".to_string(),
        });
    }
    if record.past_deadline(now) {
        return Err(SigningError::RequestExpired {
            expires_at: record.expires_at,
        });
    }

    let activate = match record.workflow {
        WorkflowKind::Parallel => record.signers.len(),
        WorkflowKind::Sequential => 1,
    };
    for signer in record.signers.iter_mut().take(activate) {
        if signer.status == SignerStatus::Pending {
            signer.status = SignerStatus::Sent;
            events.push(NotificationEvent::for_signer(
                record.id.clone(),
                NotificationKind::SignatureRequested,
                signer.id.clone(),
                signer.email.clone(),
            ));
        }
    }

    record.status = AgreementStatus::Sent;
    record.reminders.last_sent_at = Some(now);

    let mut details = BTreeMap::new();
    details.insert("activated".to_string(), activate.to_string());
    let actor = record.sender.clone();
    record
        .audit
        .append(record.id.clone(), now, AuditAction::Dispatched, actor, details);
    debug!(agreement = %record.id.0, "dispatched");
    Ok(())
}

fn view_locked(
    record: &mut AgreementRecord,
    signer_id: &SignerId,
    now: DateTime<Utc>,
) -> Result<(), SigningError> {
    if record.status.is_terminal() {
        return Err(terminal_error("view", record));
    }
    if record.status == AgreementStatus::Draft {
        return Err(SigningError::State {
            action: "view",
            status: record.status,
            detail: "agreement has not been dispatched".to_string(),
        });
    }
    if record.past_deadline(now) {
        return Err(SigningError::RequestExpired {
            expires_at: record.expires_at,
        });
    }

    let waiting = waiting_detail(record);
    let workflow = record.workflow;
    let status = record.status;
    let id = record.id.clone();
    let signer = record
        .signer_mut(signer_id)
        .ok_or_else(|| SigningError::SignerNotFound(signer_id.clone()))?;

    match signer.status {
        // Idempotent re-view: accepted, nothing recorded.
        SignerStatus::Viewed | SignerStatus::Signed => return Ok(()),
        SignerStatus::Declined => {
            return Err(SigningError::State {
                action: "view",
                status,
                detail: "signer already declined".to_string(),
            })
        }
        SignerStatus::Pending if workflow == WorkflowKind::Sequential => {
            return Err(SigningError::State {
                action: "view",
                status,
                detail: waiting,
            })
        }
        SignerStatus::Pending | SignerStatus::Sent => {
            signer.status = SignerStatus::Viewed;
        }
    }

    let actor = signer.email.clone();
    let mut details = BTreeMap::new();
    details.insert("signer".to_string(), signer_id.0.clone());

    if record.status == AgreementStatus::Sent {
        record.status = AgreementStatus::InProgress;
    }
    record
        .audit
        .append(id, now, AuditAction::Viewed, actor, details);
    Ok(())
}

fn sign_locked(
    record: &mut AgreementRecord,
    signer_id: &SignerId,
    artifact: SignatureArtifact,
    proof: AuthProof,
    now: DateTime<Utc>,
    events: &mut Vec<NotificationEvent>,
) -> Result<(), SigningError> {
    if record.status.is_terminal() {
        return Err(terminal_error("sign", record));
    }
    if record.status == AgreementStatus::Draft {
        return Err(SigningError::State {
            action: "sign",
            status: record.status,
            detail: "agreement has not been dispatched".to_string(),
        });
    }
    if record.past_deadline(now) {
        return Err(SigningError::RequestExpired {
            expires_at: record.expires_at,
        });
    }

    let position = record
        .signers
        .iter()
        .position(|signer| &signer.id == signer_id)
        .ok_or_else(|| SigningError::SignerNotFound(signer_id.clone()))?;

    let signer = &record.signers[position];
    match signer.status {
        SignerStatus::Signed => {
            return Err(SigningError::State {
                action: "sign",
                status: record.status,
                detail: "signer already signed".to_string(),
            })
        }
        SignerStatus::Declined => {
            return Err(SigningError::State {
                action: "sign",
                status: record.status,
                detail: "signer already declined".to_string(),
            })
        }
        SignerStatus::Pending | SignerStatus::Sent | SignerStatus::Viewed => {}
    }

    if record.workflow == WorkflowKind::Sequential && record.active_step() != Some(position) {
        return Err(SigningError::State {
            action: "sign",
            status: record.status,
            detail: waiting_detail(record),
        });
    }

    let signer = &record.signers[position];
    if !signer.can_sign() {
        return Err(SigningError::State {
            action: "sign",
            status: record.status,
            detail: "signer has not been activated yet".to_string(),
        });
    }

    if !proof.verified || proof.method.strength() < signer.minimum_auth.strength() {
        return Err(SigningError::AuthenticationInsufficient {
            required: signer.minimum_auth,
            provided: proof.method,
        });
    }

    let id = record.id.clone();
    let signer = &mut record.signers[position];
    signer.status = SignerStatus::Signed;
    signer.signed_at = Some(now);
    signer.auth_method_used = Some(proof.method);
    signer.provenance = Some(artifact.provenance.clone());
    signer.artifact = Some(artifact);

    let actor = signer.email.clone();
    let mut details = BTreeMap::new();
    details.insert("signer".to_string(), signer_id.0.clone());
    details.insert("auth_method".to_string(), proof.method.label().to_string());

    if record.status == AgreementStatus::Sent {
        record.status = AgreementStatus::InProgress;
    }
    record
        .audit
        .append(id.clone(), now, AuditAction::Signed, actor, details);
    debug!(agreement = %id.0, signer = %signer_id.0, "signature recorded");

    // Sequential chains hand the baton to the next signer in order.
    if record.workflow == WorkflowKind::Sequential {
        if let Some(next) = record.active_step() {
            let next_signer = &mut record.signers[next];
            if next_signer.status == SignerStatus::Pending {
                next_signer.status = SignerStatus::Sent;
                events.push(NotificationEvent::for_signer(
                    id,
                    NotificationKind::SignatureRequested,
                    next_signer.id.clone(),
                    next_signer.email.clone(),
                ));
            }
        }
    }

    Ok(())
}

/// Completion check: idempotent, run after every signer transition while
/// the lock is still held. Re-verifies the document digest bound at
/// creation before marking the agreement completed.
fn complete_locked<D: DocumentRenderer + ?Sized>(
    record: &mut AgreementRecord,
    renderer: &D,
    now: DateTime<Utc>,
    events: &mut Vec<NotificationEvent>,
) -> Result<(), SigningError> {
    let rendered = renderer.render(&record.snapshot, &record.field_values)?;
    if rendered.digest != record.document_digest {
        return Err(SigningError::DocumentMismatch);
    }

    record.status = AgreementStatus::Completed;
    record.completed_at = Some(now);
    record.audit.append(
        record.id.clone(),
        now,
        AuditAction::Completed,
        "system",
        BTreeMap::new(),
    );
    events.push(NotificationEvent::broadcast(
        record.id.clone(),
        NotificationKind::Completed,
    ));
    debug!(agreement = %record.id.0, "completed");
    Ok(())
}

fn decline_locked(
    record: &mut AgreementRecord,
    signer_id: &SignerId,
    reason: String,
    now: DateTime<Utc>,
    events: &mut Vec<NotificationEvent>,
) -> Result<(), SigningError> {
    if record.status.is_terminal() {
        return Err(terminal_error("decline", record));
    }
    if record.status == AgreementStatus::Draft {
        return Err(SigningError::State {
            action: "decline",
            status: record.status,
            detail: "agreement has not been dispatched".to_string(),
        });
    }

    let id = record.id.clone();
    let status = record.status;
    let signer = record
        .signer_mut(signer_id)
        .ok_or_else(|| SigningError::SignerNotFound(signer_id.clone()))?;

    if signer.status == SignerStatus::Signed {
        return Err(SigningError::State {
            action: "decline",
            status,
            detail: "signer already signed".to_string(),
        });
    }

    signer.status = SignerStatus::Declined;
    signer.decline_reason = Some(reason.clone());
    let actor = signer.email.clone();

    // One decline halts every other active signer.
    record.status = AgreementStatus::Declined;

    let mut details = BTreeMap::new();
    details.insert("signer".to_string(), signer_id.0.clone());
    details.insert("reason".to_string(), reason);
    record
        .audit
        .append(id.clone(), now, AuditAction::Declined, actor, details);
    events.push(NotificationEvent::broadcast(id, NotificationKind::Declined));
    Ok(())
}

fn cancel_locked(
    record: &mut AgreementRecord,
    actor: &str,
    now: DateTime<Utc>,
    events: &mut Vec<NotificationEvent>,
) -> Result<(), SigningError> {
    if record.status.is_terminal() {
        return Err(terminal_error("cancel", record));
    }
    if actor != record.sender {
        return Err(SigningError::State {
            action: "cancel",
            status: record.status,
            detail: "only the sender may cancel".to_string(),
        });
    }

    record.status = AgreementStatus::Cancelled;

    let id = record.id.clone();
    record.audit.append(
        id.clone(),
        now,
        AuditAction::Cancelled,
        actor.to_string(),
        BTreeMap::new(),
    );
    events.push(NotificationEvent::broadcast(id, NotificationKind::Cancelled));
    Ok(())
}

fn expire_locked(
    record: &mut AgreementRecord,
    now: DateTime<Utc>,
    events: &mut Vec<NotificationEvent>,
) -> bool {
    if record.status.is_terminal() || !record.past_deadline(now) {
        return false;
    }

    record.status = AgreementStatus::Expired;

    let id = record.id.clone();
    record.audit.append(
        id.clone(),
        now,
        AuditAction::Expired,
        "scheduler",
        BTreeMap::new(),
    );
    events.push(NotificationEvent::broadcast(id, NotificationKind::Expired));
    true
}

fn remind_locked(
    record: &mut AgreementRecord,
    now: DateTime<Utc>,
    events: &mut Vec<NotificationEvent>,
) -> usize {
    if !matches!(
        record.status,
        AgreementStatus::Sent | AgreementStatus::InProgress
    ) {
        return 0;
    }
    if !record.reminders.due(now) {
        return 0;
    }

    // Only signers whose turn it is: activated but not yet signed or
    // declined. A pending signer in a sequential chain cannot act yet.
    let recipients: Vec<(SignerId, String)> = record
        .signers
        .iter()
        .filter(|signer| {
            matches!(signer.status, SignerStatus::Sent | SignerStatus::Viewed)
        })
        .map(|signer| (signer.id.clone(), signer.email.clone()))
        .collect();

    if recipients.is_empty() {
        return 0;
    }

    let count = recipients.len();
    for (signer_id, email) in recipients {
        events.push(NotificationEvent::for_signer(
            record.id.clone(),
            NotificationKind::Reminder,
            signer_id,
            email,
        ));
    }

    record.reminders.last_sent_at = Some(now);
    let mut details = BTreeMap::new();
    details.insert("recipients".to_string(), count.to_string());
    record.audit.append(
        record.id.clone(),
        now,
        AuditAction::ReminderSent,
        "scheduler",
        details,
    );
    count
}
