use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::signing::capture::{capture, CaptureMetadata, SignatureArtifact, SignatureInput, StrokePoint};
use crate::signing::coordinator::WorkflowCoordinator;
use crate::signing::domain::{
    AgreementId, AuthMethod, AuthProof, FieldDefinition, FieldKind, FieldValue, ReminderConfig,
    RoleDefault, SignerId, SignerRole, SignerSpec, TemplateId, TemplateSnapshot, WorkflowKind,
};
use crate::signing::factory::{AgreementFactory, NewAgreement};
use crate::signing::notify::{NotificationDispatcher, NotificationEvent, NotifyError};
use crate::signing::render::{DocumentRenderer, RenderError, RenderedDocument};
use crate::signing::store::InMemoryAgreementStore;

pub(super) fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).single().expect("valid timestamp")
}

pub(super) fn lease_snapshot() -> TemplateSnapshot {
    TemplateSnapshot {
        template_id: TemplateId("tpl-fixture".to_string()),
        version: 1,
        fields: vec![
            FieldDefinition {
                name: "tenant_name".to_string(),
                kind: FieldKind::Text,
                required: true,
            },
            FieldDefinition {
                name: "move_in_date".to_string(),
                kind: FieldKind::Date,
                required: true,
            },
            FieldDefinition {
                name: "pets_allowed".to_string(),
                kind: FieldKind::Checkbox,
                required: false,
            },
            FieldDefinition {
                name: "tenant_signature".to_string(),
                kind: FieldKind::Signature,
                required: true,
            },
        ],
        default_signers: vec![
            RoleDefault {
                role: SignerRole::Tenant,
                minimum_auth: AuthMethod::Email,
                required: true,
            },
            RoleDefault {
                role: SignerRole::Landlord,
                minimum_auth: AuthMethod::Sms,
                required: true,
            },
        ],
    }
}

pub(super) fn field_values() -> BTreeMap<String, FieldValue> {
    let mut values = BTreeMap::new();
    values.insert(
        "tenant_name".to_string(),
        FieldValue::Text("Jordan Miles".to_string()),
    );
    values.insert(
        "move_in_date".to_string(),
        FieldValue::Date(
            chrono::NaiveDate::from_ymd_opt(2026, 2, 1).expect("valid date"),
        ),
    );
    values
}

pub(super) fn signer_specs() -> Vec<SignerSpec> {
    vec![
        SignerSpec {
            name: "Jordan Miles".to_string(),
            email: "tenant@example.com".to_string(),
            phone: Some("+15150000001".to_string()),
            role: SignerRole::Tenant,
            required: true,
            minimum_auth: None,
        },
        SignerSpec {
            name: "Avery Property Co".to_string(),
            email: "landlord@example.com".to_string(),
            phone: None,
            role: SignerRole::Landlord,
            required: true,
            minimum_auth: Some(AuthMethod::Email),
        },
    ]
}

pub(super) fn new_agreement(workflow: WorkflowKind, now: DateTime<Utc>) -> NewAgreement {
    NewAgreement {
        snapshot: lease_snapshot(),
        field_values: field_values(),
        signers: signer_specs(),
        workflow,
        expires_at: now + Duration::days(14),
        reminders: ReminderConfig::every_minutes(60),
        sender: "landlord@example.com".to_string(),
    }
}

pub(super) fn artifact(now: DateTime<Utc>) -> SignatureArtifact {
    let input = SignatureInput::Strokes {
        width: 300,
        height: 100,
        strokes: vec![vec![
            StrokePoint { x: 20.0, y: 80.0 },
            StrokePoint { x: 150.0, y: 20.0 },
            StrokePoint { x: 280.0, y: 70.0 },
        ]],
    };
    let metadata = CaptureMetadata {
        captured_at: now,
        ip_address: "203.0.113.7".to_string(),
        geolocation: Some("Des Moines, IA".to_string()),
        auth_method: AuthMethod::Sms,
    };
    capture(&input, &metadata).expect("fixture signature captures")
}

pub(super) fn proof(method: AuthMethod) -> AuthProof {
    AuthProof {
        method,
        verified: true,
    }
}

/// Renderer whose digest can be swapped to simulate template tampering.
pub(super) struct StaticRenderer {
    digest: Mutex<String>,
}

impl StaticRenderer {
    pub(super) fn new(digest: &str) -> Self {
        Self {
            digest: Mutex::new(digest.to_string()),
        }
    }

    pub(super) fn set_digest(&self, digest: &str) {
        *self.digest.lock().expect("renderer mutex poisoned") = digest.to_string();
    }
}

impl DocumentRenderer for StaticRenderer {
    fn render(
        &self,
        _snapshot: &TemplateSnapshot,
        values: &BTreeMap<String, FieldValue>,
    ) -> Result<RenderedDocument, RenderError> {
        let bytes = serde_json::to_vec(values).expect("values serialize");
        Ok(RenderedDocument {
            bytes,
            digest: self.digest.lock().expect("renderer mutex poisoned").clone(),
        })
    }
}

#[derive(Default)]
pub(super) struct MemoryEvents {
    events: Mutex<Vec<NotificationEvent>>,
}

impl MemoryEvents {
    pub(super) fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().expect("event mutex poisoned").clone()
    }
}

impl NotificationDispatcher for MemoryEvents {
    fn notify(&self, event: NotificationEvent) -> Result<(), NotifyError> {
        self.events.lock().expect("event mutex poisoned").push(event);
        Ok(())
    }
}

/// Dispatcher that fails a configured number of times before accepting.
pub(super) struct FlakyDispatcher {
    failures_left: Mutex<u32>,
    pub(super) delivered: Mutex<Vec<NotificationEvent>>,
    pub(super) attempts: Mutex<u32>,
}

impl FlakyDispatcher {
    pub(super) fn failing(times: u32) -> Self {
        Self {
            failures_left: Mutex::new(times),
            delivered: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
        }
    }
}

impl NotificationDispatcher for FlakyDispatcher {
    fn notify(&self, event: NotificationEvent) -> Result<(), NotifyError> {
        *self.attempts.lock().expect("attempt mutex poisoned") += 1;
        let mut left = self.failures_left.lock().expect("failure mutex poisoned");
        if *left > 0 {
            *left -= 1;
            return Err(NotifyError::Transport("smtp relay offline".to_string()));
        }
        self.delivered
            .lock()
            .expect("delivery mutex poisoned")
            .push(event);
        Ok(())
    }
}

pub(super) type TestCoordinator =
    WorkflowCoordinator<InMemoryAgreementStore, StaticRenderer, MemoryEvents>;

pub(super) struct Harness {
    pub(super) coordinator: TestCoordinator,
    pub(super) factory: AgreementFactory<StaticRenderer>,
    pub(super) renderer: Arc<StaticRenderer>,
    pub(super) events: Arc<MemoryEvents>,
}

pub(super) fn harness() -> Harness {
    let store = Arc::new(InMemoryAgreementStore::new());
    let renderer = Arc::new(StaticRenderer::new("digest-v1"));
    let events = Arc::new(MemoryEvents::default());
    Harness {
        coordinator: WorkflowCoordinator::new(store, renderer.clone(), events.clone()),
        factory: AgreementFactory::new(renderer.clone()),
        renderer,
        events,
    }
}

/// Creates and admits a draft agreement, returning its id and signer ids in
/// declaration order.
pub(super) fn admit_draft(
    harness: &Harness,
    workflow: WorkflowKind,
    now: DateTime<Utc>,
) -> (AgreementId, Vec<SignerId>) {
    let record = harness
        .factory
        .instantiate(new_agreement(workflow, now), now)
        .expect("fixture agreement instantiates");
    let id = record.id.clone();
    let signers = record.signers.iter().map(|s| s.id.clone()).collect();
    harness.coordinator.admit(record).expect("draft admitted");
    (id, signers)
}

/// Same as `admit_draft`, but already dispatched.
pub(super) fn dispatched(
    harness: &Harness,
    workflow: WorkflowKind,
    now: DateTime<Utc>,
) -> (AgreementId, Vec<SignerId>) {
    let (id, signers) = admit_draft(harness, workflow, now);
    harness
        .coordinator
        .dispatch(&id, now)
        .expect("fixture agreement dispatches");
    (id, signers)
}
