use crate::infra::{DigestRenderer, InMemoryDispatcher};
use chrono::{Duration, Utc};
use clap::Args;
use lease_sign::error::AppError;
use lease_sign::signing::{
    capture, AgreementView, AuthMethod, AuthProof, CaptureError, CaptureMetadata, FieldDefinition,
    FieldKind, FieldValue, InMemoryAgreementStore, NewAgreement, ReminderConfig, RoleDefault,
    SignatureArtifact, SignatureInput, SignerRole, SignerSpec, SignerStatus, SigningEngine,
    StrokePoint, WorkflowKind,
};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Route the agreement to all signers at once instead of in order.
    #[arg(long)]
    pub(crate) parallel: bool,
    /// Days until the demo agreement expires.
    #[arg(long, default_value_t = 14)]
    pub(crate) expires_in_days: i64,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let events = InMemoryDispatcher::default();
    let engine = SigningEngine::new(
        Arc::new(InMemoryAgreementStore::new()),
        Arc::new(DigestRenderer),
        Arc::new(events.clone()),
    );
    let now = Utc::now();

    println!("Lease signing demo");

    let snapshot = engine
        .templates
        .create(demo_fields(), demo_role_defaults(), now)
        .map_err(demo_input_error)?;
    println!(
        "  published template {} v{} ({} fields)",
        snapshot.template_id.0,
        snapshot.version,
        snapshot.fields.len()
    );

    let workflow = if args.parallel {
        WorkflowKind::Parallel
    } else {
        WorkflowKind::Sequential
    };
    let record = engine
        .factory
        .instantiate(
            NewAgreement {
                snapshot,
                field_values: demo_field_values(now),
                signers: demo_signers(),
                workflow,
                expires_at: now + Duration::days(args.expires_in_days),
                reminders: ReminderConfig::every_minutes(24 * 60),
                sender: "landlord@example.com".to_string(),
            },
            now,
        )
        .map_err(demo_input_error)?;

    let id = record.id.clone();
    let signer_ids: Vec<_> = record.signers.iter().map(|s| s.id.clone()).collect();
    engine.coordinator.admit(record)?;

    let view = engine.coordinator.dispatch(&id, now)?;
    print_progress("dispatched", &view);

    for (index, signer_id) in signer_ids.iter().enumerate() {
        let at = now + Duration::minutes((index as i64 + 1) * 30);
        engine.coordinator.view(&id, signer_id, at)?;
        let artifact = demo_artifact(at).map_err(demo_input_error)?;
        let view = engine
            .coordinator
            .sign(&id, signer_id, artifact, demo_proof(), at)?;
        print_progress("signed", &view);
    }

    let view = engine.coordinator.agreement(&id)?;
    println!("\nAudit trail ({} entries)", view.audit.len());
    for entry in &view.audit {
        println!(
            "  {} {} by {}",
            entry.at.to_rfc3339(),
            entry.action.label(),
            entry.actor
        );
    }

    println!("\nNotifications ({} delivered)", events.events().len());
    for event in events.events() {
        println!("  {}", event.idempotency_key());
    }

    Ok(())
}

fn demo_input_error(err: impl std::fmt::Display) -> AppError {
    AppError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        err.to_string(),
    ))
}

fn print_progress(step: &str, view: &AgreementView) {
    let signed = view
        .signers
        .iter()
        .filter(|signer| signer.status == SignerStatus::Signed)
        .count();
    println!(
        "  {} -> {} ({}/{} signatures)",
        step,
        view.status_label,
        signed,
        view.signers.len()
    );
}

fn demo_fields() -> Vec<FieldDefinition> {
    vec![
        FieldDefinition {
            name: "tenant_name".to_string(),
            kind: FieldKind::Text,
            required: true,
        },
        FieldDefinition {
            name: "monthly_rent".to_string(),
            kind: FieldKind::Text,
            required: true,
        },
        FieldDefinition {
            name: "lease_start".to_string(),
            kind: FieldKind::Date,
            required: true,
        },
        FieldDefinition {
            name: "tenant_signature".to_string(),
            kind: FieldKind::Signature,
            required: true,
        },
    ]
}

fn demo_role_defaults() -> Vec<RoleDefault> {
    vec![
        RoleDefault {
            role: SignerRole::Tenant,
            minimum_auth: AuthMethod::Email,
            required: true,
        },
        RoleDefault {
            role: SignerRole::Landlord,
            minimum_auth: AuthMethod::Email,
            required: true,
        },
    ]
}

fn demo_field_values(now: chrono::DateTime<Utc>) -> BTreeMap<String, FieldValue> {
    let mut values = BTreeMap::new();
    values.insert(
        "tenant_name".to_string(),
        FieldValue::Text("Jordan Miles".to_string()),
    );
    values.insert(
        "monthly_rent".to_string(),
        FieldValue::Text("$1,180".to_string()),
    );
    values.insert(
        "lease_start".to_string(),
        FieldValue::Date((now + Duration::days(30)).date_naive()),
    );
    values
}

fn demo_signers() -> Vec<SignerSpec> {
    vec![
        SignerSpec {
            name: "Jordan Miles".to_string(),
            email: "tenant@example.com".to_string(),
            phone: None,
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
            minimum_auth: None,
        },
    ]
}

fn demo_artifact(at: chrono::DateTime<Utc>) -> Result<SignatureArtifact, CaptureError> {
    let input = SignatureInput::Strokes {
        width: 320,
        height: 120,
        strokes: vec![vec![
            StrokePoint { x: 12.0, y: 104.0 },
            StrokePoint { x: 150.0, y: 24.0 },
            StrokePoint { x: 305.0, y: 88.0 },
        ]],
    };
    let metadata = CaptureMetadata {
        captured_at: at,
        ip_address: "203.0.113.9".to_string(),
        geolocation: Some("Portland, OR".to_string()),
        auth_method: AuthMethod::Email,
    };
    capture(&input, &metadata)
}

fn demo_proof() -> AuthProof {
    AuthProof {
        method: AuthMethod::Email,
        verified: true,
    }
}
