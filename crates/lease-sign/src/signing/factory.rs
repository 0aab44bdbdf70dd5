use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::audit::{AuditAction, AuditTrail};
use super::domain::{
    AgreementId, AgreementRecord, AgreementStatus, AuthMethod, FieldKind, FieldValue,
    ReminderConfig, Signer, SignerId, SignerSpec, SignerStatus, TemplateSnapshot, WorkflowKind,
};
use super::render::{DocumentRenderer, RenderError};

/// Creation-time validation failures. These reject before any agreement
/// exists; nothing is persisted.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("required field '{0}' has no value")]
    MissingRequiredField(String),
    #[error("field '{0}' is not part of the template")]
    UnknownField(String),
    #[error("duplicate signer email '{0}'")]
    DuplicateSignerEmail(String),
    #[error("expiry must be after the creation time")]
    InvalidDateRange,
    #[error("an agreement needs at least one signer")]
    NoSigners,
    #[error("template snapshot has no signature field")]
    NoSignatureField,
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Everything needed to instantiate one agreement.
#[derive(Debug, Clone)]
pub struct NewAgreement {
    pub snapshot: TemplateSnapshot,
    pub field_values: BTreeMap<String, FieldValue>,
    pub signers: Vec<SignerSpec>,
    pub workflow: WorkflowKind,
    pub expires_at: DateTime<Utc>,
    pub reminders: ReminderConfig,
    pub sender: String,
}

static AGREEMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static SIGNER_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_agreement_id() -> AgreementId {
    let id = AGREEMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AgreementId(format!("agr-{id:06}"))
}

fn next_signer_id() -> SignerId {
    let id = SIGNER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    SignerId(format!("sgn-{id:06}"))
}

/// Instantiates draft agreements from a template snapshot plus terms and a
/// signer list. Nobody is notified until the coordinator dispatches.
pub struct AgreementFactory<D> {
    renderer: Arc<D>,
}

impl<D> AgreementFactory<D>
where
    D: DocumentRenderer,
{
    pub fn new(renderer: Arc<D>) -> Self {
        Self { renderer }
    }

    pub fn instantiate(
        &self,
        request: NewAgreement,
        now: DateTime<Utc>,
    ) -> Result<AgreementRecord, ValidationError> {
        let NewAgreement {
            snapshot,
            field_values,
            signers,
            workflow,
            expires_at,
            reminders,
            sender,
        } = request;

        if expires_at <= now {
            return Err(ValidationError::InvalidDateRange);
        }
        if signers.is_empty() {
            return Err(ValidationError::NoSigners);
        }
        if snapshot.signature_field_count() == 0 {
            return Err(ValidationError::NoSignatureField);
        }

        validate_field_values(&snapshot, &field_values)?;
        validate_unique_emails(&signers)?;

        let rendered = self.renderer.render(&snapshot, &field_values)?;

        let id = next_agreement_id();
        let signers = signers
            .into_iter()
            .map(|spec| bind_signer(&snapshot, spec))
            .collect();

        let mut audit = AuditTrail::new();
        let mut details = BTreeMap::new();
        details.insert(
            "template".to_string(),
            format!("{}@v{}", snapshot.template_id.0, snapshot.version),
        );
        audit.append(id.clone(), now, AuditAction::Created, sender.clone(), details);

        Ok(AgreementRecord {
            id,
            snapshot,
            document_digest: rendered.digest,
            field_values,
            workflow,
            signers,
            status: AgreementStatus::Draft,
            sender,
            created_at: now,
            expires_at,
            completed_at: None,
            reminders,
            audit,
        })
    }
}

fn validate_field_values(
    snapshot: &TemplateSnapshot,
    values: &BTreeMap<String, FieldValue>,
) -> Result<(), ValidationError> {
    let known: HashSet<&str> = snapshot
        .fields
        .iter()
        .map(|field| field.name.as_str())
        .collect();

    for name in values.keys() {
        if !known.contains(name.as_str()) {
            return Err(ValidationError::UnknownField(name.clone()));
        }
    }

    for field in &snapshot.fields {
        // Signature slots are filled by signing, not by terms.
        if field.required && field.kind != FieldKind::Signature && !values.contains_key(&field.name)
        {
            return Err(ValidationError::MissingRequiredField(field.name.clone()));
        }
    }

    Ok(())
}

fn validate_unique_emails(signers: &[SignerSpec]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for spec in signers {
        if !seen.insert(spec.email.to_ascii_lowercase()) {
            return Err(ValidationError::DuplicateSignerEmail(spec.email.clone()));
        }
    }
    Ok(())
}

fn bind_signer(snapshot: &TemplateSnapshot, spec: SignerSpec) -> Signer {
    let minimum_auth = spec
        .minimum_auth
        .or_else(|| snapshot.default_auth_for(spec.role))
        .unwrap_or(AuthMethod::Email);

    Signer {
        id: next_signer_id(),
        name: spec.name,
        email: spec.email,
        phone: spec.phone,
        role: spec.role,
        required: spec.required,
        minimum_auth,
        status: SignerStatus::Pending,
        signed_at: None,
        artifact: None,
        auth_method_used: None,
        provenance: None,
        decline_reason: None,
    }
}
