use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::audit::AuditTrail;
use super::capture::SignatureArtifact;

/// Identifier wrapper for published templates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

/// Identifier wrapper for instantiated agreements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgreementId(pub String);

/// Identifier wrapper for signers bound to an agreement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignerId(pub String);

/// Kinds of fields a template can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Date,
    Checkbox,
    Signature,
}

/// One field slot in a template, ordered as authored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Value supplied for a non-signature field at instantiation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Date(NaiveDate),
    Checkbox(bool),
}

/// Parties a rental agreement template can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    Tenant,
    Landlord,
    Guarantor,
    Agent,
    Witness,
}

impl SignerRole {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Tenant => "Tenant",
            Self::Landlord => "Landlord",
            Self::Guarantor => "Guarantor",
            Self::Agent => "Agent",
            Self::Witness => "Witness",
        }
    }
}

/// Authentication mechanisms, ordered by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Email,
    Sms,
    IdDocument,
}

impl AuthMethod {
    pub const fn strength(self) -> u8 {
        match self {
            Self::Email => 1,
            Self::Sms => 2,
            Self::IdDocument => 3,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::IdDocument => "id_document",
        }
    }
}

/// Outcome of an external identity check presented alongside a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthProof {
    pub method: AuthMethod,
    pub verified: bool,
}

/// Default signer slot carried by a template version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefault {
    pub role: SignerRole,
    pub minimum_auth: AuthMethod,
    pub required: bool,
}

/// Immutable copy of one template version, bound to an agreement at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSnapshot {
    pub template_id: TemplateId,
    pub version: u32,
    pub fields: Vec<FieldDefinition>,
    pub default_signers: Vec<RoleDefault>,
}

impl TemplateSnapshot {
    pub fn signature_field_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|field| field.kind == FieldKind::Signature)
            .count()
    }

    pub fn default_auth_for(&self, role: SignerRole) -> Option<AuthMethod> {
        self.default_signers
            .iter()
            .find(|slot| slot.role == role)
            .map(|slot| slot.minimum_auth)
    }
}

/// Per-signer progress, monotonic in the order pending < sent < viewed < signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerStatus {
    Pending,
    Sent,
    Viewed,
    Signed,
    Declined,
}

impl SignerStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Viewed => "viewed",
            Self::Signed => "signed",
            Self::Declined => "declined",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Signed | Self::Declined)
    }
}

/// Lifecycle of a whole agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementStatus {
    Draft,
    Sent,
    InProgress,
    Completed,
    Expired,
    Declined,
    Cancelled,
}

impl AgreementStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Expired | Self::Declined | Self::Cancelled
        )
    }
}

/// Whether signers act one at a time or all at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Sequential,
    Parallel,
}

/// Reminder cadence tracked per agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderConfig {
    pub enabled: bool,
    pub cadence_minutes: i64,
    pub last_sent_at: Option<DateTime<Utc>>,
}

impl ReminderConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            cadence_minutes: 0,
            last_sent_at: None,
        }
    }

    pub fn every_minutes(cadence_minutes: i64) -> Self {
        Self {
            enabled: true,
            cadence_minutes,
            last_sent_at: None,
        }
    }

    pub fn cadence(&self) -> Duration {
        Duration::minutes(self.cadence_minutes)
    }

    pub fn due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled || self.cadence_minutes <= 0 {
            return false;
        }
        match self.last_sent_at {
            Some(last) => now - last >= self.cadence(),
            None => true,
        }
    }
}

/// Where and how a signature was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureProvenance {
    pub captured_at: DateTime<Utc>,
    pub ip_address: String,
    pub geolocation: Option<String>,
    pub auth_method: AuthMethod,
}

/// Input description of one party when instantiating an agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerSpec {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: SignerRole,
    pub required: bool,
    /// Defaults from the template's role slot when omitted.
    pub minimum_auth: Option<AuthMethod>,
}

/// One party bound to an agreement, tracked through the signing workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signer {
    pub id: SignerId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: SignerRole,
    pub required: bool,
    pub minimum_auth: AuthMethod,
    pub status: SignerStatus,
    pub signed_at: Option<DateTime<Utc>>,
    pub artifact: Option<SignatureArtifact>,
    pub auth_method_used: Option<AuthMethod>,
    pub provenance: Option<CaptureProvenance>,
    pub decline_reason: Option<String>,
}

impl Signer {
    pub fn can_sign(&self) -> bool {
        matches!(self.status, SignerStatus::Sent | SignerStatus::Viewed)
    }
}

/// The full durable state of one agreement, owned by the coordinator and
/// mutated only while its store lease is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementRecord {
    pub id: AgreementId,
    pub snapshot: TemplateSnapshot,
    pub document_digest: String,
    pub field_values: BTreeMap<String, FieldValue>,
    pub workflow: WorkflowKind,
    pub signers: Vec<Signer>,
    pub status: AgreementStatus,
    pub sender: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reminders: ReminderConfig,
    pub audit: AuditTrail,
}

impl AgreementRecord {
    pub fn signer(&self, id: &SignerId) -> Option<&Signer> {
        self.signers.iter().find(|signer| &signer.id == id)
    }

    pub fn signer_mut(&mut self, id: &SignerId) -> Option<&mut Signer> {
        self.signers.iter_mut().find(|signer| &signer.id == id)
    }

    /// Index of the signer currently allowed to act in a sequential chain:
    /// the first one that has not yet signed.
    pub fn active_step(&self) -> Option<usize> {
        self.signers
            .iter()
            .position(|signer| signer.status != SignerStatus::Signed)
    }

    pub fn all_required_signed(&self) -> bool {
        self.signers
            .iter()
            .filter(|signer| signer.required)
            .all(|signer| signer.status == SignerStatus::Signed)
    }

    pub fn past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
