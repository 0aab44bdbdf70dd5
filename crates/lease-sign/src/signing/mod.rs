//! Agreement lifecycle and multi-party signing workflow.
//!
//! The template registry publishes immutable versioned templates, the
//! factory binds a snapshot plus terms and signers into a draft agreement,
//! and the workflow coordinator owns every status transition under a
//! per-agreement lock. The scheduler sweep drives expiry and reminders
//! through the same coordinator.

pub mod audit;
pub mod capture;
pub mod coordinator;
pub mod domain;
pub mod factory;
pub mod notify;
pub mod render;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod template;

#[cfg(test)]
mod tests;

pub use audit::{AuditAction, AuditEntry, AuditTrail};
pub use capture::{
    capture, CaptureError, CaptureMetadata, SignatureArtifact, SignatureInput, StrokePoint,
};
pub use coordinator::{AgreementView, SignerView, SigningError, WorkflowCoordinator};
pub use domain::{
    AgreementId, AgreementRecord, AgreementStatus, AuthMethod, AuthProof, CaptureProvenance,
    FieldDefinition, FieldKind, FieldValue, ReminderConfig, RoleDefault, Signer, SignerId,
    SignerRole, SignerSpec, SignerStatus, TemplateId, TemplateSnapshot, WorkflowKind,
};
pub use factory::{AgreementFactory, NewAgreement, ValidationError};
pub use notify::{
    deliver_with_backoff, BackoffPolicy, NotificationDispatcher, NotificationEvent,
    NotificationKind, NotifyError,
};
pub use render::{DocumentRenderer, RenderError, RenderedDocument};
pub use router::{signing_router, SigningEngine};
pub use scheduler::{run_sweep, SweepFailure, SweepReport};
pub use store::{AgreementStore, InMemoryAgreementStore, StoreError};
pub use template::{TemplateError, TemplateRegistry, TemplateVersionInfo};
