use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::domain::{FieldDefinition, FieldKind, RoleDefault, TemplateId, TemplateSnapshot};

/// Error raised when authoring or fetching templates.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("duplicate field name '{0}'")]
    DuplicateFieldName(String),
    #[error("template must declare at least one signature field")]
    NoSignatureField,
    #[error("template {0} not found")]
    NotFound(String),
    #[error("template {template} has no version {version}")]
    UnknownVersion { template: String, version: u32 },
}

#[derive(Debug, Clone)]
struct TemplateVersion {
    version: u32,
    fields: Vec<FieldDefinition>,
    default_signers: Vec<RoleDefault>,
    published_at: DateTime<Utc>,
}

static TEMPLATE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_template_id() -> TemplateId {
    let id = TEMPLATE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    TemplateId(format!("tpl-{id:06}"))
}

/// Registry of immutable, versioned document templates. Publishing an edit
/// creates a new version; agreements keep the snapshot they were bound to.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: Mutex<HashMap<TemplateId, Vec<TemplateVersion>>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a brand-new template at version 1.
    pub fn create(
        &self,
        fields: Vec<FieldDefinition>,
        default_signers: Vec<RoleDefault>,
        now: DateTime<Utc>,
    ) -> Result<TemplateSnapshot, TemplateError> {
        validate_fields(&fields)?;

        let id = next_template_id();
        let version = TemplateVersion {
            version: 1,
            fields,
            default_signers,
            published_at: now,
        };
        let snapshot = snapshot_of(&id, &version);

        let mut guard = self.templates.lock().expect("template registry mutex poisoned");
        guard.insert(id, vec![version]);
        Ok(snapshot)
    }

    /// Publishes version n+1 of an existing template.
    pub fn publish_version(
        &self,
        template_id: &TemplateId,
        fields: Vec<FieldDefinition>,
        default_signers: Vec<RoleDefault>,
        now: DateTime<Utc>,
    ) -> Result<TemplateSnapshot, TemplateError> {
        validate_fields(&fields)?;

        let mut guard = self.templates.lock().expect("template registry mutex poisoned");
        let versions = guard
            .get_mut(template_id)
            .ok_or_else(|| TemplateError::NotFound(template_id.0.clone()))?;

        let next = versions.last().map(|v| v.version + 1).unwrap_or(1);
        let version = TemplateVersion {
            version: next,
            fields,
            default_signers,
            published_at: now,
        };
        let snapshot = snapshot_of(template_id, &version);
        versions.push(version);
        Ok(snapshot)
    }

    /// Returns an immutable copy of the requested version, or the latest
    /// when no version is given. Used exclusively by the agreement factory
    /// and the read API.
    pub fn snapshot(
        &self,
        template_id: &TemplateId,
        version: Option<u32>,
    ) -> Result<TemplateSnapshot, TemplateError> {
        let guard = self.templates.lock().expect("template registry mutex poisoned");
        let versions = guard
            .get(template_id)
            .ok_or_else(|| TemplateError::NotFound(template_id.0.clone()))?;

        let found = match version {
            Some(requested) => versions
                .iter()
                .find(|v| v.version == requested)
                .ok_or(TemplateError::UnknownVersion {
                    template: template_id.0.clone(),
                    version: requested,
                })?,
            None => versions.last().expect("template has at least one version"),
        };

        Ok(snapshot_of(template_id, found))
    }

    /// Version history for the read API.
    pub fn history(
        &self,
        template_id: &TemplateId,
    ) -> Result<Vec<TemplateVersionInfo>, TemplateError> {
        let guard = self.templates.lock().expect("template registry mutex poisoned");
        let versions = guard
            .get(template_id)
            .ok_or_else(|| TemplateError::NotFound(template_id.0.clone()))?;

        Ok(versions
            .iter()
            .map(|v| TemplateVersionInfo {
                version: v.version,
                published_at: v.published_at,
                field_count: v.fields.len(),
            })
            .collect())
    }
}

/// Summary row describing one published version.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TemplateVersionInfo {
    pub version: u32,
    pub published_at: DateTime<Utc>,
    pub field_count: usize,
}

fn validate_fields(fields: &[FieldDefinition]) -> Result<(), TemplateError> {
    let mut seen = HashSet::new();
    for field in fields {
        if !seen.insert(field.name.to_ascii_lowercase()) {
            return Err(TemplateError::DuplicateFieldName(field.name.clone()));
        }
    }

    if !fields.iter().any(|field| field.kind == FieldKind::Signature) {
        return Err(TemplateError::NoSignatureField);
    }

    Ok(())
}

fn snapshot_of(id: &TemplateId, version: &TemplateVersion) -> TemplateSnapshot {
    TemplateSnapshot {
        template_id: id.clone(),
        version: version.version,
        fields: version.fields.clone(),
        default_signers: version.default_signers.clone(),
    }
}
