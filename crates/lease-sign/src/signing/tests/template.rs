use chrono::Utc;

use super::common::lease_snapshot;
use crate::signing::domain::{AuthMethod, FieldDefinition, FieldKind, RoleDefault, SignerRole};
use crate::signing::template::{TemplateError, TemplateRegistry};

fn fields() -> Vec<FieldDefinition> {
    lease_snapshot().fields
}

fn defaults() -> Vec<RoleDefault> {
    lease_snapshot().default_signers
}

#[test]
fn create_publishes_version_one() {
    let registry = TemplateRegistry::new();
    let snapshot = registry
        .create(fields(), defaults(), Utc::now())
        .expect("template creates");

    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.fields.len(), 4);
    assert_eq!(snapshot.signature_field_count(), 1);
}

#[test]
fn create_rejects_duplicate_field_names() {
    let registry = TemplateRegistry::new();
    let mut fields = fields();
    fields.push(FieldDefinition {
        name: "Tenant_Name".to_string(),
        kind: FieldKind::Text,
        required: false,
    });

    let result = registry.create(fields, defaults(), Utc::now());
    match result {
        Err(TemplateError::DuplicateFieldName(name)) => assert_eq!(name, "Tenant_Name"),
        other => panic!("expected duplicate field error, got {other:?}"),
    }
}

#[test]
fn create_requires_a_signature_field() {
    let registry = TemplateRegistry::new();
    let fields: Vec<FieldDefinition> = fields()
        .into_iter()
        .filter(|field| field.kind != FieldKind::Signature)
        .collect();

    let result = registry.create(fields, defaults(), Utc::now());
    assert!(matches!(result, Err(TemplateError::NoSignatureField)));
}

#[test]
fn publish_version_leaves_existing_snapshots_untouched() {
    let registry = TemplateRegistry::new();
    let first = registry
        .create(fields(), defaults(), Utc::now())
        .expect("template creates");

    let mut edited = fields();
    edited.push(FieldDefinition {
        name: "parking_spot".to_string(),
        kind: FieldKind::Text,
        required: false,
    });
    let second = registry
        .publish_version(&first.template_id, edited, defaults(), Utc::now())
        .expect("second version publishes");

    assert_eq!(second.version, 2);
    assert_eq!(second.fields.len(), first.fields.len() + 1);

    let pinned = registry
        .snapshot(&first.template_id, Some(1))
        .expect("version 1 still readable");
    assert_eq!(pinned.fields, first.fields);

    let latest = registry
        .snapshot(&first.template_id, None)
        .expect("latest readable");
    assert_eq!(latest.version, 2);
}

#[test]
fn snapshot_reports_missing_template_and_version() {
    let registry = TemplateRegistry::new();
    let snapshot = registry
        .create(fields(), defaults(), Utc::now())
        .expect("template creates");

    let missing = registry.snapshot(
        &crate::signing::domain::TemplateId("tpl-zzz".to_string()),
        None,
    );
    assert!(matches!(missing, Err(TemplateError::NotFound(_))));

    let unknown = registry.snapshot(&snapshot.template_id, Some(9));
    assert!(matches!(
        unknown,
        Err(TemplateError::UnknownVersion { version: 9, .. })
    ));
}

#[test]
fn history_lists_every_published_version() {
    let registry = TemplateRegistry::new();
    let snapshot = registry
        .create(fields(), defaults(), Utc::now())
        .expect("template creates");
    registry
        .publish_version(&snapshot.template_id, fields(), defaults(), Utc::now())
        .expect("second version publishes");

    let history = registry
        .history(&snapshot.template_id)
        .expect("history readable");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 1);
    assert_eq!(history[1].version, 2);
}

#[test]
fn default_auth_resolves_per_role() {
    let snapshot = lease_snapshot();
    assert_eq!(
        snapshot.default_auth_for(SignerRole::Landlord),
        Some(AuthMethod::Sms)
    );
    assert_eq!(snapshot.default_auth_for(SignerRole::Witness), None);
}
