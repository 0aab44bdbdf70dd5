use chrono::Duration;

use super::common::{
    admit_draft, artifact, dispatched, fixed_now, harness, new_agreement, proof,
};
use crate::signing::audit::AuditAction;
use crate::signing::coordinator::SigningError;
use crate::signing::domain::{
    AgreementStatus, AuthMethod, AuthProof, SignerStatus, WorkflowKind,
};
use crate::signing::notify::NotificationKind;

#[test]
fn dispatch_activates_first_signer_in_sequential_workflow() {
    let h = harness();
    let now = fixed_now();
    let (id, _signers) = admit_draft(&h, WorkflowKind::Sequential, now);

    let view = h.coordinator.dispatch(&id, now).expect("dispatches");

    assert_eq!(view.status, AgreementStatus::Sent);
    assert_eq!(view.signers[0].status, SignerStatus::Sent);
    assert_eq!(view.signers[1].status, SignerStatus::Pending);
    assert_eq!(view.audit.len(), 2);
    assert_eq!(view.audit[1].action, AuditAction::Dispatched);

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, NotificationKind::SignatureRequested);
    assert_eq!(events[0].recipient.as_deref(), Some("tenant@example.com"));
}

#[test]
fn dispatch_activates_every_signer_in_parallel_workflow() {
    let h = harness();
    let now = fixed_now();
    let (id, _signers) = admit_draft(&h, WorkflowKind::Parallel, now);

    let view = h.coordinator.dispatch(&id, now).expect("dispatches");

    assert!(view
        .signers
        .iter()
        .all(|signer| signer.status == SignerStatus::Sent));
    assert_eq!(h.events.events().len(), 2);
}

#[test]
fn dispatch_twice_is_rejected_with_current_status() {
    let h = harness();
    let now = fixed_now();
    let (id, _) = dispatched(&h, WorkflowKind::Sequential, now);

    let result = h.coordinator.dispatch(&id, now);
    match result {
        Err(SigningError::State { status, .. }) => assert_eq!(status, AgreementStatus::Sent),
        other => panic!("expected state error, got {other:?}"),
    }
}

#[test]
fn first_view_moves_agreement_in_progress_and_re_view_is_silent() {
    let h = harness();
    let now = fixed_now();
    let (id, signers) = dispatched(&h, WorkflowKind::Sequential, now);

    let view = h
        .coordinator
        .view(&id, &signers[0], now + Duration::minutes(1))
        .expect("first view accepted");
    assert_eq!(view.status, AgreementStatus::InProgress);
    assert_eq!(view.signers[0].status, SignerStatus::Viewed);
    let audit_len = view.audit.len();

    let again = h
        .coordinator
        .view(&id, &signers[0], now + Duration::minutes(2))
        .expect("re-view accepted");
    assert_eq!(again.audit.len(), audit_len, "duplicate view appends nothing");
}

#[test]
fn inactive_sequential_signer_cannot_view_ahead() {
    let h = harness();
    let now = fixed_now();
    let (id, signers) = dispatched(&h, WorkflowKind::Sequential, now);

    let result = h.coordinator.view(&id, &signers[1], now);
    match result {
        Err(SigningError::State { detail, .. }) => {
            assert_eq!(detail, "waiting on signer 1 of 2")
        }
        other => panic!("expected state error, got {other:?}"),
    }
}

#[test]
fn sequential_chain_signs_in_order_and_completes() {
    let h = harness();
    let now = fixed_now();
    let (id, signers) = dispatched(&h, WorkflowKind::Sequential, now);

    let view = h
        .coordinator
        .sign(
            &id,
            &signers[0],
            artifact(now),
            proof(AuthMethod::Sms),
            now + Duration::hours(1),
        )
        .expect("tenant signs");
    assert_eq!(view.status, AgreementStatus::InProgress);
    assert_eq!(view.signers[0].status, SignerStatus::Signed);
    assert_eq!(view.signers[1].status, SignerStatus::Sent, "baton passes");

    let view = h
        .coordinator
        .sign(
            &id,
            &signers[1],
            artifact(now),
            proof(AuthMethod::Email),
            now + Duration::hours(2),
        )
        .expect("landlord signs");
    assert_eq!(view.status, AgreementStatus::Completed);
    assert!(view.completed_at.is_some());
    assert!(view.signers.iter().all(|s| s.status == SignerStatus::Signed));
    assert_eq!(view.audit.last().map(|e| e.action), Some(AuditAction::Completed));

    let kinds: Vec<NotificationKind> = h.events.events().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            NotificationKind::SignatureRequested,
            NotificationKind::SignatureRequested,
            NotificationKind::Completed,
        ]
    );
}

#[test]
fn signing_out_of_order_names_the_blocking_signer() {
    let h = harness();
    let now = fixed_now();
    let (id, signers) = dispatched(&h, WorkflowKind::Sequential, now);

    let result = h.coordinator.sign(
        &id,
        &signers[1],
        artifact(now),
        proof(AuthMethod::Email),
        now,
    );
    match result {
        Err(SigningError::State { detail, .. }) => {
            assert_eq!(detail, "waiting on signer 1 of 2")
        }
        other => panic!("expected state error, got {other:?}"),
    }
}

#[test]
fn signing_twice_is_a_state_error() {
    let h = harness();
    let now = fixed_now();
    let (id, signers) = dispatched(&h, WorkflowKind::Parallel, now);

    h.coordinator
        .sign(&id, &signers[0], artifact(now), proof(AuthMethod::Sms), now)
        .expect("first signature lands");

    let result = h
        .coordinator
        .sign(&id, &signers[0], artifact(now), proof(AuthMethod::Sms), now);
    match result {
        Err(SigningError::State { detail, .. }) => assert_eq!(detail, "signer already signed"),
        other => panic!("expected state error, got {other:?}"),
    }
}

#[test]
fn weak_or_unverified_auth_is_rejected() {
    let h = harness();
    let now = fixed_now();

    // Tenant inherits the template's email minimum; landlord overrides in
    // the fixture, so build a request requiring sms explicitly.
    let mut request = new_agreement(WorkflowKind::Parallel, now);
    request.signers[0].minimum_auth = Some(AuthMethod::Sms);
    let record = h
        .factory
        .instantiate(request, now)
        .expect("agreement instantiates");
    let id = record.id.clone();
    let tenant = record.signers[0].id.clone();
    h.coordinator.admit(record).expect("admitted");
    h.coordinator.dispatch(&id, now).expect("dispatched");

    let weak = h
        .coordinator
        .sign(&id, &tenant, artifact(now), proof(AuthMethod::Email), now);
    match weak {
        Err(SigningError::AuthenticationInsufficient { required, provided }) => {
            assert_eq!(required, AuthMethod::Sms);
            assert_eq!(provided, AuthMethod::Email);
        }
        other => panic!("expected auth error, got {other:?}"),
    }

    let unverified = h.coordinator.sign(
        &id,
        &tenant,
        artifact(now),
        AuthProof {
            method: AuthMethod::IdDocument,
            verified: false,
        },
        now,
    );
    assert!(matches!(
        unverified,
        Err(SigningError::AuthenticationInsufficient { .. })
    ));

    let view = h.coordinator.agreement(&id).expect("readable");
    assert_eq!(view.signers[0].status, SignerStatus::Sent, "untouched");
}

#[test]
fn decline_terminates_the_whole_agreement() {
    let h = harness();
    let now = fixed_now();
    let (id, signers) = dispatched(&h, WorkflowKind::Sequential, now);

    let view = h
        .coordinator
        .decline(&id, &signers[0], "rent is wrong".to_string(), now)
        .expect("decline accepted");
    assert_eq!(view.status, AgreementStatus::Declined);
    assert_eq!(view.signers[0].status, SignerStatus::Declined);
    assert_eq!(
        view.signers[0].decline_reason.as_deref(),
        Some("rent is wrong")
    );

    // The other signer is locked out afterwards.
    let result = h.coordinator.sign(
        &id,
        &signers[1],
        artifact(now),
        proof(AuthMethod::Email),
        now,
    );
    assert!(matches!(result, Err(SigningError::RequestDeclined)));
}

#[test]
fn declined_signer_cannot_have_signed_first() {
    let h = harness();
    let now = fixed_now();
    let (id, signers) = dispatched(&h, WorkflowKind::Parallel, now);

    h.coordinator
        .sign(&id, &signers[0], artifact(now), proof(AuthMethod::Sms), now)
        .expect("signature lands");

    let result = h
        .coordinator
        .decline(&id, &signers[0], "changed my mind".to_string(), now);
    match result {
        Err(SigningError::State { detail, .. }) => assert_eq!(detail, "signer already signed"),
        other => panic!("expected state error, got {other:?}"),
    }
}

#[test]
fn cancel_is_sender_only_and_halts_signing() {
    let h = harness();
    let now = fixed_now();
    let (id, signers) = dispatched(&h, WorkflowKind::Parallel, now);

    let stranger = h.coordinator.cancel(&id, "tenant@example.com", now);
    match stranger {
        Err(SigningError::State { detail, .. }) => {
            assert_eq!(detail, "only the sender may cancel")
        }
        other => panic!("expected state error, got {other:?}"),
    }

    let view = h
        .coordinator
        .cancel(&id, "landlord@example.com", now)
        .expect("sender cancels");
    assert_eq!(view.status, AgreementStatus::Cancelled);

    let result = h.coordinator.sign(
        &id,
        &signers[0],
        artifact(now),
        proof(AuthMethod::Sms),
        now,
    );
    assert!(matches!(result, Err(SigningError::RequestCancelled)));
}

#[test]
fn cancel_after_completion_is_rejected() {
    let h = harness();
    let now = fixed_now();
    let (id, signers) = dispatched(&h, WorkflowKind::Parallel, now);

    for signer in &signers {
        h.coordinator
            .sign(&id, signer, artifact(now), proof(AuthMethod::Sms), now)
            .expect("signature lands");
    }

    let result = h.coordinator.cancel(&id, "landlord@example.com", now);
    assert!(matches!(result, Err(SigningError::State { .. })));
}

#[test]
fn expire_is_idempotent_and_audited_once() {
    let h = harness();
    let now = fixed_now();
    let (id, _) = dispatched(&h, WorkflowKind::Sequential, now);
    let later = now + Duration::days(15);

    assert!(h.coordinator.expire(&id, later).expect("first expire"));
    let first = h.coordinator.agreement(&id).expect("readable");
    assert_eq!(first.status, AgreementStatus::Expired);

    assert!(!h.coordinator.expire(&id, later).expect("second expire"));
    let second = h.coordinator.agreement(&id).expect("readable");
    assert_eq!(second.audit.len(), first.audit.len(), "no duplicate entry");
}

#[test]
fn expire_before_deadline_changes_nothing() {
    let h = harness();
    let now = fixed_now();
    let (id, _) = dispatched(&h, WorkflowKind::Sequential, now);

    assert!(!h.coordinator.expire(&id, now).expect("early expire is a no-op"));
    let view = h.coordinator.agreement(&id).expect("readable");
    assert_eq!(view.status, AgreementStatus::Sent);
}

#[test]
fn signing_past_the_deadline_is_rejected() {
    let h = harness();
    let now = fixed_now();
    let (id, signers) = dispatched(&h, WorkflowKind::Parallel, now);

    h.coordinator
        .sign(&id, &signers[0], artifact(now), proof(AuthMethod::Sms), now)
        .expect("first signature lands in time");

    let late = now + Duration::days(15);
    let result = h.coordinator.sign(
        &id,
        &signers[1],
        artifact(now),
        proof(AuthMethod::Sms),
        late,
    );
    assert!(matches!(result, Err(SigningError::RequestExpired { .. })));

    let view = h.coordinator.agreement(&id).expect("readable");
    assert_ne!(view.status, AgreementStatus::Completed);
}

#[test]
fn audit_length_matches_accepted_operations() {
    let h = harness();
    let now = fixed_now();
    let (id, signers) = dispatched(&h, WorkflowKind::Sequential, now);

    h.coordinator
        .view(&id, &signers[0], now)
        .expect("view accepted");
    h.coordinator
        .view(&id, &signers[0], now)
        .expect("duplicate view accepted silently");
    h.coordinator
        .sign(&id, &signers[0], artifact(now), proof(AuthMethod::Sms), now)
        .expect("tenant signs");
    let _ = h
        .coordinator
        .sign(&id, &signers[0], artifact(now), proof(AuthMethod::Sms), now)
        .expect_err("duplicate sign rejected");
    h.coordinator
        .sign(&id, &signers[1], artifact(now), proof(AuthMethod::Email), now)
        .expect("landlord signs");

    // created + dispatched + viewed + signed + signed + completed.
    let view = h.coordinator.agreement(&id).expect("readable");
    assert_eq!(view.audit.len(), 6);
}

#[test]
fn digest_drift_blocks_completion() {
    let h = harness();
    let now = fixed_now();
    let (id, signers) = dispatched(&h, WorkflowKind::Parallel, now);

    h.coordinator
        .sign(&id, &signers[0], artifact(now), proof(AuthMethod::Sms), now)
        .expect("first signature lands");

    h.renderer.set_digest("digest-v2");
    let result = h.coordinator.sign(
        &id,
        &signers[1],
        artifact(now),
        proof(AuthMethod::Sms),
        now,
    );
    assert!(matches!(result, Err(SigningError::DocumentMismatch)));

    let view = h.coordinator.agreement(&id).expect("readable");
    assert_ne!(view.status, AgreementStatus::Completed);
    assert_eq!(view.signers[1].status, SignerStatus::Signed);
}

#[test]
fn digest_drift_still_notifies_the_newly_activated_signer() {
    let h = harness();
    let now = fixed_now();

    // With an optional second signer the required set is satisfied the
    // moment the tenant signs, so the baton pass and the completion
    // attempt happen in the same call.
    let mut request = new_agreement(WorkflowKind::Sequential, now);
    request.signers[1].required = false;
    let record = h
        .factory
        .instantiate(request, now)
        .expect("agreement instantiates");
    let id = record.id.clone();
    let tenant = record.signers[0].id.clone();
    h.coordinator.admit(record).expect("admitted");
    h.coordinator.dispatch(&id, now).expect("dispatched");

    h.renderer.set_digest("digest-v2");
    let result = h
        .coordinator
        .sign(&id, &tenant, artifact(now), proof(AuthMethod::Sms), now);
    assert!(matches!(result, Err(SigningError::DocumentMismatch)));

    // The record shows the landlord activated, so the notification that
    // matches it must have gone out despite the failed completion.
    let view = h.coordinator.agreement(&id).expect("readable");
    assert_eq!(view.signers[1].status, SignerStatus::Sent);

    let events = h.events.events();
    let requested: Vec<_> = events
        .iter()
        .filter(|e| e.kind == NotificationKind::SignatureRequested)
        .collect();
    assert_eq!(requested.len(), 2, "dispatch plus baton pass");
    assert_eq!(
        requested[1].recipient.as_deref(),
        Some("landlord@example.com")
    );
    assert!(!events.iter().any(|e| e.kind == NotificationKind::Completed));
}

#[test]
fn terminal_agreement_freezes_signer_fields() {
    let h = harness();
    let now = fixed_now();
    let (id, signers) = dispatched(&h, WorkflowKind::Parallel, now);

    h.coordinator
        .cancel(&id, "landlord@example.com", now)
        .expect("cancelled");
    let before = h.coordinator.agreement(&id).expect("readable");

    let _ = h.coordinator.view(&id, &signers[0], now);
    let _ = h
        .coordinator
        .decline(&id, &signers[0], "too late".to_string(), now);

    let after = h.coordinator.agreement(&id).expect("readable");
    assert_eq!(before.signers[0].status, after.signers[0].status);
    assert_eq!(after.audit.len(), before.audit.len());
}
