use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::capture::{capture, CaptureError, CaptureMetadata, SignatureInput};
use super::coordinator::{SigningError, WorkflowCoordinator};
use super::domain::{
    AgreementId, AuthProof, FieldDefinition, FieldValue, ReminderConfig, RoleDefault, SignerId,
    SignerSpec, TemplateId, WorkflowKind,
};
use super::factory::{AgreementFactory, NewAgreement, ValidationError};
use super::notify::NotificationDispatcher;
use super::render::DocumentRenderer;
use super::store::{AgreementStore, StoreError};
use super::template::{TemplateError, TemplateRegistry};

/// The engine behind the API surface: registry, factory, and coordinator
/// sharing one renderer.
pub struct SigningEngine<S, D, N> {
    pub templates: TemplateRegistry,
    pub factory: AgreementFactory<D>,
    pub coordinator: WorkflowCoordinator<S, D, N>,
}

impl<S, D, N> SigningEngine<S, D, N>
where
    S: AgreementStore,
    D: DocumentRenderer,
    N: NotificationDispatcher,
{
    pub fn new(store: Arc<S>, renderer: Arc<D>, notifier: Arc<N>) -> Self {
        Self {
            templates: TemplateRegistry::new(),
            factory: AgreementFactory::new(renderer.clone()),
            coordinator: WorkflowCoordinator::new(store, renderer, notifier),
        }
    }
}

/// Router builder exposing the agreement lifecycle endpoints.
pub fn signing_router<S, D, N>(engine: Arc<SigningEngine<S, D, N>>) -> Router
where
    S: AgreementStore + 'static,
    D: DocumentRenderer + 'static,
    N: NotificationDispatcher + 'static,
{
    Router::new()
        .route("/api/v1/templates", post(create_template_handler::<S, D, N>))
        .route(
            "/api/v1/templates/:template_id/versions",
            post(publish_version_handler::<S, D, N>),
        )
        .route(
            "/api/v1/templates/:template_id",
            get(template_handler::<S, D, N>),
        )
        .route("/api/v1/agreements", post(create_agreement_handler::<S, D, N>))
        .route(
            "/api/v1/agreements/:agreement_id/dispatch",
            post(dispatch_handler::<S, D, N>),
        )
        .route(
            "/api/v1/agreements/:agreement_id/signers/:signer_id/view",
            post(view_handler::<S, D, N>),
        )
        .route(
            "/api/v1/agreements/:agreement_id/signers/:signer_id/sign",
            post(sign_handler::<S, D, N>),
        )
        .route(
            "/api/v1/agreements/:agreement_id/signers/:signer_id/decline",
            post(decline_handler::<S, D, N>),
        )
        .route(
            "/api/v1/agreements/:agreement_id/cancel",
            post(cancel_handler::<S, D, N>),
        )
        .route(
            "/api/v1/agreements/:agreement_id",
            get(agreement_handler::<S, D, N>),
        )
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
pub struct TemplateRequest {
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub default_signers: Vec<RoleDefault>,
}

#[derive(Debug, Deserialize)]
pub struct AgreementRequest {
    pub template_id: String,
    #[serde(default)]
    pub template_version: Option<u32>,
    #[serde(default)]
    pub field_values: BTreeMap<String, FieldValue>,
    pub signers: Vec<SignerSpec>,
    pub workflow: WorkflowKind,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub reminder_cadence_minutes: Option<i64>,
    pub sender: String,
}

#[derive(Debug, Deserialize)]
pub struct SignRequest {
    pub input: SignatureInput,
    pub ip_address: String,
    #[serde(default)]
    pub geolocation: Option<String>,
    pub auth: AuthProof,
}

#[derive(Debug, Deserialize)]
pub struct DeclineRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub actor: String,
}

async fn create_template_handler<S, D, N>(
    State(engine): State<Arc<SigningEngine<S, D, N>>>,
    Json(request): Json<TemplateRequest>,
) -> Response
where
    S: AgreementStore + 'static,
    D: DocumentRenderer + 'static,
    N: NotificationDispatcher + 'static,
{
    match engine
        .templates
        .create(request.fields, request.default_signers, Utc::now())
    {
        Ok(snapshot) => (StatusCode::CREATED, Json(snapshot)).into_response(),
        Err(err) => template_error_response(err),
    }
}

async fn publish_version_handler<S, D, N>(
    State(engine): State<Arc<SigningEngine<S, D, N>>>,
    Path(template_id): Path<String>,
    Json(request): Json<TemplateRequest>,
) -> Response
where
    S: AgreementStore + 'static,
    D: DocumentRenderer + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = TemplateId(template_id);
    match engine
        .templates
        .publish_version(&id, request.fields, request.default_signers, Utc::now())
    {
        Ok(snapshot) => (StatusCode::CREATED, Json(snapshot)).into_response(),
        Err(err) => template_error_response(err),
    }
}

async fn template_handler<S, D, N>(
    State(engine): State<Arc<SigningEngine<S, D, N>>>,
    Path(template_id): Path<String>,
) -> Response
where
    S: AgreementStore + 'static,
    D: DocumentRenderer + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = TemplateId(template_id);
    let snapshot = match engine.templates.snapshot(&id, None) {
        Ok(snapshot) => snapshot,
        Err(err) => return template_error_response(err),
    };
    let history = match engine.templates.history(&id) {
        Ok(history) => history,
        Err(err) => return template_error_response(err),
    };

    (
        StatusCode::OK,
        Json(json!({ "template": snapshot, "versions": history })),
    )
        .into_response()
}

async fn create_agreement_handler<S, D, N>(
    State(engine): State<Arc<SigningEngine<S, D, N>>>,
    Json(request): Json<AgreementRequest>,
) -> Response
where
    S: AgreementStore + 'static,
    D: DocumentRenderer + 'static,
    N: NotificationDispatcher + 'static,
{
    let template_id = TemplateId(request.template_id);
    let snapshot = match engine.templates.snapshot(&template_id, request.template_version) {
        Ok(snapshot) => snapshot,
        Err(err) => return template_error_response(err),
    };

    let reminders = match request.reminder_cadence_minutes {
        Some(minutes) => ReminderConfig::every_minutes(minutes),
        None => ReminderConfig::disabled(),
    };

    let new_agreement = NewAgreement {
        snapshot,
        field_values: request.field_values,
        signers: request.signers,
        workflow: request.workflow,
        expires_at: request.expires_at,
        reminders,
        sender: request.sender,
    };

    let record = match engine.factory.instantiate(new_agreement, Utc::now()) {
        Ok(record) => record,
        Err(err) => return validation_error_response(err),
    };

    match engine.coordinator.admit(record) {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(err) => signing_error_response(err),
    }
}

async fn dispatch_handler<S, D, N>(
    State(engine): State<Arc<SigningEngine<S, D, N>>>,
    Path(agreement_id): Path<String>,
) -> Response
where
    S: AgreementStore + 'static,
    D: DocumentRenderer + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = AgreementId(agreement_id);
    match engine.coordinator.dispatch(&id, Utc::now()) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => signing_error_response(err),
    }
}

async fn view_handler<S, D, N>(
    State(engine): State<Arc<SigningEngine<S, D, N>>>,
    Path((agreement_id, signer_id)): Path<(String, String)>,
) -> Response
where
    S: AgreementStore + 'static,
    D: DocumentRenderer + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = AgreementId(agreement_id);
    let signer = SignerId(signer_id);
    match engine.coordinator.view(&id, &signer, Utc::now()) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => signing_error_response(err),
    }
}

async fn sign_handler<S, D, N>(
    State(engine): State<Arc<SigningEngine<S, D, N>>>,
    Path((agreement_id, signer_id)): Path<(String, String)>,
    Json(request): Json<SignRequest>,
) -> Response
where
    S: AgreementStore + 'static,
    D: DocumentRenderer + 'static,
    N: NotificationDispatcher + 'static,
{
    let now = Utc::now();
    let metadata = CaptureMetadata {
        captured_at: now,
        ip_address: request.ip_address,
        geolocation: request.geolocation,
        auth_method: request.auth.method,
    };

    let artifact = match capture(&request.input, &metadata) {
        Ok(artifact) => artifact,
        Err(err) => return capture_error_response(err),
    };

    let id = AgreementId(agreement_id);
    let signer = SignerId(signer_id);
    match engine
        .coordinator
        .sign(&id, &signer, artifact, request.auth, now)
    {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => signing_error_response(err),
    }
}

async fn decline_handler<S, D, N>(
    State(engine): State<Arc<SigningEngine<S, D, N>>>,
    Path((agreement_id, signer_id)): Path<(String, String)>,
    Json(request): Json<DeclineRequest>,
) -> Response
where
    S: AgreementStore + 'static,
    D: DocumentRenderer + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = AgreementId(agreement_id);
    let signer = SignerId(signer_id);
    match engine
        .coordinator
        .decline(&id, &signer, request.reason, Utc::now())
    {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => signing_error_response(err),
    }
}

async fn cancel_handler<S, D, N>(
    State(engine): State<Arc<SigningEngine<S, D, N>>>,
    Path(agreement_id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> Response
where
    S: AgreementStore + 'static,
    D: DocumentRenderer + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = AgreementId(agreement_id);
    match engine.coordinator.cancel(&id, &request.actor, Utc::now()) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => signing_error_response(err),
    }
}

async fn agreement_handler<S, D, N>(
    State(engine): State<Arc<SigningEngine<S, D, N>>>,
    Path(agreement_id): Path<String>,
) -> Response
where
    S: AgreementStore + 'static,
    D: DocumentRenderer + 'static,
    N: NotificationDispatcher + 'static,
{
    let id = AgreementId(agreement_id);
    match engine.coordinator.agreement(&id) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => signing_error_response(err),
    }
}

fn template_error_response(err: TemplateError) -> Response {
    let status = match err {
        TemplateError::NotFound(_) | TemplateError::UnknownVersion { .. } => StatusCode::NOT_FOUND,
        TemplateError::DuplicateFieldName(_) | TemplateError::NoSignatureField => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

fn validation_error_response(err: ValidationError) -> Response {
    let status = match err {
        ValidationError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

fn capture_error_response(err: CaptureError) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn signing_error_response(err: SigningError) -> Response {
    let status = match &err {
        SigningError::State { .. }
        | SigningError::RequestDeclined
        | SigningError::RequestCancelled => StatusCode::CONFLICT,
        SigningError::RequestExpired { .. } => StatusCode::GONE,
        SigningError::AuthenticationInsufficient { .. } => StatusCode::FORBIDDEN,
        SigningError::SignerNotFound(_) | SigningError::Store(StoreError::NotFound) => {
            StatusCode::NOT_FOUND
        }
        SigningError::Store(StoreError::Conflict) => StatusCode::CONFLICT,
        SigningError::DocumentMismatch
        | SigningError::Render(_)
        | SigningError::Store(StoreError::Unavailable(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = match &err {
        SigningError::State {
            status: agreement_status,
            ..
        } => json!({
            "error": err.to_string(),
            "agreement_status": agreement_status.label(),
        }),
        _ => json!({ "error": err.to_string() }),
    };

    (status, Json(payload)).into_response()
}
