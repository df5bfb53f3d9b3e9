//! HTTP surface of the engine.
//!
//! The webhook route answers 2xx only once the delivery is durably recorded
//! (or recognised as a duplicate); store failures answer 503 so the gateway
//! redelivers.

use crate::application::engine::ReconciliationEngine;
use crate::application::ledger::ApplyOutcome;
use crate::application::payment::PaymentRequest;
use crate::application::webhook::IngestOutcome;
use crate::domain::permit::{ApplicationId, ApplicationStatus};
use crate::error::PaymentError;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    engine: Arc<ReconciliationEngine>,
    signature_header: HeaderName,
}

impl AppState {
    pub fn new(engine: Arc<ReconciliationEngine>, signature_header: HeaderName) -> Self {
        Self {
            engine,
            signature_header,
        }
    }
}

/// Maps engine errors to HTTP answers.
pub struct ApiError(PaymentError);

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PaymentError::SignatureInvalid(_) | PaymentError::ValidationError(_) => StatusCode::BAD_REQUEST,
            PaymentError::ApplicationNotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::ApplicationExists(_)
            | PaymentError::TransitionRejected { .. }
            | PaymentError::NoActivePayment(_) => StatusCode::CONFLICT,
            PaymentError::VelocityExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            PaymentError::GatewayRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PaymentError::GatewayUnavailable(_) | PaymentError::GatewayTimeout(_) => StatusCode::BAD_GATEWAY,
            e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, %status, "Request failed");
        }

        let mut body = json!({"error": self.0.to_string()});
        match &self.0 {
            PaymentError::VelocityExceeded(violations) => body["violations"] = json!(violations),
            PaymentError::TransitionRejected { status, reason } => {
                body["status"] = json!(status);
                body["reason"] = json!(reason);
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/payments/webhook", post(receive_webhook))
        .route("/payments/attempts", post(start_payment))
        .route("/applications", post(open_application))
        .route("/applications/:id", get(read_application))
        .route("/applications/:id/events", get(application_events))
        .route("/applications/:id/cancel", post(cancel_payment))
        .route("/admin/applications/:id/verify-payment", post(verify_payment))
        .route("/admin/applications/:id/reject-payment", post(reject_payment))
        .route("/admin/velocity/:user_id/reset", post(reset_velocity))
        .with_state(state)
}

async fn receive_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let Some(signature) = headers
        .get(&state.signature_header)
        .and_then(|v| v.to_str().ok())
    else {
        warn!(header = %state.signature_header, "Webhook without signature header");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "signature_invalid"})),
        )
            .into_response();
    };

    match state.engine.webhooks().ingest(&body, signature).await {
        Ok(IngestOutcome::Accepted { event_id, outcome }) => (
            StatusCode::OK,
            Json(json!({"received": true, "event_id": event_id, "result": outcome.label()})),
        )
            .into_response(),
        Ok(IngestOutcome::Deduplicated { event_id }) => (
            StatusCode::OK,
            Json(json!({"received": true, "event_id": event_id, "duplicate": true})),
        )
            .into_response(),
        Ok(IngestOutcome::Rejected(reason)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": reason.as_ref()})),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Webhook could not be recorded");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "temporarily_unavailable"})),
            )
                .into_response()
        }
    }
}

async fn start_payment(State(state): State<AppState>, Json(request): Json<PaymentRequest>) -> ApiResult<Response> {
    let started = state.engine.payments().start_payment(request).await?;
    Ok((StatusCode::CREATED, Json(started)).into_response())
}

#[derive(Debug, Deserialize)]
struct OpenApplication {
    application_id: ApplicationId,
    user_id: String,
}

async fn open_application(
    State(state): State<AppState>,
    Json(request): Json<OpenApplication>,
) -> ApiResult<Response> {
    let application = state
        .engine
        .ledger()
        .open_application(request.application_id, &request.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(application)).into_response())
}

async fn read_application(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Response> {
    let id = ApplicationId(id);
    let application = state
        .engine
        .recovery()
        .read_through(id)
        .await?
        .ok_or(PaymentError::ApplicationNotFound(id))?;
    Ok(Json(application).into_response())
}

async fn application_events(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Response> {
    let events = state.engine.ledger().events_for(ApplicationId(id)).await?;
    Ok(Json(events).into_response())
}

async fn cancel_payment(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Response> {
    let status = state.engine.payments().cancel_payment(ApplicationId(id)).await?;
    Ok(Json(json!({"application_id": id, "status": status})).into_response())
}

#[derive(Debug, Deserialize)]
struct VerifyPayment {
    admin_id: String,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RejectPayment {
    admin_id: String,
    reason: String,
}

#[derive(Debug, Serialize)]
struct OverrideResponse {
    application_id: ApplicationId,
    result: &'static str,
    status: Option<ApplicationStatus>,
}

fn override_response(id: ApplicationId, outcome: ApplyOutcome) -> Response {
    let result = match outcome {
        ApplyOutcome::Applied { .. } => "applied",
        ApplyOutcome::NoOp(_) => "noop",
        ApplyOutcome::Rejected { .. } => "rejected",
        ApplyOutcome::Duplicate => "duplicate",
    };
    Json(OverrideResponse {
        application_id: id,
        result,
        status: outcome.status(),
    })
    .into_response()
}

async fn verify_payment(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<VerifyPayment>,
) -> ApiResult<Response> {
    let id = ApplicationId(id);
    let outcome = state
        .engine
        .admin()
        .verify_payment(id, &request.admin_id, request.notes.as_deref())
        .await?;
    Ok(override_response(id, outcome))
}

async fn reject_payment(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<RejectPayment>,
) -> ApiResult<Response> {
    let id = ApplicationId(id);
    let outcome = state
        .engine
        .admin()
        .reject_payment(id, &request.admin_id, &request.reason)
        .await?;
    Ok(override_response(id, outcome))
}

async fn reset_velocity(State(state): State<AppState>, Path(user_id): Path<String>) -> ApiResult<StatusCode> {
    state.engine.admin().reset_velocity(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
