mod common;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderName, Request, StatusCode};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{Harness, config, sign, webhook};
use permit_recon::application::engine::ReconciliationEngine;
use permit_recon::domain::event::{EventId, PaymentEvent};
use permit_recon::domain::permit::{Application, ApplicationId, ApplicationStatus};
use permit_recon::domain::ports::{ApplicationStore, CommitOutcome, PaymentEventStore, StaleCursor};
use permit_recon::error::{PaymentError, Result};
use permit_recon::infrastructure::simulated_gateway::SimulatedGateway;
use permit_recon::infrastructure::velocity_store::InMemoryVelocityStore;
use permit_recon::interfaces::http::{AppState, router};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    router(AppState::new(
        h.engine.clone(),
        HeaderName::from_static("stripe-signature"),
    ))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_webhook(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut request = Request::post("/payments/webhook");
    if let Some(signature) = signature {
        request = request.header("stripe-signature", signature);
    }
    request.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn test_webhook_route() {
    let h = Harness::new();
    h.insert_app(1, ApplicationStatus::PaymentProcessing, Some("pi_1"), ChronoDuration::zero())
        .await;
    let body = webhook("evt_1", "payment_intent.succeeded", json!({"id": "pi_1"}));

    let (status, json) = send(app(&h), post_webhook(body.clone(), Some(sign(&body)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "applied");

    let (status, json) = send(app(&h), post_webhook(body.clone(), Some(sign(&body)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["duplicate"], true);

    let (status, json) = send(app(&h), post_webhook(body.clone(), Some("t=1,v1=00".to_string()))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "signature_invalid");

    let (status, _) = send(app(&h), post_webhook(body, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(h.all_events().await.len(), 1);
}

#[tokio::test]
async fn test_open_and_read_application() {
    let h = Harness::new();

    let request = post_json("/applications", json!({"application_id": 7, "user_id": "user-7"}));
    let (status, json) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "AWAITING_PAYMENT");

    let request = post_json("/applications", json!({"application_id": 7, "user_id": "user-7"}));
    let (status, _) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let request = Request::get("/applications/7").body(Body::empty()).unwrap();
    let (status, json) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], 7);
    assert_eq!(json["user_id"], "user-7");

    let request = Request::get("/applications/8").body(Body::empty()).unwrap();
    let (status, _) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_payment_attempts_rate_limited() {
    let h = Harness::new();
    for id in 1..=6 {
        h.engine.ledger().open_application(ApplicationId(id), "user-1").await.unwrap();
    }
    let attempt = |id: u64| {
        post_json(
            "/payments/attempts",
            json!({
                "application_id": id,
                "actor": {"user_id": "user-1", "email": "user-1@example.com", "ip": "198.51.100.4"},
                "amount": "850.00",
                "method": "card"
            }),
        )
    };

    for id in 1..=5 {
        let (status, json) = send(app(&h), attempt(id)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["status"], "PAYMENT_PROCESSING");
    }
    let (status, json) = send(app(&h), attempt(6)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["violations"], json!(["user_attempts"]));

    let request = Request::post("/admin/velocity/user-1/reset").body(Body::empty()).unwrap();
    let (status, _) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(app(&h), attempt(6)).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_admin_routes() {
    let h = Harness::new();
    h.insert_app(1, ApplicationStatus::PaymentProcessing, Some("pi_1"), ChronoDuration::zero())
        .await;
    h.insert_app(2, ApplicationStatus::PaymentReceived, Some("pi_2"), ChronoDuration::zero())
        .await;

    let request = post_json(
        "/admin/applications/1/verify-payment",
        json!({"admin_id": "ops-1", "notes": "bank statement"}),
    );
    let (status, json) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "applied");
    assert_eq!(json["status"], "PAYMENT_RECEIVED");

    let request = post_json(
        "/admin/applications/2/reject-payment",
        json!({"admin_id": "ops-1", "reason": "chargeback"}),
    );
    let (status, json) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["reason"], "success_already_recorded");

    let request = Request::get("/applications/1/events").body(Body::empty()).unwrap();
    let (status, json) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_route() {
    let h = Harness::new();
    h.engine.ledger().open_application(ApplicationId(3), "user-3").await.unwrap();

    let request = Request::post("/applications/3/cancel").body(Body::empty()).unwrap();
    let (status, json) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "CANCELLED");

    // Cancelling twice is a no-op.
    let request = Request::post("/applications/3/cancel").body(Body::empty()).unwrap();
    let (status, _) = send(app(&h), request).await;
    assert_eq!(status, StatusCode::OK);
}

/// A store whose backend is down.
struct UnavailableStore;

fn unavailable() -> PaymentError {
    PaymentError::InternalError("connection refused".into())
}

#[async_trait]
impl ApplicationStore for UnavailableStore {
    async fn insert(&self, _application: Application) -> Result<()> {
        Err(unavailable())
    }
    async fn get(&self, _id: ApplicationId) -> Result<Option<Application>> {
        Err(unavailable())
    }
    async fn find_by_reference(&self, _reference: &str) -> Result<Option<Application>> {
        Err(unavailable())
    }
    async fn stale(
        &self,
        _statuses: &[ApplicationStatus],
        _updated_before: DateTime<Utc>,
        _after: Option<StaleCursor>,
        _limit: usize,
    ) -> Result<Vec<Application>> {
        Err(unavailable())
    }
}

#[async_trait]
impl PaymentEventStore for UnavailableStore {
    async fn exists(&self, _event_id: &EventId) -> Result<bool> {
        Err(unavailable())
    }
    async fn commit(&self, _event: PaymentEvent, _application: Option<Application>) -> Result<CommitOutcome> {
        Err(unavailable())
    }
    async fn for_application(&self, _id: ApplicationId) -> Result<Vec<PaymentEvent>> {
        Err(unavailable())
    }
    async fn all_events(&self) -> Result<Vec<PaymentEvent>> {
        Err(unavailable())
    }
}

#[tokio::test]
async fn test_store_failure_asks_for_redelivery() {
    let engine = ReconciliationEngine::new(
        config(),
        Box::new(UnavailableStore),
        Box::new(UnavailableStore),
        Box::new(InMemoryVelocityStore::new()),
        Arc::new(SimulatedGateway::new()),
    )
    .unwrap();
    let app = router(AppState::new(
        Arc::new(engine),
        HeaderName::from_static("stripe-signature"),
    ));

    let body = webhook("evt_1", "payment_intent.succeeded", json!({"id": "pi_1"}));
    let (status, _) = send(app.clone(), post_webhook(body.clone(), Some(sign(&body)))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let request = Request::get("/applications/1").body(Body::empty()).unwrap();
    let (status, _) = send(app, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
