#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use egov_portal::{
    auth::{AuthConfig, AuthService},
    catalog::ServiceCatalog,
    config::AppConfig,
    db,
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::payments::{PaymentReference, TransactionVerification, TransactionVerifier},
    AppState,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str =
    "9f8e7d6c5b4a39281706f5e4d3c2b1a09f8e7d6c5b4a39281706f5e4d3c2b1a0-tests";
pub const TEST_PAYSTACK_SECRET: &str = "sk_test_portal_webhooks";
pub const CITIZEN: &str = "citizen-1";
pub const CITIZEN_EMAIL: &str = "ada@example.com";

/// Stands in for Paystack's verify endpoint.
pub struct StubProvider {
    status: Mutex<String>,
    calls: AtomicUsize,
}

impl StubProvider {
    fn new() -> Self {
        Self {
            status: Mutex::new("success".to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn respond_with(&self, status: &str) {
        *self.status.lock().unwrap() = status.to_string();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionVerifier for StubProvider {
    async fn verify_transaction(
        &self,
        reference: &PaymentReference,
    ) -> Result<TransactionVerification, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TransactionVerification {
            confirmed: true,
            status: self.status.lock().unwrap().clone(),
            reference: Some(reference.as_str().to_string()),
            amount: None,
            currency: Some("NGN".to_string()),
            message: Some("Verification successful".to_string()),
        })
    }
}

/// Helper harness for spinning up the application on an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub provider: Arc<StubProvider>,
    token: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection keeps every query on the same in-memory database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.paystack_secret_key = Some(TEST_PAYSTACK_SECRET.to_string());
        cfg.paystack_public_key = Some("pk_test_portal".to_string());
        cfg.payment_verification_timeout_secs = 2;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let provider = Arc::new(StubProvider::new());
        let services = AppServices::new(
            db_arc.clone(),
            &cfg,
            Arc::new(ServiceCatalog::standard()),
            provider.clone(),
            event_sender.clone(),
        );

        let auth_service = Arc::new(AuthService::new(AuthConfig::new(
            cfg.jwt_secret.clone(),
            cfg.auth_audience.clone(),
            cfg.auth_issuer.clone(),
            Duration::from_secs(3600),
        )));
        let token = auth_service
            .issue_token(CITIZEN, Some("Ada Obi"), Some(CITIZEN_EMAIL))
            .expect("issue test token");

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
            auth: auth_service,
        };

        Self {
            router: egov_portal::app_router(state.clone()),
            state,
            provider,
            token,
            _event_task: event_task,
        }
    }

    /// Bearer token for the default citizen.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn token_for(&self, user_id: &str, email: &str) -> String {
        self.state
            .auth
            .issue_token(user_id, None, Some(email))
            .expect("issue test token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.send(request).await
    }

    /// Convenience helper for authenticated JSON requests.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    pub async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Opens a checkout for a complete tax receipt; returns the reference.
    pub async fn initiate_tax_receipt(&self) -> String {
        let response = self
            .request_authenticated(
                Method::POST,
                "/api/v1/checkout",
                Some(tax_receipt_submission()),
            )
            .await;
        assert_eq!(response.status(), axum::http::StatusCode::CREATED);
        let body = json_body(response).await;
        body["data"]["reference"]
            .as_str()
            .expect("reference in checkout session")
            .to_string()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn tax_receipt_submission() -> Value {
    json!({
        "serviceType": "tax-receipt",
        "formData": {
            "fullName": "Ada Obi",
            "taxId": "TIN-0042",
            "amount": "15000",
            "paymentDate": "2024-05-01",
            "paymentPurpose": "Annual levy"
        }
    })
}

pub fn birth_certificate_submission() -> Value {
    json!({
        "serviceType": "birth-certificate",
        "formData": {
            "fullName": "Chidi Obi",
            "nin": "12345678901",
            "dateOfBirth": "2024-03-09",
            "gender": "Male",
            "placeOfBirth": "Lagos",
            "fatherName": "Emeka Obi",
            "motherName": "Ada Obi",
            "fatherOccupation": "Engineer",
            "motherOccupation": "Teacher",
            "address": "12 Marina Road",
            "stateOfOrigin": "Anambra",
            "lga": "Onitsha North"
        }
    })
}

pub async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
