use crate::{
    errors::ServiceError,
    handlers::AppState,
    services::payments::{verify_webhook_signature, WebhookNotification, PAYSTACK_SIGNATURE_HEADER},
};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use metrics::counter;
use tracing::{info, warn};

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(PAYSTACK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let authentic = state
        .config
        .paystack_secret_key
        .as_deref()
        .is_some_and(|secret| verify_webhook_signature(secret, &body, signature));
    if !authentic {
        counter!("egov_webhooks.rejected", 1);
        warn!("payment webhook signature verification failed");
        return Err(ServiceError::Unauthorized(
            "invalid webhook signature".to_string(),
        ));
    }

    let notification: WebhookNotification = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::InvalidInput(format!("invalid webhook payload: {}", e)))?;

    let matched = state
        .services
        .checkout
        .record_provider_confirmation(&notification)
        .await?;
    counter!("egov_webhooks.accepted", 1);
    info!(
        event = %notification.event,
        reference = %notification.data.reference,
        matched,
        "payment webhook processed"
    );

    // Unmatched notifications are acknowledged too, so the provider stops retrying.
    Ok((StatusCode::OK, "ok"))
}

/// Signature-authenticated; sits outside the bearer auth layer.
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/payments/webhook", post(payment_webhook))
}
