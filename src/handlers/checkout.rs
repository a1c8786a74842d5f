use crate::{
    auth::AuthUser,
    catalog::FormData,
    entities::payment_attempt::AttemptStatus,
    errors::ServiceError,
    handlers::{requests::RequestSummary, AppState},
    services::{checkout::CheckoutSession, payments::PaymentReference},
    ApiResponse, ApiResult,
};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "serviceType": "tax-receipt",
    "formData": {
        "fullName": "Ada Obi",
        "taxId": "TIN-0042",
        "amount": "15000",
        "paymentDate": "2024-05-01",
        "paymentPurpose": "Annual levy"
    }
}))]
pub struct InitiateCheckoutRequest {
    #[validate(length(min = 1))]
    pub service_type: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub form_data: FormData,
    /// Receipt address; defaults to the account email
    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutStatusResponse {
    pub reference: PaymentReference,
    pub status: AttemptStatus,
}

/// Opens a checkout attempt. The price always comes from the catalog.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = InitiateCheckoutRequest,
    responses(
        (status = 201, description = "Checkout parameters for the hosted widget", body = ApiResponse<CheckoutSession>),
        (status = 400, description = "Missing or invalid fields", body = crate::errors::ErrorResponse),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "checkout"
)]
pub async fn initiate_checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<InitiateCheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutSession>>), ServiceError> {
    request.validate()?;

    let email = request
        .email
        .as_deref()
        .or(user.email.as_deref())
        .ok_or_else(|| {
            ServiceError::InvalidInput("A valid email address is required for payment".to_string())
        })?;

    let session = state
        .services
        .checkout
        .initiate(&user.user_id, email, &request.service_type, &request.form_data)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}

/// Client success callback. The request is recorded only after the provider confirms.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/{reference}/confirm",
    params(("reference" = String, Path, description = "Payment reference")),
    responses(
        (status = 200, description = "Payment verified and request recorded", body = ApiResponse<RequestSummary>),
        (status = 409, description = "Reference closed; submit again", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider did not confirm the payment", body = crate::errors::ErrorResponse),
        (status = 500, description = "Verified but not recorded; queued for retry", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "checkout"
)]
pub async fn confirm_checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Path(reference): Path<String>,
) -> ApiResult<RequestSummary> {
    let reference = PaymentReference::parse(&reference)?;
    let record = state
        .services
        .checkout
        .confirm(&user.user_id, &reference)
        .await?;
    Ok(Json(ApiResponse::success(RequestSummary::from_model(
        record,
        &state.services.catalog,
    ))))
}

/// The user closed the checkout widget.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/{reference}/cancel",
    params(("reference" = String, Path, description = "Payment reference")),
    responses(
        (status = 200, description = "Attempt closed", body = ApiResponse<CheckoutStatusResponse>),
        (status = 404, description = "No such attempt for this user", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment already verified", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "checkout"
)]
pub async fn cancel_checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Path(reference): Path<String>,
) -> ApiResult<CheckoutStatusResponse> {
    let reference = PaymentReference::parse(&reference)?;
    let attempt = state
        .services
        .checkout
        .cancel(&user.user_id, &reference)
        .await?;
    Ok(Json(ApiResponse::message(
        CheckoutStatusResponse {
            reference,
            status: attempt.status,
        },
        "Payment was cancelled. You can submit the request again.",
    )))
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(initiate_checkout))
        .route("/checkout/:reference/confirm", post(confirm_checkout))
        .route("/checkout/:reference/cancel", post(cancel_checkout))
}
