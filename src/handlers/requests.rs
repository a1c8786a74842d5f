use crate::{
    auth::AuthUser,
    catalog::{FormData, ServiceCatalog},
    entities::request::{self, PaymentStatus},
    errors::ServiceError,
    handlers::AppState,
    services::{
        certificates::{form_data_from_json, PDF_CONTENT_TYPE},
        requests::RequestFilter,
    },
    ApiResponse, ApiResult,
};
use axum::{
    extract::{Json, Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

/// A recorded request as shown on the dashboard and payment history.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    pub id: i32,
    #[schema(example = "tax-receipt")]
    pub service_type: String,
    /// "Unknown Service" when the key is no longer in the catalog
    #[schema(example = "Tax Receipt")]
    pub service_name: String,
    #[schema(value_type = Object)]
    pub form_data: FormData,
    /// Whole Naira
    #[schema(example = 2000)]
    pub price: i64,
    pub payment_status: PaymentStatus,
    #[schema(example = "EGOV-1718012345678-k3j9x0a2b")]
    pub payment_reference: String,
    pub timestamp: DateTime<Utc>,
}

impl RequestSummary {
    pub fn from_model(model: request::Model, catalog: &ServiceCatalog) -> Self {
        Self {
            service_name: catalog.display_name(&model.service_type).to_string(),
            form_data: form_data_from_json(&model.form_data),
            id: model.id,
            service_type: model.service_type,
            price: model.price,
            payment_status: model.payment_status,
            payment_reference: model.payment_reference,
            timestamp: model.timestamp,
        }
    }
}

/// Dashboard: every request of the caller, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/requests",
    responses(
        (status = 200, description = "Caller's requests", body = ApiResponse<Vec<RequestSummary>>),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorResponse),
        (status = 503, description = "Requests could not be loaded", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "requests"
)]
pub async fn list_requests(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<RequestSummary>> {
    list(&state, &user, RequestFilter::All).await
}

/// Payment history: paid requests only.
#[utoipa::path(
    get,
    path = "/api/v1/payments/history",
    responses(
        (status = 200, description = "Caller's paid requests", body = ApiResponse<Vec<RequestSummary>>),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorResponse),
        (status = 503, description = "History could not be loaded", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn payment_history(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<RequestSummary>> {
    list(&state, &user, RequestFilter::Paid).await
}

async fn list(
    state: &AppState,
    user: &AuthUser,
    filter: RequestFilter,
) -> ApiResult<Vec<RequestSummary>> {
    let catalog = &state.services.catalog;
    let records = state
        .services
        .requests
        .list_for_user(&user.user_id, filter)
        .await?;
    Ok(Json(ApiResponse::success(
        records
            .into_iter()
            .map(|r| RequestSummary::from_model(r, catalog))
            .collect(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/requests/{id}",
    params(("id" = i32, Path, description = "Request id")),
    responses(
        (status = 200, description = "Request", body = ApiResponse<RequestSummary>),
        (status = 404, description = "No such request for this user", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "requests"
)]
pub async fn get_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> ApiResult<RequestSummary> {
    let record = state.services.requests.get_for_user(&user.user_id, id).await?;
    Ok(Json(ApiResponse::success(RequestSummary::from_model(
        record,
        &state.services.catalog,
    ))))
}

/// PDF certificate for one of the caller's requests.
#[utoipa::path(
    get,
    path = "/api/v1/requests/{id}/certificate",
    params(("id" = i32, Path, description = "Request id")),
    responses(
        (status = 200, description = "Certificate PDF", content_type = "application/pdf", body = Vec<u8>),
        (status = 404, description = "No such request for this user", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "requests"
)]
pub async fn download_certificate(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, ServiceError> {
    let record = state.services.requests.get_for_user(&user.user_id, id).await?;
    let certificate = state.services.certificates.render_record(&record)?;
    info!(request_id = id, filename = %certificate.filename, "certificate rendered");

    Ok((
        [
            (header::CONTENT_TYPE, PDF_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", certificate.filename),
            ),
        ],
        certificate.bytes,
    ))
}

pub fn request_routes() -> Router<AppState> {
    Router::new()
        .route("/requests", get(list_requests))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/certificate", get(download_certificate))
        .route("/payments/history", get(payment_history))
}
