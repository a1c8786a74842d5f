use crate::{
    catalog::ServiceDefinition, errors::ServiceError, handlers::AppState, ApiResponse, ApiResult,
};
use axum::{
    extract::{Json, Path, State},
    routing::get,
    Router,
};

/// Services a citizen can request, with their form fields and prices.
#[utoipa::path(
    get,
    path = "/api/v1/services",
    responses(
        (status = 200, description = "Service catalog", body = ApiResponse<Vec<ServiceDefinition>>)
    ),
    tag = "catalog"
)]
pub async fn list_services(State(state): State<AppState>) -> ApiResult<Vec<ServiceDefinition>> {
    Ok(Json(ApiResponse::success(
        state.services.catalog.list().to_vec(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/services/{key}",
    params(("key" = String, Path, description = "Service key, e.g. birth-certificate")),
    responses(
        (status = 200, description = "Service definition", body = ApiResponse<ServiceDefinition>),
        (status = 400, description = "Unknown service", body = crate::errors::ErrorResponse)
    ),
    tag = "catalog"
)]
pub async fn get_service(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<ServiceDefinition> {
    state
        .services
        .catalog
        .lookup(&key)
        .cloned()
        .map(|service| Json(ApiResponse::success(service)))
        .ok_or(ServiceError::UnknownService(key))
}

/// Public; the catalog carries no personal data.
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/services", get(list_services))
        .route("/services/:key", get(get_service))
}
