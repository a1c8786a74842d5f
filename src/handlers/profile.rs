use crate::{
    auth::AuthUser,
    handlers::AppState,
    services::profiles::{CreateProfile, Profile, UpdateProfileName},
    ApiResponse, ApiResult,
};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::get,
    Router,
};

#[utoipa::path(
    get,
    path = "/api/v1/profile",
    responses(
        (status = 200, description = "Caller's profile", body = ApiResponse<Profile>),
        (status = 404, description = "No profile data found.", body = crate::errors::ErrorResponse),
        (status = 503, description = "Profile could not be loaded", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "profile"
)]
pub async fn get_profile(State(state): State<AppState>, user: AuthUser) -> ApiResult<Profile> {
    let profile = state.services.profiles.get(&user.user_id).await?;
    Ok(Json(ApiResponse::success(profile)))
}

/// Registration step: stores the profile for a freshly created identity.
#[utoipa::path(
    post,
    path = "/api/v1/profile",
    request_body = CreateProfile,
    responses(
        (status = 201, description = "Profile created", body = ApiResponse<Profile>),
        (status = 400, description = "Invalid input", body = crate::errors::ErrorResponse),
        (status = 409, description = "Profile already exists", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "profile"
)]
pub async fn create_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<CreateProfile>,
) -> Result<(StatusCode, Json<ApiResponse<Profile>>), crate::errors::ServiceError> {
    let profile = state.services.profiles.create(&user.user_id, input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(profile))))
}

#[utoipa::path(
    patch,
    path = "/api/v1/profile",
    request_body = UpdateProfileName,
    responses(
        (status = 200, description = "Name updated", body = ApiResponse<Profile>),
        (status = 404, description = "No profile data found.", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "profile"
)]
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<UpdateProfileName>,
) -> ApiResult<Profile> {
    let profile = state
        .services
        .profiles
        .update_name(&user.user_id, input)
        .await?;
    Ok(Json(ApiResponse::success(profile)))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new().route(
        "/profile",
        get(get_profile).post(create_profile).patch(update_profile),
    )
}
