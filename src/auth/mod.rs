/*!
 * # Authentication
 *
 * Citizens sign in with the identity service, which issues HS256 bearer JWTs.
 * This module validates those tokens locally (signature, expiry, issuer and
 * audience), exposes the caller as an [`AuthUser`] and keeps an in-process
 * revocation list for sign-out.
 */

use async_trait::async_trait;
use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,           // Subject (identity user id)
    pub name: Option<String>,  // Display name
    pub email: Option<String>, // Email used for checkout receipts
    #[serde(default)]
    pub roles: Vec<String>,
    pub jti: String, // Token id, the revocation key
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
    pub aud: String,
}

/// The signed-in citizen, as seen by handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            expires_at: Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .unwrap_or_else(Utc::now),
            user_id: claims.sub,
            name: claims.name,
            email: claims.email,
            roles: claims.roles,
            token_id: claims.jti,
        }
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub access_token_expiration: Duration,
}

impl AuthConfig {
    pub fn new(
        jwt_secret: String,
        jwt_audience: String,
        jwt_issuer: String,
        access_token_expiration: Duration,
    ) -> Self {
        Self {
            jwt_secret,
            jwt_audience,
            jwt_issuer,
            access_token_expiration,
        }
    }

    pub fn from_app_config(cfg: &crate::config::AppConfig) -> Self {
        Self::new(
            cfg.jwt_secret.clone(),
            cfg.auth_audience.clone(),
            cfg.auth_issuer.clone(),
            Duration::from_secs(cfg.jwt_expiration as u64),
        )
    }
}

/// Token blacklist entry
#[derive(Clone, Debug)]
struct RevokedToken {
    jti: String,
    expiry: DateTime<Utc>,
}

/// Validates identity tokens and tracks revocations.
#[derive(Debug, Clone)]
pub struct AuthService {
    config: AuthConfig,
    revoked: Arc<RwLock<Vec<RevokedToken>>>,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            revoked: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Issues an access token for a subject. The identity service shares the
    /// signing secret; the portal itself only uses this in tooling and tests.
    pub fn issue_token(
        &self,
        user_id: &str,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = now
            + ChronoDuration::from_std(self.config.access_token_expiration)
                .map_err(|_| AuthError::InternalError("Invalid token duration".to_string()))?;

        let claims = Claims {
            sub: user_id.to_string(),
            name: name.map(str::to_string),
            email: email.map(str::to_string),
            roles: vec!["citizen".to_string()],
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            nbf: now.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    /// Validate a JWT token and extract the claims
    pub async fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);
        validation.validate_nbf = true;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?
        .claims;

        if self.is_revoked(&claims.jti).await {
            return Err(AuthError::RevokedToken);
        }

        Ok(claims)
    }

    /// Revoke a presented token.
    pub async fn revoke_token(&self, token: &str) -> Result<(), AuthError> {
        let claims = self.validate_token(token).await?;
        let user = AuthUser::from(claims);
        self.revoke(&user.token_id, user.expires_at).await;
        Ok(())
    }

    /// Revoke by token id; the entry is kept until the token would have expired anyway.
    pub async fn revoke(&self, jti: &str, expiry: DateTime<Utc>) {
        let mut revoked = self.revoked.write().await;
        revoked.push(RevokedToken {
            jti: jti.to_string(),
            expiry,
        });
        let now = Utc::now();
        revoked.retain(|t| t.expiry > now);
    }

    async fn is_revoked(&self, token_id: &str) -> bool {
        let revoked = self.revoked.read().await;
        revoked.iter().any(|t| t.jti == token_id)
    }
}

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingAuth,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Authentication token has been revoked")]
    RevokedToken,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenCreation(_) | AuthError::InternalError(_) => {
                ServiceError::InternalError(err.to_string())
            }
            _ => ServiceError::Unauthorized(err.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingAuth)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Validates the bearer token and puts the [`AuthUser`] into request extensions.
pub async fn auth_middleware(
    State(auth_service): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return AuthError::MissingAuth.into_response();
    };

    match auth_service.validate_token(token).await {
        Ok(claims) => {
            debug!(user_id = %claims.sub, "authenticated request");
            request.extensions_mut().insert(AuthUser::from(claims));
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self, auth_service: Arc<AuthService>) -> Self;
}

impl<S> AuthRouterExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self, auth_service: Arc<AuthService>) -> Self {
        self.route_layer(axum::middleware::from_fn_with_state(
            auth_service,
            auth_middleware,
        ))
    }
}

/// Authentication routes
pub fn auth_routes<S>(auth_service: Arc<AuthService>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/logout", post(logout_handler))
        .with_auth(auth_service.clone())
        .layer(DefaultBodyLimit::max(1024 * 64))
        .with_state(auth_service)
}

/// Sign out: the presented token stops working immediately.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Token revoked"),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn logout_handler(
    State(auth_service): State<Arc<AuthService>>,
    auth_user: AuthUser,
) -> Json<serde_json::Value> {
    auth_service
        .revoke(&auth_user.token_id, auth_user.expires_at)
        .await;
    info!(user_id = %auth_user.user_id, "signed out");
    Json(serde_json::json!({ "message": "Successfully logged out" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn service() -> AuthService {
        AuthService::new(AuthConfig::new(
            "a-very-long-test-secret-with-enough-entropy-123".into(),
            "egov-portal".into(),
            "egov-identity".into(),
            Duration::from_secs(600),
        ))
    }

    #[tokio::test]
    async fn issued_tokens_validate() {
        let auth = service();
        let token = auth.issue_token("u1", Some("Ada"), Some("ada@example.com")).unwrap();
        let claims = auth.validate_token(&token).await.unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.email.as_deref(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn revoked_tokens_are_rejected() {
        let auth = service();
        let token = auth.issue_token("u1", None, None).unwrap();
        auth.revoke_token(&token).await.unwrap();
        assert_matches!(auth.validate_token(&token).await, Err(AuthError::RevokedToken));
    }

    #[tokio::test]
    async fn foreign_audience_is_rejected() {
        let other = AuthService::new(AuthConfig::new(
            "a-very-long-test-secret-with-enough-entropy-123".into(),
            "another-app".into(),
            "egov-identity".into(),
            Duration::from_secs(600),
        ));
        let token = other.issue_token("u1", None, None).unwrap();
        assert_matches!(service().validate_token(&token).await, Err(AuthError::InvalidToken));
    }

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Token abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
