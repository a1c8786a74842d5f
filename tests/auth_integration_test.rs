mod common;

use axum::http::{Method, StatusCode};
use common::{json_body, TestApp};

#[tokio::test]
async fn public_routes_need_no_token() {
    let app = TestApp::new().await;

    let status = app.request(Method::GET, "/api/v1/status", None, None).await;
    assert_eq!(status.status(), StatusCode::OK);

    let services = app.request(Method::GET, "/api/v1/services", None, None).await;
    assert_eq!(services.status(), StatusCode::OK);
    let body = json_body(services).await;
    assert!(!body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn garbage_token_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, "/api/v1/requests", None, Some("not.a.jwt"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["kind"], "authentication");
}

#[tokio::test]
async fn logout_revokes_the_token() {
    let app = TestApp::new().await;
    let token = app.token_for("citizen-9", "femi@example.com");

    let before = app
        .request(Method::GET, "/api/v1/requests", None, Some(&token))
        .await;
    assert_eq!(before.status(), StatusCode::OK);

    let logout = app
        .request(Method::POST, "/auth/logout", None, Some(&token))
        .await;
    assert_eq!(logout.status(), StatusCode::OK);

    let after = app
        .request(Method::GET, "/api/v1/requests", None, Some(&token))
        .await;
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);

    // Other sessions are unaffected
    let other = app
        .request_authenticated(Method::GET, "/api/v1/requests", None)
        .await;
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn logout_without_token_is_unauthorized() {
    let app = TestApp::new().await;
    let response = app.request(Method::POST, "/auth/logout", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
