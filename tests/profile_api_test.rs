mod common;

use axum::http::{Method, StatusCode};
use common::{json_body, TestApp, CITIZEN, CITIZEN_EMAIL};
use serde_json::json;

fn registration() -> serde_json::Value {
    json!({
        "name": "Ada Obi",
        "email": CITIZEN_EMAIL,
        "nin": "12345678901",
        "dateOfBirth": "1990-02-14"
    })
}

#[tokio::test]
async fn missing_profile_reports_no_data() {
    let app = TestApp::new().await;
    let response = app
        .request_authenticated(Method::GET, "/api/v1/profile", None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("No profile data found."));
}

#[tokio::test]
async fn registration_creates_citizen_profile() {
    let app = TestApp::new().await;
    let response = app
        .request_authenticated(Method::POST, "/api/v1/profile", Some(registration()))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    assert_eq!(created["data"]["userId"], CITIZEN);
    assert_eq!(created["data"]["role"], "citizen");

    let fetched = json_body(
        app.request_authenticated(Method::GET, "/api/v1/profile", None)
            .await,
    )
    .await;
    assert_eq!(fetched["data"]["name"], "Ada Obi");
    assert_eq!(fetched["data"]["nin"], "12345678901");

    let again = app
        .request_authenticated(Method::POST, "/api/v1/profile", Some(registration()))
        .await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn name_can_be_changed() {
    let app = TestApp::new().await;
    app.request_authenticated(Method::POST, "/api/v1/profile", Some(registration()))
        .await;

    let response = app
        .request_authenticated(
            Method::PATCH,
            "/api/v1/profile",
            Some(json!({ "name": "Ada Okafor" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["name"], "Ada Okafor");
}

#[tokio::test]
async fn short_nin_is_rejected() {
    let app = TestApp::new().await;
    let mut body = registration();
    body["nin"] = json!("1234");

    let response = app
        .request_authenticated(Method::POST, "/api/v1/profile", Some(body))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
