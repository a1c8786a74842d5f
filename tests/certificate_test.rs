mod common;

use axum::{
    body::to_bytes,
    http::{header, Method, StatusCode},
};
use common::{birth_certificate_submission, json_body, TestApp};

async fn recorded_birth_certificate(app: &TestApp) -> i64 {
    let session = json_body(
        app.request_authenticated(
            Method::POST,
            "/api/v1/checkout",
            Some(birth_certificate_submission()),
        )
        .await,
    )
    .await;
    assert_eq!(session["data"]["price"], 5000);
    let reference = session["data"]["reference"].as_str().unwrap().to_string();

    let record = json_body(
        app.request_authenticated(
            Method::POST,
            &format!("/api/v1/checkout/{}/confirm", reference),
            None,
        )
        .await,
    )
    .await;
    record["data"]["id"].as_i64().unwrap()
}

#[tokio::test]
async fn owner_downloads_birth_certificate_pdf() {
    let app = TestApp::new().await;
    let id = recorded_birth_certificate(&app).await;

    let response = app
        .request_authenticated(
            Method::GET,
            &format!("/api/v1/requests/{}/certificate", id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/pdf"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"birth-certificate_Chidi_Obi.pdf\""
    );

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(b"%PDF-"));
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("Birth Certificate"));
    assert!(text.contains("Full Name: Chidi Obi"));
    assert!(text.contains("This is an electronically generated document"));
}

#[tokio::test]
async fn synthesised_measurements_are_not_stored() {
    let app = TestApp::new().await;
    let id = recorded_birth_certificate(&app).await;

    app.request_authenticated(
        Method::GET,
        &format!("/api/v1/requests/{}/certificate", id),
        None,
    )
    .await;

    let record = json_body(
        app.request_authenticated(Method::GET, &format!("/api/v1/requests/{}", id), None)
            .await,
    )
    .await;
    assert!(record["data"]["formData"].get("height").is_none());
    assert!(record["data"]["formData"].get("weight").is_none());
}

#[tokio::test]
async fn only_the_owner_can_download() {
    let app = TestApp::new().await;
    let id = recorded_birth_certificate(&app).await;
    let intruder = app.token_for("citizen-2", "bola@example.com");

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/requests/{}/certificate", id),
            None,
            Some(&intruder),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
