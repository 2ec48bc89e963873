use reqwest::StatusCode;
use serde_json::json;

mod common;

#[tokio::test]
async fn test_register_and_login() {
    let app = common::TestApp::spawn().await;
    let username = common::generate_username("auth");

    let user = app.register_user(&username).await;
    assert!(!user.token.is_empty());

    let resp = app
        .client
        .post(format!("{}/v1/sessions", app.server_url))
        .json(&json!({ "username": username, "password": "password123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["userId"], json!(user.user_id));
    assert!(body["expiresAt"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_duplicate_username_conflicts() {
    let app = common::TestApp::spawn().await;
    let username = common::generate_username("dup");
    app.register_user(&username).await;

    let resp = app
        .client
        .post(format!("{}/v1/users", app.server_url))
        .json(&json!({ "username": username, "password": "password123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_invalid_registration_is_rejected() {
    let app = common::TestApp::spawn().await;

    let resp = app
        .client
        .post(format!("{}/v1/users", app.server_url))
        .json(&json!({ "username": "ab", "password": "password123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .client
        .post(format!("{}/v1/users", app.server_url))
        .json(&json!({ "username": common::generate_username("short"), "password": "pw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_with_wrong_password() {
    let app = common::TestApp::spawn().await;
    let username = common::generate_username("wrongpw");
    app.register_user(&username).await;

    let resp = app
        .client
        .post(format!("{}/v1/sessions", app.server_url))
        .json(&json!({ "username": username, "password": "not-the-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let app = common::TestApp::spawn().await;

    let resp = app
        .client
        .post(format!("{}/v1/sessions", app.server_url))
        .header("x-request-id", "req-123")
        .json(&json!({ "username": "nobody_here", "password": "password123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers().get("x-request-id").unwrap(), "req-123");

    let resp = app.client.get(format!("{}/v1/messages/{}", app.server_url, uuid::Uuid::new_v4())).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().contains_key("x-request-id"));
}
