//! Black-box tests of the registrar client against a mocked gateway.

use retunnel_client::RegistrarClient;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn register_anonymous_posts_a_synthetic_email_and_returns_the_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "auth_token": "tok_fresh",
            "email": "anon-deadbeef@retunnel.com",
        })))
        .mount(&server)
        .await;

    let client = RegistrarClient::new(server.uri(), true).unwrap();
    let result = client.register_anonymous().await.unwrap();
    assert_eq!(result.auth_token, "tok_fresh");
}

#[tokio::test]
async fn reactivate_falls_back_to_registration_on_404() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/reactivate-token"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "auth_token": "tok_new",
            "email": "anon-cafebabe@retunnel.com",
        })))
        .mount(&server)
        .await;

    let client = RegistrarClient::new(server.uri(), true).unwrap();
    let result = client.repair_token(Some("tok_old")).await.unwrap();
    assert_eq!(result.auth_token, "tok_new");
}

#[tokio::test]
async fn reactivate_succeeds_without_falling_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/reactivate-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "auth_token": "tok_reactivated",
            "email": "user@retunnel.com",
        })))
        .mount(&server)
        .await;

    let client = RegistrarClient::new(server.uri(), true).unwrap();
    let result = client.repair_token(Some("tok_old")).await.unwrap();
    assert_eq!(result.auth_token, "tok_reactivated");
}

#[tokio::test]
async fn reactivate_with_no_prior_token_registers_anonymously() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "auth_token": "tok_anon",
            "email": "anon-00000000@retunnel.com",
        })))
        .mount(&server)
        .await;

    let client = RegistrarClient::new(server.uri(), true).unwrap();
    let result = client.repair_token(None).await.unwrap();
    assert_eq!(result.auth_token, "tok_anon");
}
