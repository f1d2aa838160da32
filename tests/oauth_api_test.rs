// Integration tests for the OAuth connect routes.
//
// The router runs against in-memory stores; the provider's token endpoint is
// a mockito server.

use apigate::api::{create_oauth_router, OAuthAppState, SUBJECT_HEADER};
use apigate::cache::{LogicalKey, MemoryCache};
use apigate::config::TokenConfig;
use apigate::credentials::MemoryCredentialStore;
use apigate::oauth::{CsrfStates, HttpTokenEndpoint, OAuthProviderConfig};
use apigate::rate_limit::RateLimiter;
use apigate::retry::RetryPolicy;
use apigate::token::TokenManager;
use apigate::Gateway;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

// ── Test state & router ───────────────────────────────────────────────────────

fn provider(server: &mockito::ServerGuard) -> OAuthProviderConfig {
    OAuthProviderConfig {
        auth_url: "https://accounts.example.com/o/oauth2/v2/auth".to_string(),
        token_url: format!("{}/token", server.url()),
        scopes: vec!["https://www.googleapis.com/auth/youtube.readonly".to_string()],
        client_id: "client-123".to_string(),
        client_secret: "secret".to_string(),
    }
}

fn create_test_app(server: &mockito::ServerGuard) -> (Router, Gateway) {
    let provider = provider(server);
    let endpoint = Arc::new(HttpTokenEndpoint::new(&provider));
    let tokens = TokenManager::new(
        Arc::new(MemoryCredentialStore::new()),
        endpoint.clone(),
        &TokenConfig::default(),
    );
    let gateway = Gateway::new(
        Arc::new(RateLimiter::new(100, Duration::from_secs(60), Duration::from_secs(1))),
        Arc::new(MemoryCache::new(Duration::from_secs(300), 100)),
        Arc::new(tokens),
        RetryPolicy::new(1, Duration::ZERO),
        Some(Duration::ZERO),
    );

    let router = create_oauth_router(OAuthAppState {
        gateway: gateway.clone(),
        endpoint,
        provider,
        states: CsrfStates::new(600),
        callback_base_url: "http://localhost:3000".to_string(),
    });
    (router, gateway)
}

fn get(uri: &str, subject: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(subject) = subject {
        builder = builder.header(SUBJECT_HEADER, subject);
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Run the start leg and return the issued CSRF state.
async fn start_flow(app: &Router, subject: &str) -> String {
    let response = app
        .clone()
        .oneshot(get("/api/oauth/start", Some(subject)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    location
        .split(|c: char| c == '?' || c == '&')
        .find_map(|pair| pair.strip_prefix("state="))
        .unwrap()
        .to_string()
}

async fn mock_code_exchange(server: &mut mockito::ServerGuard) -> mockito::Mock {
    server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            mockito::Matcher::UrlEncoded("code".into(), "the-code".into()),
            mockito::Matcher::UrlEncoded(
                "redirect_uri".into(),
                "http://localhost:3000/api/oauth/callback".into(),
            ),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"access_token":"at","refresh_token":"rt","expires_in":3599,"scope":"https://www.googleapis.com/auth/youtube.readonly","token_type":"Bearer"}"#,
        )
        .create_async()
        .await
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_requires_subject() {
    let server = mockito::Server::new_async().await;
    let (app, _) = create_test_app(&server);

    let response = app.oneshot(get("/api/oauth/start", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_start_redirects_to_provider() {
    let server = mockito::Server::new_async().await;
    let (app, _) = create_test_app(&server);

    let response = app
        .oneshot(get("/api/oauth/start", Some("user-1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
    assert!(location.starts_with("https://accounts.example.com/o/oauth2/v2/auth?"));
    assert!(location.contains("client_id=client-123"));
    assert!(location.contains("access_type=offline"));
    assert!(location.contains("prompt=consent"));
    assert!(location.contains(&format!(
        "redirect_uri={}",
        urlencoding::encode("http://localhost:3000/api/oauth/callback")
    )));
}

#[tokio::test]
async fn test_full_connect_status_disconnect_flow() {
    let mut server = mockito::Server::new_async().await;
    let exchange = mock_code_exchange(&mut server).await;
    let (app, gateway) = create_test_app(&server);

    let state = start_flow(&app, "user-1").await;

    let response = app
        .clone()
        .oneshot(get(
            &format!("/api/oauth/callback?code=the-code&state={}", state),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["credential"]["subject_id"], "user-1");
    assert_eq!(body["credential"]["refreshable"], true);
    assert!(body["credential"].get("access_token").is_none());
    exchange.assert_async().await;

    let response = app
        .clone()
        .oneshot(get("/api/oauth/status", Some("user-1")))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["connected"], true);
    assert_eq!(
        body["credential"]["scopes"],
        serde_json::json!(["https://www.googleapis.com/auth/youtube.readonly"])
    );

    // Populate the cache so the disconnect has something to drop
    let _: u32 = gateway
        .fetch_with_cache("user-1", &LogicalKey::new("channel"), |_| async { Ok(1) })
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/oauth/connection")
                .header(SUBJECT_HEADER, "user-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["disconnected"], true);
    assert_eq!(body["cache_entries_removed"], 1);

    let response = app
        .oneshot(get("/api/oauth/status", Some("user-1")))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["connected"], false);
}

#[tokio::test]
async fn test_callback_state_is_single_use() {
    let mut server = mockito::Server::new_async().await;
    let _exchange = mock_code_exchange(&mut server).await;
    let (app, _) = create_test_app(&server);

    let state = start_flow(&app, "user-1").await;
    let uri = format!("/api/oauth/callback?code=the-code&state={}", state);

    let first = app.clone().oneshot(get(&uri, None)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let replay = app.oneshot(get(&uri, None)).await.unwrap();
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_callback_with_unknown_state() {
    let server = mockito::Server::new_async().await;
    let (app, _) = create_test_app(&server);

    let response = app
        .oneshot(get("/api/oauth/callback?code=the-code&state=forged", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_callback_with_provider_error() {
    let server = mockito::Server::new_async().await;
    let (app, _) = create_test_app(&server);

    let response = app
        .oneshot(get(
            "/api/oauth/callback?error=access_denied&error_description=User+cancelled",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("access_denied"));
}

#[tokio::test]
async fn test_callback_exchange_failure_is_bad_gateway() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;
    let (app, _) = create_test_app(&server);

    let state = start_flow(&app, "user-1").await;
    let response = app
        .oneshot(get(
            &format!("/api/oauth/callback?code=bad&state={}", state),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_status_for_unconnected_subject() {
    let server = mockito::Server::new_async().await;
    let (app, _) = create_test_app(&server);

    let response = app
        .oneshot(get("/api/oauth/status", Some("nobody")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, serde_json::json!({"connected": false}));
}
