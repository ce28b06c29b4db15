use review_bridge::session::SessionStatus;
use review_bridge::auth::CallbackOutcome;
use review_bridge::{BridgeConfig, BridgeService};
use serde_json::json;
use url::Url;

fn service_against(bridge_url: &str) -> BridgeService {
    review_bridge::utils::logging::init();
    let base: Url = format!("{bridge_url}/").parse().unwrap();
    let config = BridgeConfig::new(
        "it-client",
        &base,
        "http://localhost:8085/callback".parse().unwrap(),
    )
    .unwrap();
    BridgeService::new(config)
}

fn state_from(authorization_url: &str) -> String {
    let url: Url = authorization_url.parse().unwrap();
    url.query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("authorization url carries a state")
}

#[tokio::test]
async fn oauth_login_completes_with_both_credential_sets() {
    let mut server = mockito::Server::new_async().await;

    let token_mock = server
        .mock("POST", "/oauth/token")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            mockito::Matcher::UrlEncoded("code".into(), "auth-code-1".into()),
            mockito::Matcher::UrlEncoded("client_id".into(), "it-client".into()),
        ]))
        .with_status(200)
        .with_body(
            json!({
                "access_token": "at-int",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "rt-int",
                "sid": "sid-int",
                "vendor_client_id": "vc-int",
                "api_base_url": "https://api.vendor.example",
                "login_timeout_hours": 24,
                "sid_created_at": 1700000000
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let userinfo_mock = server
        .mock("GET", "/oauth/userinfo")
        .match_header("authorization", "Bearer at-int")
        .with_status(200)
        .with_body(json!({"sub": "user-9", "email": "u9@example.com"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let svc = service_against(&server.url());

    let start = svc.login(Some("eu1")).await;
    assert!(start.authorization_url.contains("code_challenge="));
    assert!(start.authorization_url.contains("platform=eu1"));
    let state = state_from(&start.authorization_url);

    let outcome = svc
        .oauth_callback(Some("auth-code-1"), Some(&state), None)
        .await;
    match outcome {
        CallbackOutcome::Completed {
            session_id,
            vendor_usable,
        } => {
            assert_eq!(session_id, start.session_id);
            assert!(vendor_usable);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    token_mock.assert_async().await;
    userinfo_mock.assert_async().await;

    let session = svc.sessions().get(&start.session_id).await.unwrap();
    let done = session.completed().expect("session completed");
    assert_eq!(done.oauth.access_token, "at-int");
    assert_eq!(done.oauth.refresh_token.as_deref(), Some("rt-int"));
    let vendor = done.vendor.as_ref().expect("vendor set populated");
    assert_eq!(vendor.sid, "sid-int");
    assert_eq!(vendor.client_id, "vc-int");
    assert_eq!(vendor.api_base_url, "https://api.vendor.example");
    assert_eq!(done.profile.as_ref().unwrap().sub.as_deref(), Some("user-9"));

    let report = svc.session_status(&start.session_id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert!(report.vendor_usable);
    assert!(report.sid_expiry.is_some());
}

#[tokio::test]
async fn oauth_completes_without_vendor_fields() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_body(
            json!({
                "access_token": "at-plain",
                "token_type": "Bearer",
                "expires_in": 3600
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("GET", "/oauth/userinfo")
        .with_status(500)
        .create_async()
        .await;

    let svc = service_against(&server.url());
    let start = svc.login(None).await;
    let state = state_from(&start.authorization_url);

    // Userinfo failure is non-fatal; missing vendor fields leave the session
    // OAuth-complete but not vendor-usable.
    let outcome = svc.oauth_callback(Some("code"), Some(&state), None).await;
    match outcome {
        CallbackOutcome::Completed { vendor_usable, .. } => assert!(!vendor_usable),
        other => panic!("expected completion, got {other:?}"),
    }

    let report = svc.session_status(&start.session_id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert!(!report.vendor_usable);
}

#[tokio::test]
async fn replayed_state_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/oauth/token")
        .with_status(200)
        .with_body(
            json!({"access_token": "at", "token_type": "Bearer"}).to_string(),
        )
        .create_async()
        .await;
    server
        .mock("GET", "/oauth/userinfo")
        .with_status(404)
        .create_async()
        .await;

    let svc = service_against(&server.url());
    let start = svc.login(None).await;
    let state = state_from(&start.authorization_url);

    let first = svc.oauth_callback(Some("code"), Some(&state), None).await;
    assert!(matches!(first, CallbackOutcome::Completed { .. }));

    // The state was consumed by the first callback.
    let replay = svc.oauth_callback(Some("code"), Some(&state), None).await;
    match replay {
        CallbackOutcome::Error { code, .. } => assert_eq!(code, "invalid_state"),
        other => panic!("expected rejection, got {other:?}"),
    }
}
