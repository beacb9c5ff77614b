//! Token attachment, single-flight refresh and logout.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{go_offline, go_online, init_tracing, test_config};
use futures::future::join_all;
use http::StatusCode;
use waypoint::auth::{AuthCallbacks, AuthStatus};
use waypoint::connectivity::{InterfaceKind, ManualSignal};
use waypoint::{CallbackError, Client, ClientConfig, Error, RequestOptions};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Callbacks handing out `newtok` after `failures` failed attempts.
#[derive(Clone, Default)]
struct Tokens {
    failures: usize,
    always_fail: bool,
    refreshes: Arc<AtomicUsize>,
    refreshed: Arc<AtomicUsize>,
    logouts: Arc<AtomicUsize>,
}

#[async_trait]
impl AuthCallbacks for Tokens {
    async fn refresh_token(
        &self,
        refresh_token: Option<String>,
    ) -> Result<Option<String>, CallbackError> {
        assert_eq!(refresh_token.as_deref(), Some("refresh"));
        let attempt = self.refreshes.fetch_add(1, Ordering::SeqCst);
        // keep concurrent 401s piling up on the same cycle
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.always_fail || attempt < self.failures {
            return Err(CallbackError::msg("refresh endpoint unavailable"));
        }
        Ok(Some("newtok".to_owned()))
    }

    async fn on_token_refreshed(&self, token: &str) -> Result<(), CallbackError> {
        assert_eq!(token, "newtok");
        self.refreshed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_logout(&self) -> Result<(), CallbackError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Callbacks whose token lives in app storage.
struct StoredToken;

#[async_trait]
impl AuthCallbacks for StoredToken {
    async fn get_token(&self) -> Option<String> {
        Some("stored".to_owned())
    }

    async fn refresh_token(
        &self,
        _refresh_token: Option<String>,
    ) -> Result<Option<String>, CallbackError> {
        Ok(None)
    }
}

async fn mount_token_guard(server: &MockServer) {
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer newtok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(2)
        .mount(server)
        .await;
}

fn build(server: &MockServer, config: ClientConfig, tokens: Tokens) -> Client {
    init_tracing();
    let client = Client::builder(server.uri())
        .config(config)
        .auth_callbacks(tokens)
        .build()
        .unwrap();
    client.update_auth_tokens(Some("old".to_owned()), Some("refresh".to_owned()));
    client
}

#[tokio::test]
async fn token_is_attached_with_configured_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("x-api-token", "Token old"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config();
    config.auth.header_name = "X-Api-Token".to_owned();
    config.auth.token_prefix = "Token ".to_owned();
    let client = build(&server, config, Tokens::default());

    let response = client.get("/me", RequestOptions::new()).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(client.auth_status().await, AuthStatus::Authenticated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unauthorized_requests_share_one_refresh() {
    let server = MockServer::start().await;
    mount_token_guard(&server).await;

    let tokens = Tokens::default();
    let client = build(&server, test_config(), tokens.clone());

    let calls = (0..8).map(|i| {
        let client = client.clone();
        async move { client.get(&format!("/items/{i}"), RequestOptions::new()).await }
    });
    let responses = join_all(calls).await;

    for response in responses {
        let response = response.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), "ok");
    }
    assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(tokens.refreshed.load(Ordering::SeqCst), 1);
    assert_eq!(client.auth().pending_count(), 0);
    assert_eq!(client.auth().current_token().await.as_deref(), Some("newtok"));
}

#[tokio::test]
async fn refresh_is_retried_before_replay() {
    let server = MockServer::start().await;
    mount_token_guard(&server).await;

    let tokens = Tokens {
        failures: 1,
        ..Tokens::default()
    };
    let client = build(&server, test_config(), tokens.clone());

    let response = client.get("/feed", RequestOptions::new()).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 2);
    assert_eq!(tokens.logouts.load(Ordering::SeqCst), 0);

    let received = server.received_requests().await.unwrap();
    let last = received.last().unwrap();
    assert_eq!(
        last.headers.get("authorization").unwrap().to_str().unwrap(),
        "Bearer newtok"
    );
}

#[tokio::test]
async fn failed_refresh_logs_out_once_per_cooldown() {
    let server = MockServer::start().await;
    mount_token_guard(&server).await;

    let mut config = test_config();
    config.auth.max_retry_attempts = 1;
    config.auth.logout_cooldown = Duration::from_millis(300);
    let tokens = Tokens {
        always_fail: true,
        ..Tokens::default()
    };
    let client = build(&server, config, tokens.clone());

    let error = client.get("/feed", RequestOptions::new()).await.unwrap_err();
    assert!(matches!(error, Error::Unauthorized { status: 401 }), "{error:?}");
    assert_eq!(tokens.logouts.load(Ordering::SeqCst), 1);
    assert!(!client.is_authenticated().await);
    assert_eq!(client.auth_status().await, AuthStatus::Unauthenticated);

    // still cooling down
    client.update_auth_tokens(Some("old".to_owned()), Some("refresh".to_owned()));
    let error = client.get("/feed", RequestOptions::new()).await.unwrap_err();
    assert!(matches!(error, Error::Unauthorized { .. }));
    assert_eq!(tokens.logouts.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    client.update_auth_tokens(Some("old".to_owned()), Some("refresh".to_owned()));
    let error = client.get("/feed", RequestOptions::new()).await.unwrap_err();
    assert!(matches!(error, Error::Unauthorized { .. }));
    assert_eq!(tokens.logouts.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_failed_refresh_and_one_logout() {
    let server = MockServer::start().await;
    mount_token_guard(&server).await;

    let mut config = test_config();
    config.auth.max_retry_attempts = 1;
    config.auth.logout_cooldown = Duration::from_secs(30);
    let tokens = Tokens {
        always_fail: true,
        ..Tokens::default()
    };
    let client = build(&server, config, tokens.clone());

    let calls = (0..8).map(|i| {
        let client = client.clone();
        async move { client.get(&format!("/items/{i}"), RequestOptions::new()).await }
    });
    for outcome in join_all(calls).await {
        let error = outcome.unwrap_err();
        assert!(matches!(error, Error::Unauthorized { status: 401 }), "{error:?}");
    }

    assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(tokens.refreshed.load(Ordering::SeqCst), 0);
    assert_eq!(tokens.logouts.load(Ordering::SeqCst), 1);
    assert_eq!(client.auth().pending_count(), 0);
    assert!(!client.is_authenticated().await);
}

#[tokio::test]
async fn missing_token_skips_refresh_and_logs_out() {
    let server = MockServer::start().await;
    mount_token_guard(&server).await;

    let tokens = Tokens::default();
    let client = build(&server, test_config(), tokens.clone());
    client.update_auth_tokens(None, Some("refresh".to_owned()));

    let error = client.get("/feed", RequestOptions::new()).await.unwrap_err();
    assert!(matches!(error, Error::Unauthorized { status: 401 }), "{error:?}");
    assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 0);
    assert_eq!(tokens.logouts.load(Ordering::SeqCst), 1);

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn token_replaced_during_request_is_reused_without_refresh() {
    let server = MockServer::start().await;
    let tokens = Tokens::default();
    let client = build(&server, test_config(), tokens.clone());
    client.update_auth_tokens(Some("current".to_owned()), Some("refresh".to_owned()));

    let token = client
        .auth()
        .handle_unauthorized(Some("stale".to_owned()))
        .await
        .unwrap();

    assert_eq!(token, "current");
    assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 0);
    assert_eq!(tokens.logouts.load(Ordering::SeqCst), 0);
    assert_eq!(client.auth().current_token().await.as_deref(), Some("current"));
}

#[tokio::test]
async fn queued_request_is_replayed_through_auth() {
    let server = MockServer::start().await;
    mount_token_guard(&server).await;

    init_tracing();
    let tokens = Tokens::default();
    let signal = ManualSignal::new(vec![InterfaceKind::Wifi]);
    let client = Client::builder(server.uri())
        .config(test_config())
        .signal(signal.clone())
        .auth_callbacks(tokens.clone())
        .build()
        .unwrap();
    client.update_auth_tokens(Some("old".to_owned()), Some("refresh".to_owned()));
    assert!(client.initialize().await);
    go_offline(&client, &signal).await;

    let pending = client
        .get("/feed", RequestOptions::new())
        .await
        .unwrap()
        .queued
        .expect("request should be queued");
    assert!(server.received_requests().await.unwrap().is_empty());

    go_online(&client, &signal).await;
    let replayed = tokio::time::timeout(Duration::from_secs(5), pending.wait())
        .await
        .expect("replay should finish")
        .unwrap();
    assert_eq!(replayed.status, StatusCode::OK);
    assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);

    let sent: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| {
            request.headers["authorization"]
                .to_str()
                .unwrap()
                .to_owned()
        })
        .collect();
    assert_eq!(sent, ["Bearer old", "Bearer newtok"]);
}

#[tokio::test]
async fn session_token_shadows_callback_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    init_tracing();
    let client = Client::builder(server.uri())
        .config(test_config())
        .auth_callbacks(StoredToken)
        .build()
        .unwrap();
    assert_eq!(client.auth().current_token().await.as_deref(), Some("stored"));

    client.update_auth_tokens(Some("session".to_owned()), None);
    client.get("/me", RequestOptions::new()).await.unwrap();
    assert_eq!(client.auth().current_token().await.as_deref(), Some("session"));

    client.update_auth_tokens(None, None);
    client.get("/me", RequestOptions::new()).await.unwrap();

    let sent: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| request.headers["authorization"].to_str().unwrap().to_owned())
        .collect();
    assert_eq!(sent, ["Bearer session", "Bearer stored"]);
}

#[tokio::test]
async fn refresh_call_unauthorized_is_returned_as_is() {
    let server = MockServer::start().await;
    mount_token_guard(&server).await;

    let tokens = Tokens::default();
    let client = build(&server, test_config(), tokens.clone());

    let response = client
        .get("/auth/refresh", RequestOptions::new().refresh_call())
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unauthorized_passes_through_without_callbacks() {
    let server = MockServer::start().await;
    mount_token_guard(&server).await;

    init_tracing();
    let client = Client::builder(server.uri())
        .config(test_config())
        .build()
        .unwrap();
    assert_eq!(client.auth_status().await, AuthStatus::Unconfigured);

    let response = client.get("/feed", RequestOptions::new()).await.unwrap();
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_can_be_configured_after_build() {
    let server = MockServer::start().await;
    mount_token_guard(&server).await;

    init_tracing();
    let client = Client::builder(server.uri())
        .config(test_config())
        .build()
        .unwrap();
    let tokens = Tokens::default();
    client.configure_auth(Arc::new(tokens.clone()), test_config().auth);
    client.update_auth_tokens(Some("old".to_owned()), Some("refresh".to_owned()));

    let response = client.get("/feed", RequestOptions::new()).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(tokens.refreshes.load(Ordering::SeqCst), 1);

    client.clear_auth();
    assert_eq!(client.auth_status().await, AuthStatus::Unconfigured);
    assert!(!client.is_authenticated().await);
}
