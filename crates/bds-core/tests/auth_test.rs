#![allow(clippy::unwrap_used)]
// Session lifecycle against a wiremock backend: sign-in, the refresh timer,
// rejection handling and session restore.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bds_api::{ApiClient, CredentialProvider, GatewaySettings, Scheduler};
use bds_config::storage::REFRESH_TOKEN;
use bds_config::{ClientStorage, Configuration};
use bds_core::error::CoreError;
use bds_core::model::LoginRequest;
use bds_core::service::{AuthOptions, AuthService, RefreshOutcome, SessionEvent, TokenHolder};
use bds_core::ConfigService;

// ── Helpers ─────────────────────────────────────────────────────────

/// Records every requested delay and blocks until released.
struct RecordingScheduler {
    delays: Mutex<Vec<Duration>>,
    gate: Semaphore,
}

impl Default for RecordingScheduler {
    fn default() -> Self {
        Self {
            delays: Mutex::default(),
            gate: Semaphore::new(0),
        }
    }
}

impl RecordingScheduler {
    fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
        self.gate.acquire().await.unwrap().forget();
    }
}

struct Harness {
    server: MockServer,
    auth: AuthService,
    storage: ClientStorage,
    scheduler: Arc<RecordingScheduler>,
}

async fn setup_with(user_type_name: Option<&str>) -> Harness {
    let server = MockServer::start().await;
    let config = Arc::new(
        ConfigService::new(Configuration {
            app_id: "app-42".into(),
            server_url: server.uri(),
            user_type_name: user_type_name.map(str::to_owned),
            ..Configuration::default()
        })
        .unwrap(),
    );
    let tokens = Arc::new(TokenHolder::new());
    let credentials: Arc<dyn CredentialProvider> = tokens.clone();
    let settings = GatewaySettings::new(&server.uri(), "app-42", "device-7").unwrap();
    let api = Arc::new(
        ApiClient::from_reqwest(&settings, reqwest::Client::new())
            .unwrap()
            .with_credentials(credentials),
    );
    let storage = ClientStorage::in_memory();
    let scheduler = Arc::new(RecordingScheduler::default());
    let auth = AuthService::new(
        api,
        config,
        storage.clone(),
        tokens,
        scheduler.clone(),
        AuthOptions::default(),
    );
    Harness {
        server,
        auth,
        storage,
        scheduler,
    }
}

async fn setup() -> Harness {
    setup_with(Some("BDS.User")).await
}

fn token(access: &str, refresh: &str, expires_in: u64) -> Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "Bearer",
        "expires_in": expires_in
    })
}

async fn mount_sign_in(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/api/bds/v1/users/signin"))
        .and(body_partial_json(json!({"userName": "ada", "typeName": "BDS.User"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": body })))
        .mount(server)
        .await;
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next_event(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no session event")
        .unwrap()
}

// ── Sign-in ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sign_in_persists_and_arms_refresh_at_half_lifetime() {
    let h = setup().await;
    mount_sign_in(&h.server, token("a1", "r1", 60)).await;
    let mut events = h.auth.events();

    h.auth.sign_in(LoginRequest::new("ada", "secret"), true).await.unwrap();

    assert!(h.auth.is_authenticated());
    assert!(h.auth.remember_me());
    assert_eq!(h.auth.access_token().as_deref(), Some("a1"));
    assert_eq!(h.auth.tokens().authorization().as_deref(), Some("Bearer a1"));
    assert_eq!(h.storage.durable().get(REFRESH_TOKEN).unwrap().as_deref(), Some("r1"));
    assert_eq!(h.storage.session().get(REFRESH_TOKEN).unwrap(), None);
    assert_eq!(next_event(&mut events).await, SessionEvent::SignedIn);

    let scheduler = Arc::clone(&h.scheduler);
    eventually(|| scheduler.delays() == [Duration::from_secs(30)]).await;
}

#[tokio::test]
async fn test_sign_in_without_remember_me_uses_session_storage() {
    let h = setup().await;
    mount_sign_in(&h.server, token("a1", "r1", 60)).await;

    h.auth.sign_in(LoginRequest::new("ada", "secret"), false).await.unwrap();

    assert_eq!(h.storage.session().get(REFRESH_TOKEN).unwrap().as_deref(), Some("r1"));
    assert_eq!(h.storage.durable().get(REFRESH_TOKEN).unwrap(), None);
}

#[tokio::test]
async fn test_sign_in_requires_a_type_name() {
    let h = setup_with(None).await;

    let err = h
        .auth
        .sign_in(LoginRequest::new("ada", "secret"), false)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ValidationFailed { .. }));
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sign_in_without_token_fails() {
    let h = setup().await;
    Mock::given(method("POST"))
        .and(path("/api/bds/v1/users/signin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&h.server)
        .await;

    let err = h
        .auth
        .sign_in(LoginRequest::new("ada", "secret"), false)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
    assert!(!h.auth.is_authenticated());
}

// ── Refresh ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_rejected_refresh_signs_out_and_forgets_tokens() {
    let h = setup().await;
    mount_sign_in(&h.server, token("a1", "r1", 60)).await;
    Mock::given(method("POST"))
        .and(path("/api/bds/v1/users/token"))
        .and(body_partial_json(json!({"refreshToken": "r1"})))
        .respond_with(ResponseTemplate::new(401))
        .mount(&h.server)
        .await;

    h.auth.sign_in(LoginRequest::new("ada", "secret"), true).await.unwrap();
    let mut events = h.auth.events();
    let scheduler = Arc::clone(&h.scheduler);
    eventually(|| scheduler.delays().len() == 1).await;

    h.scheduler.release();

    assert_eq!(next_event(&mut events).await, SessionEvent::SignedOut);
    assert!(!h.auth.is_authenticated());
    assert!(h.auth.access_token().is_none());
    assert_eq!(h.storage.durable().get(REFRESH_TOKEN).unwrap(), None);
}

#[tokio::test]
async fn test_transient_refresh_failure_retries_with_same_token() {
    let h = setup().await;
    mount_sign_in(&h.server, token("a1", "r1", 60)).await;
    Mock::given(method("POST"))
        .and(path("/api/bds/v1/users/token"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/bds/v1/users/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token("a2", "r2", 10)))
        .mount(&h.server)
        .await;

    h.auth.sign_in(LoginRequest::new("ada", "secret"), true).await.unwrap();
    let scheduler = Arc::clone(&h.scheduler);
    eventually(|| scheduler.delays().len() == 1).await;

    h.scheduler.release();
    eventually(|| scheduler.delays().len() == 2).await;
    assert!(h.auth.is_authenticated());
    assert_eq!(h.auth.access_token().as_deref(), Some("a1"));

    h.scheduler.release();
    eventually(|| scheduler.delays().len() == 3).await;

    assert_eq!(
        h.scheduler.delays(),
        [Duration::from_secs(30), Duration::from_secs(30), Duration::from_secs(5)]
    );
    assert_eq!(h.auth.access_token().as_deref(), Some("a2"));
    assert_eq!(h.storage.durable().get(REFRESH_TOKEN).unwrap().as_deref(), Some("r2"));

    let refreshes: Vec<Value> = h
        .server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/bds/v1/users/token")
        .map(|r| r.body_json().unwrap())
        .collect();
    assert_eq!(refreshes.len(), 2);
    assert!(refreshes.iter().all(|body| body["refreshToken"] == "r1"));
}

#[tokio::test]
async fn test_refresh_now_without_session_does_nothing() {
    let h = setup().await;
    assert_eq!(h.auth.refresh_now().await, RefreshOutcome::NoToken);
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

// ── Restore and sign-out ────────────────────────────────────────────

#[tokio::test]
async fn test_auto_auth_restores_durable_session() {
    let h = setup().await;
    h.storage.durable().set(REFRESH_TOKEN, "stored").unwrap();
    Mock::given(method("POST"))
        .and(path("/api/bds/v1/users/token"))
        .and(body_partial_json(json!({"refreshToken": "stored"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(token("a9", "r9", 60)))
        .mount(&h.server)
        .await;
    let mut events = h.auth.events();

    assert!(h.auth.try_auto_auth().await.unwrap());

    assert!(h.auth.is_authenticated());
    assert!(h.auth.remember_me());
    assert_eq!(h.storage.durable().get(REFRESH_TOKEN).unwrap().as_deref(), Some("r9"));
    assert_eq!(next_event(&mut events).await, SessionEvent::SignedIn);
}

#[tokio::test]
async fn test_auto_auth_without_stored_token_stays_anonymous() {
    let h = setup().await;
    assert!(!h.auth.try_auto_auth().await.unwrap());
    assert!(!h.auth.is_authenticated());
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sign_out_keeps_storage_only_when_asked() {
    let h = setup().await;
    mount_sign_in(&h.server, token("a1", "r1", 60)).await;

    h.auth.sign_in(LoginRequest::new("ada", "secret"), true).await.unwrap();
    h.auth.sign_out(true, false).await;
    assert!(!h.auth.is_authenticated());
    assert_eq!(h.storage.durable().get(REFRESH_TOKEN).unwrap().as_deref(), Some("r1"));

    h.auth.sign_in(LoginRequest::new("ada", "secret"), true).await.unwrap();
    h.auth.sign_out(false, false).await;
    assert_eq!(h.storage.durable().get(REFRESH_TOKEN).unwrap(), None);
}
