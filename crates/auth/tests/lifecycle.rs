use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use weft_auth::{AuthConfig, AuthError, AuthEvent, AuthManager, AuthStorage, StorageBackend};
use weft_core::{HttpMethod, RequestBody, TokenProvider};
use weft_simulation::{RecordingRuntime, ScriptedTransport};
use weft_store::KeyValueStore;
use weft_store_file::FileStore;
use weft_store_memory::MemoryStore;

const NOW: i64 = 1_700_000_000_000;
const MINUTE: i64 = 60_000;

fn mint(exp_ms: i64) -> String {
    encode(
        &Header::default(),
        &json!({"sub": "ada", "exp": exp_ms / 1000}),
        &EncodingKey::from_secret(b"issuer-secret"),
    )
    .unwrap()
}

/// Manual clock starting at `NOW`.
fn clock() -> (Arc<AtomicI64>, weft_auth::Clock) {
    let now = Arc::new(AtomicI64::new(NOW));
    let reader = Arc::clone(&now);
    (now, Arc::new(move || reader.load(Ordering::SeqCst)))
}

/// Let spawned tasks drain their channels.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn config() -> AuthConfig {
    AuthConfig {
        token_endpoint: Some("https://auth.test/token".into()),
        profile_endpoint: Some("https://auth.test/me".into()),
        ..AuthConfig::default()
    }
}

fn manager(transport: Arc<ScriptedTransport>) -> (Arc<AtomicI64>, AuthManager) {
    let (now, clock) = clock();
    let manager = AuthManager::new(config(), AuthStorage::memory("auth"))
        .with_transport(transport)
        .with_clock(clock);
    (now, manager)
}

#[tokio::test]
async fn expiry_comes_from_the_token_claim() {
    let (now, auth) = manager(Arc::new(ScriptedTransport::new()));
    let exp = NOW + 30 * MINUTE;
    let record = auth.login(&mint(exp), None, Some(Duration::from_secs(10))).await.unwrap();
    assert_eq!(record.expires_at, Some(exp));
    assert!(auth.is_logged_in());

    // Just inside the five minute margin.
    now.store(exp - 5 * MINUTE - 1, Ordering::SeqCst);
    assert!(auth.is_logged_in());
    now.store(exp - 5 * MINUTE, Ordering::SeqCst);
    assert!(!auth.is_logged_in());
}

#[tokio::test]
async fn opaque_tokens_use_the_given_or_default_lifetime() {
    let (_, auth) = manager(Arc::new(ScriptedTransport::new()));
    let record = auth.login("opaque", None, Some(Duration::from_secs(600))).await.unwrap();
    assert_eq!(record.expires_at, Some(NOW + 10 * MINUTE));

    let record = auth.login("opaque", None, None).await.unwrap();
    assert_eq!(record.expires_at, Some(NOW + 60 * MINUTE));
}

#[tokio::test]
async fn refresh_exchanges_the_refresh_token() {
    let fresh = mint(NOW + 60 * MINUTE);
    let transport = Arc::new(ScriptedTransport::new().respond_json(
        Some(HttpMethod::Post),
        "/token",
        200,
        json!({"accessToken": fresh, "refreshToken": "r2"}),
    ));
    let (_, auth) = manager(transport.clone());
    let mut events = auth.subscribe();
    auth.login(&mint(NOW + 2 * MINUTE), Some("r1"), None).await.unwrap();
    assert!(auth.needs_refresh());

    assert_eq!(auth.refresh().await.unwrap(), fresh);
    let session = auth.session().unwrap();
    assert_eq!(session.refresh_token.as_deref(), Some("r2"));
    assert_eq!(session.expires_at, Some(NOW + 60 * MINUTE));

    let sent = transport.last_request().unwrap();
    assert_eq!(sent.body, RequestBody::Json(json!({"refreshToken": "r1"})));
    assert!(matches!(events.recv().await.unwrap(), AuthEvent::LoggedIn { .. }));
    assert!(matches!(events.recv().await.unwrap(), AuthEvent::Refreshed { .. }));
}

#[tokio::test]
async fn concurrent_refreshes_share_one_exchange() {
    tokio::time::pause();
    let fresh = mint(NOW + 60 * MINUTE);
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_delay(Duration::from_millis(200))
            .respond_json(None, "/token", 200, json!({"token": fresh})),
    );
    let (_, auth) = manager(transport.clone());
    auth.login(&mint(NOW + MINUTE), Some("r1"), None).await.unwrap();

    let (a, b) = tokio::join!(auth.refresh(), auth.refresh());
    assert_eq!(a.unwrap(), fresh);
    assert_eq!(b.unwrap(), fresh);
    transport.assert_called(1);
}

#[tokio::test]
async fn failed_refresh_logs_out_and_redirects() {
    let transport = Arc::new(ScriptedTransport::new().respond_json(None, "/token", 400, json!({})));
    let runtime = Arc::new(RecordingRuntime::new());
    let (_, clock) = clock();
    let auth = AuthManager::new(
        AuthConfig {
            requires_auth: true,
            ..config()
        },
        AuthStorage::memory("auth"),
    )
    .with_transport(transport)
    .with_runtime(runtime.clone())
    .with_clock(clock);

    auth.login("opaque", Some("r1"), None).await.unwrap();
    assert!(matches!(auth.refresh().await, Err(AuthError::Refresh(_))));
    assert!(auth.session().is_none());
    assert!(auth.storage().load().await.unwrap().is_none());
    assert_eq!(runtime.navigations(), ["/login"]);
}

#[tokio::test]
async fn token_provider_refresh_leaves_redirect_to_the_caller() {
    let runtime = Arc::new(RecordingRuntime::new());
    let (_, clock) = clock();
    let auth = AuthManager::new(
        AuthConfig {
            requires_auth: true,
            ..config()
        },
        AuthStorage::memory("auth"),
    )
    .with_transport(Arc::new(ScriptedTransport::new()))
    .with_runtime(runtime.clone())
    .with_clock(clock);

    auth.login("opaque", Some("r1"), None).await.unwrap();
    assert!(auth.can_refresh());
    assert!(auth.refresh_token().await.is_err());
    assert!(auth.access_token().is_none());
    assert!(runtime.navigations().is_empty());
}

#[tokio::test]
async fn refresh_requires_a_refresh_token() {
    let (_, auth) = manager(Arc::new(ScriptedTransport::new()));
    auth.login("opaque", None, None).await.unwrap();
    assert!(!auth.can_refresh());
    assert!(matches!(auth.refresh().await, Err(AuthError::NoRefreshToken)));
}

#[tokio::test]
async fn logout_redirects_only_when_required() {
    let runtime = Arc::new(RecordingRuntime::new());
    let (_, clock) = clock();
    let auth = AuthManager::new(config(), AuthStorage::memory("auth"))
        .with_runtime(runtime.clone())
        .with_clock(clock);

    auth.login("t1", None, None).await.unwrap();
    auth.logout(false).await.unwrap();
    assert!(runtime.navigations().is_empty());

    auth.login("t2", None, None).await.unwrap();
    auth.logout(true).await.unwrap();
    assert_eq!(runtime.navigations(), ["/login"]);
    assert!(!auth.is_logged_in());
}

#[tokio::test]
async fn profile_loads_once_per_token() {
    let transport = Arc::new(ScriptedTransport::new().respond_json(
        Some(HttpMethod::Get),
        "/me",
        200,
        json!({"name": "Ada"}),
    ));
    let (_, auth) = manager(transport.clone());
    auth.login("t1", None, None).await.unwrap();

    assert_eq!(auth.load_profile(false).await.unwrap(), Some(json!({"name": "Ada"})));
    assert_eq!(auth.load_profile(false).await.unwrap(), Some(json!({"name": "Ada"})));
    transport.assert_called(1);
    assert_eq!(
        transport.last_request().unwrap().header("authorization"),
        Some("Bearer t1")
    );

    auth.load_profile(true).await.unwrap();
    transport.assert_called(2);

    auth.login("t2", None, None).await.unwrap();
    assert!(auth.profile().is_none());
    auth.load_profile(false).await.unwrap();
    transport.assert_called(3);
}

#[tokio::test]
async fn unauthorized_profile_ends_the_session() {
    let transport = Arc::new(ScriptedTransport::new().respond_json(None, "/me", 401, json!({})));
    let (_, auth) = manager(transport);
    auth.login("t1", None, None).await.unwrap();
    assert!(matches!(auth.load_profile(false).await, Err(AuthError::Unauthorized)));
    assert!(auth.token().is_none());
}

#[tokio::test]
async fn sessions_follow_shared_storage() {
    let shared: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let first = AuthManager::new(
        AuthConfig::default(),
        AuthStorage::open(StorageBackend::Local, "auth", Some(shared.clone())).await,
    );
    let second = Arc::new(AuthManager::new(
        AuthConfig::default(),
        AuthStorage::open(StorageBackend::Local, "auth", Some(shared)).await,
    ));
    let cancel = CancellationToken::new();
    let mut events = second.subscribe();
    let sync = Arc::clone(&second).spawn_sync(cancel.clone());

    first.login("shared-token", None, None).await.unwrap();
    assert!(matches!(events.recv().await.unwrap(), AuthEvent::LoggedIn { .. }));
    assert_eq!(second.token().as_deref(), Some("shared-token"));

    first.logout(false).await.unwrap();
    assert_eq!(events.recv().await.unwrap(), AuthEvent::LoggedOut);
    assert!(second.token().is_none());

    cancel.cancel();
    sync.await.unwrap();
}

#[tokio::test]
async fn own_writes_do_not_echo() {
    let auth = Arc::new(AuthManager::new(AuthConfig::default(), AuthStorage::memory("auth")));
    let cancel = CancellationToken::new();
    let mut events = auth.subscribe();
    let sync = Arc::clone(&auth).spawn_sync(cancel.clone());

    auth.login("t1", None, None).await.unwrap();
    settle().await;
    auth.logout(false).await.unwrap();
    settle().await;
    cancel.cancel();
    sync.await.unwrap();

    assert!(matches!(events.recv().await.unwrap(), AuthEvent::LoggedIn { .. }));
    assert_eq!(events.recv().await.unwrap(), AuthEvent::LoggedOut);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn background_loop_refreshes_near_expiry() {
    tokio::time::pause();
    let transport = Arc::new(ScriptedTransport::new().respond_json(
        None,
        "/token",
        200,
        json!({"token": "fresh", "expiresIn": 3600}),
    ));
    let (now, auth) = manager(transport.clone());
    let auth = Arc::new(auth);
    auth.login("opaque", Some("r1"), Some(Duration::from_secs(20 * 60))).await.unwrap();

    let mut events = auth.subscribe();
    let cancel = CancellationToken::new();
    let task = Arc::clone(&auth).spawn_refresh_loop(cancel.clone());

    // First tick: plenty of lifetime left.
    tokio::time::sleep(Duration::from_secs(1)).await;
    transport.assert_not_called();

    now.store(NOW + 16 * MINUTE, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(matches!(events.recv().await.unwrap(), AuthEvent::Refreshed { .. }));
    assert_eq!(auth.token().as_deref(), Some("fresh"));

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn persistent_session_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&path));
    let auth = AuthManager::new(
        AuthConfig::default(),
        AuthStorage::open(StorageBackend::Local, "auth", Some(store)).await,
    );
    auth.login("kept", Some("r"), None).await.unwrap();

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&path));
    let restarted = AuthManager::new(
        AuthConfig::default(),
        AuthStorage::open(StorageBackend::Local, "auth", Some(store)).await,
    );
    let restored = restarted.restore().await.unwrap().unwrap();
    assert_eq!(restored.token, "kept");
    assert!(restarted.is_logged_in());
}
