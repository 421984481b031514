//! End-to-end login scenarios against a mock backend

use first_auth::auth::oauth::UrlOpener;
use first_auth::auth::{
    ApiClient, DeepLinkAgent, DiscoveryDocument, LoginView, LoopbackAgent, MemoryStorage,
    OAuthDriver, SecureStorage, SessionStore, ENTRY_ROUTE,
};
use first_auth::{AuthOutcome, Credentials, LoginError, LoginManager, Session};
use serde_json::{json, Map, Value};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CLIENT_ID: &str = "1234-test.apps.googleusercontent.com";

#[derive(Default)]
struct RecordingView {
    alerts: Mutex<Vec<String>>,
    replaced: Mutex<Vec<String>>,
}

impl LoginView for RecordingView {
    fn alert(&self, message: &str) {
        self.alerts.lock().unwrap().push(message.to_string());
    }

    fn replace_route(&self, route: &str) {
        self.replaced.lock().unwrap().push(route.to_string());
    }

    fn push_route(&self, _route: &str) {}

    fn go_back(&self) {}
}

fn discovery() -> DiscoveryDocument {
    DiscoveryDocument {
        issuer: Some("https://accounts.google.com".to_string()),
        authorization_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".parse().unwrap(),
        token_endpoint: None,
    }
}

fn query_param(url: &str, key: &str) -> String {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

fn manager_for(
    server: &MockServer,
    storage: Arc<dyn SessionStore>,
    driver: OAuthDriver,
    view: Arc<RecordingView>,
) -> LoginManager {
    LoginManager::from_parts(
        ApiClient::new(server.uri().parse().unwrap()).unwrap(),
        storage,
        driver,
        view,
    )
}

/// Deep link agent whose "browser" immediately redirects back with `id_token`
fn redirecting_deep_link_agent(id_token: Option<&'static str>) -> DeepLinkAgent {
    let (agent, handle) = DeepLinkAgent::new("first").unwrap();
    let opener: UrlOpener = Arc::new(move |authorization_url: &str| {
        match id_token {
            Some(id_token) => {
                let state = query_param(authorization_url, "state");
                let callback = format!(
                    "first://oauth2redirect#id_token={}&state={}",
                    id_token, state
                );
                handle.deliver(Url::parse(&callback).unwrap());
            }
            None => {
                handle.cancel();
            }
        }
        Ok(())
    });
    agent.with_opener(opener)
}

#[tokio::test]
async fn password_login_persists_session_across_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"email": "a@b.com", "password": "secret"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"token": "t1", "user": {"id": 1}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(SecureStorage::in_dir(dir.path()).with_keyring(false));
    let view = Arc::new(RecordingView::default());
    let (agent, _handle) = DeepLinkAgent::new("first").unwrap();
    let driver = OAuthDriver::new(
        CLIENT_ID,
        "https://accounts.google.com".parse().unwrap(),
        Arc::new(agent),
    );
    let manager = manager_for(&server, storage, driver, view.clone());

    let outcome = manager.submit_password(Credentials::new("a@b.com", "secret")).await;
    assert!(outcome.is_success());
    assert_eq!(*view.replaced.lock().unwrap(), vec![ENTRY_ROUTE.to_string()]);

    // A fresh store over the same directory sees the session
    let reopened = SecureStorage::in_dir(dir.path()).with_keyring(false);
    let session = reopened.load().await.unwrap().unwrap();
    assert_eq!(session.token, "t1");
    assert_eq!(Value::Object(session.user), json!({"id": 1}));
}

#[tokio::test]
async fn rejected_password_shows_server_message_and_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "invalid credentials"})),
        )
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let view = Arc::new(RecordingView::default());
    let (agent, _handle) = DeepLinkAgent::new("first").unwrap();
    let driver = OAuthDriver::new(
        CLIENT_ID,
        "https://accounts.google.com".parse().unwrap(),
        Arc::new(agent),
    );
    let manager = manager_for(&server, storage.clone(), driver, view.clone());

    let outcome = manager.submit_password(Credentials::new("a@b.com", "wrong")).await;

    assert!(matches!(outcome, AuthOutcome::Failure(LoginError::ServerRejected { .. })));
    assert_eq!(*view.alerts.lock().unwrap(), vec!["invalid credentials".to_string()]);
    assert!(view.replaced.lock().unwrap().is_empty());
    assert_eq!(storage.save_count(), 0);
}

#[tokio::test]
async fn google_deep_link_login_exchanges_id_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/google/token"))
        .and(body_json(json!({"id_token": "abc"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t2", "user": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let view = Arc::new(RecordingView::default());
    let driver = OAuthDriver::new(
        CLIENT_ID,
        "https://accounts.google.com".parse().unwrap(),
        Arc::new(redirecting_deep_link_agent(Some("abc"))),
    )
    .with_discovery(discovery());
    let manager = manager_for(&server, storage.clone(), driver, view.clone());

    let outcome = manager.submit_google().await;

    assert_eq!(outcome, AuthOutcome::Success(Session::new("t2", Map::new())));
    assert_eq!(storage.current(), Some(Session::new("t2", Map::new())));
    assert_eq!(*view.alerts.lock().unwrap(), vec!["Signed in with Google".to_string()]);
}

#[tokio::test]
async fn cancelled_google_login_is_silent_every_time() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let view = Arc::new(RecordingView::default());
    let driver = OAuthDriver::new(
        CLIENT_ID,
        "https://accounts.google.com".parse().unwrap(),
        Arc::new(redirecting_deep_link_agent(None)),
    )
    .with_discovery(discovery());
    let manager = manager_for(&server, storage.clone(), driver, view.clone());

    for _ in 0..3 {
        let outcome = manager.submit_google().await;
        assert_eq!(outcome, AuthOutcome::Failure(LoginError::Cancelled));
        assert!(!manager.is_google_submitting());
    }
    assert!(view.alerts.lock().unwrap().is_empty());
    assert_eq!(storage.save_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn google_loopback_login_completes_through_local_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/google/token"))
        .and(body_json(json!({"id_token": "loopback-token"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "t3", "user": {"name": "Ada"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    // The "browser" follows the relay page's redirect straight to the completion route
    let opener: UrlOpener = Arc::new(|authorization_url: &str| {
        let redirect_uri = Url::parse(&query_param(authorization_url, "redirect_uri")).unwrap();
        let state = query_param(authorization_url, "state");
        let target = format!(
            "/oauth2redirect/complete?id_token=loopback-token&state={}",
            url::form_urlencoded::byte_serialize(state.as_bytes()).collect::<String>()
        );
        let port = redirect_uri.port().unwrap();
        std::thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            write!(
                stream,
                "GET {} HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n",
                target
            )
            .unwrap();
            let mut page = String::new();
            let _ = stream.read_to_string(&mut page);
        });
        Ok(())
    });
    let agent = LoopbackAgent::bind_any().unwrap().with_opener(opener);

    let storage = Arc::new(MemoryStorage::new());
    let view = Arc::new(RecordingView::default());
    let driver = OAuthDriver::new(
        CLIENT_ID,
        "https://accounts.google.com".parse().unwrap(),
        Arc::new(agent),
    )
    .with_discovery(discovery());
    let manager = manager_for(&server, storage.clone(), driver, view.clone());

    let outcome = manager.submit_google().await;

    assert!(outcome.is_success(), "outcome: {:?}", outcome);
    let session = storage.current().unwrap();
    assert_eq!(session.token, "t3");
    assert_eq!(Value::Object(session.user), json!({"name": "Ada"}));
    assert_eq!(
        manager.google_token_preview().as_deref(),
        Some("Logged in! ID Token: loopback-token...")
    );
}
