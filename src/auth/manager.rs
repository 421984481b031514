//! Login manager - drives the password and Google sign-in paths for one
//! login screen

use super::http_client::{json_kind, ApiClient, RawResponse, RequestOptions};
use super::oauth::{AuthorizationAgent, OAuthDriver};
use super::storage::SessionStore;
use super::types::{
    AuthError, AuthOutcome, ConfigurationError, Credentials, LoginError, OAuthResult, Session,
};
use crate::settings::AppConfig;
use crate::utils::preview;
use log::{debug, error, info, warn};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// App entry route, replaces the login route after a successful sign-in
pub const ENTRY_ROUTE: &str = "/";
pub const SIGNUP_ROUTE: &str = "/signup";

const PASSWORD_LOGIN_PATH: &str = "/auth/login";
const GOOGLE_TOKEN_PATH: &str = "/auth/google/token";
const TOKEN_PREVIEW_CHARS: usize = 40;

/// Which submit operation an outcome belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPath {
    Password,
    Google,
}

impl LoginPath {
    /// Shown when the server rejects a login without a usable `error` field
    pub fn failure_fallback(self) -> &'static str {
        match self {
            LoginPath::Password => "Login failed",
            LoginPath::Google => "Google login failed",
        }
    }

    /// Shown when the request never got a response
    pub fn transport_message(self) -> &'static str {
        match self {
            LoginPath::Password => "Unable to reach the server",
            LoginPath::Google => "An error occurred during Google login",
        }
    }

    pub fn success_message(self) -> &'static str {
        match self {
            LoginPath::Password => "Signed in successfully",
            LoginPath::Google => "Signed in with Google",
        }
    }
}

impl fmt::Display for LoginPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginPath::Password => write!(f, "password"),
            LoginPath::Google => write!(f, "google"),
        }
    }
}

/// The screen the manager reports to
pub trait LoginView: Send + Sync {
    /// Show a user-visible message
    fn alert(&self, message: &str);

    /// Navigate to `route`, removing the current route from history
    fn replace_route(&self, route: &str);

    fn push_route(&self, route: &str);

    fn go_back(&self);
}

/// Holds a submitting flag for the lifetime of one attempt
struct SubmitGuard<'a>(&'a AtomicBool);

impl<'a> SubmitGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Login manager for one screen instance
pub struct LoginManager {
    api: ApiClient,
    storage: Arc<dyn SessionStore>,
    driver: OAuthDriver,
    view: Arc<dyn LoginView>,
    is_submitting: AtomicBool,
    is_google_submitting: AtomicBool,
    torn_down: AtomicBool,
    google_id_token: Mutex<Option<String>>,
}

impl LoginManager {
    /// Create a manager for the configured backend and platform client id
    pub fn new(
        config: &AppConfig,
        storage: Arc<dyn SessionStore>,
        agent: Arc<dyn AuthorizationAgent>,
        view: Arc<dyn LoginView>,
    ) -> Result<Self, AuthError> {
        let api = ApiClient::new(config.api_base_url.clone())?;
        let driver = OAuthDriver::new(config.client_id(), config.issuer.clone(), agent);
        info!(
            "LoginManager initialized (platform: {:?}, backend: {})",
            config.platform, config.api_base_url
        );
        Ok(Self::from_parts(api, storage, driver, view))
    }

    pub fn from_parts(
        api: ApiClient,
        storage: Arc<dyn SessionStore>,
        driver: OAuthDriver,
        view: Arc<dyn LoginView>,
    ) -> Self {
        Self {
            api,
            storage,
            driver,
            view,
            is_submitting: AtomicBool::new(false),
            is_google_submitting: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            google_id_token: Mutex::new(None),
        }
    }

    /// Screen appeared: resolve provider metadata so Google sign-in can start.
    ///
    /// Failure only disables the Google path; password sign-in is unaffected.
    pub async fn mount(&self) -> Result<(), AuthError> {
        self.torn_down.store(false, Ordering::SeqCst);
        match self.driver.configure().await {
            Ok(()) => {
                debug!("Google sign-in ready");
                Ok(())
            }
            Err(e) => {
                warn!("Google sign-in unavailable: {}", e);
                Err(e)
            }
        }
    }

    /// Screen went away. Results still in flight are dropped on arrival.
    pub fn unmount(&self) {
        info!("Login screen torn down");
        self.torn_down.store(true, Ordering::SeqCst);
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn is_submitting(&self) -> bool {
        self.is_submitting.load(Ordering::SeqCst)
    }

    pub fn is_google_submitting(&self) -> bool {
        self.is_google_submitting.load(Ordering::SeqCst)
    }

    pub fn driver(&self) -> &OAuthDriver {
        &self.driver
    }

    /// `"Logged in! ID Token: <first 40 chars>..."` once Google returned a token
    pub fn google_token_preview(&self) -> Option<String> {
        self.lock_id_token().as_deref().map(|token| {
            format!(
                "Logged in! ID Token: {}...",
                preview(token, TOKEN_PREVIEW_CHARS)
            )
        })
    }

    fn lock_id_token(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.google_id_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn go_back(&self) {
        self.view.go_back();
    }

    pub fn open_signup(&self) {
        self.view.push_route(SIGNUP_ROUTE);
    }

    /// Sign in with email and password
    pub async fn submit_password(&self, credentials: Credentials) -> AuthOutcome {
        if self.is_submitting() {
            debug!("Password sign-in already in progress, ignoring submit");
            return AuthOutcome::Skipped;
        }
        if !credentials.is_complete() {
            return self.finish(LoginPath::Password, Err(LoginError::Validation));
        }
        let Some(_guard) = SubmitGuard::acquire(&self.is_submitting) else {
            return AuthOutcome::Skipped;
        };

        info!("Signing in user: {}", credentials.email);
        let body = json!({
            "email": credentials.email,
            "password": credentials.password,
        });

        let result = match self
            .api
            .request(PASSWORD_LOGIN_PATH, RequestOptions::post(body))
            .await
        {
            Ok(response) => self.establish(&response, LoginPath::Password).await,
            Err(e) => {
                error!("Sign in request failed: {}", e);
                Err(LoginError::TransportFailure(e.to_string()))
            }
        };

        self.finish(LoginPath::Password, result)
    }

    /// Sign in with Google, then exchange the identity token with the backend
    pub async fn submit_google(&self) -> AuthOutcome {
        if self.is_google_submitting() {
            debug!("Google sign-in already in progress, ignoring submit");
            return AuthOutcome::Skipped;
        }
        if !self.driver.has_usable_client() {
            return self.finish(
                LoginPath::Google,
                Err(ConfigurationError::MissingClientId.into()),
            );
        }
        if !self.driver.is_ready() {
            return self.finish(LoginPath::Google, Err(ConfigurationError::NotReady.into()));
        }
        let Some(_guard) = SubmitGuard::acquire(&self.is_google_submitting) else {
            return AuthOutcome::Skipped;
        };

        *self.lock_id_token() = None;

        let result = match self.driver.prompt().await {
            Ok(OAuthResult::Success { id_token }) => self.exchange_id_token(id_token).await,
            Ok(OAuthResult::Error { description }) => Err(LoginError::Provider(description)),
            Ok(OAuthResult::Cancelled | OAuthResult::Dismissed) => Err(LoginError::Cancelled),
            Err(e) => {
                error!("Google sign-in exchange failed: {}", e);
                Err(LoginError::TransportFailure(e.to_string()))
            }
        };

        self.finish(LoginPath::Google, result)
    }

    async fn exchange_id_token(&self, id_token: String) -> Result<Session, LoginError> {
        if self.is_torn_down() {
            return Err(LoginError::Cancelled);
        }
        *self.lock_id_token() = Some(id_token.clone());

        let body = json!({ "id_token": id_token });
        match self
            .api
            .request(GOOGLE_TOKEN_PATH, RequestOptions::post(body))
            .await
        {
            Ok(response) => self.establish(&response, LoginPath::Google).await,
            Err(e) => {
                error!("Google token exchange request failed: {}", e);
                Err(LoginError::TransportFailure(e.to_string()))
            }
        }
    }

    /// Validate a backend login response and persist the session it carries
    async fn establish(
        &self,
        response: &RawResponse,
        path: LoginPath,
    ) -> Result<Session, LoginError> {
        let session = interpret_response(response, path)?;

        if self.is_torn_down() {
            return Err(LoginError::Cancelled);
        }

        self.storage
            .save(&session.token, &session.user)
            .await
            .map_err(|e| {
                error!("Failed to store session: {}", e);
                LoginError::StorageFailure(e.to_string())
            })?;

        // Unmounted while the write was in flight: undo it
        if self.is_torn_down() {
            warn!("Login screen torn down during session write, removing the session");
            if let Err(e) = self.storage.clear().await {
                error!("Failed to remove session written after unmount: {}", e);
            }
            return Err(LoginError::Cancelled);
        }

        info!("Session stored (token: {}...)", preview(&session.token, 8));
        Ok(session)
    }

    /// Report an attempt's result to the screen
    fn finish(&self, path: LoginPath, result: Result<Session, LoginError>) -> AuthOutcome {
        if self.is_torn_down() {
            debug!("Dropping {} sign-in result after unmount", path);
            return AuthOutcome::Skipped;
        }

        match result {
            Ok(session) => {
                info!("{} sign-in successful", path);
                self.view.alert(path.success_message());
                self.view.replace_route(ENTRY_ROUTE);
                AuthOutcome::Success(session)
            }
            Err(e) => {
                match e.user_message(path) {
                    Some(message) => {
                        warn!("{} sign-in failed: {}", path, e);
                        self.view.alert(&message);
                    }
                    None => info!("{} sign-in cancelled", path),
                }
                AuthOutcome::Failure(e)
            }
        }
    }
}

/// Turn a backend login response into a session.
///
/// Non-2xx uses the body's `error` string when it is one. A 2xx response
/// needs a non-empty string `token`; `user` defaults to an empty record.
pub(crate) fn interpret_response(
    response: &RawResponse,
    path: LoginPath,
) -> Result<Session, LoginError> {
    if !response.ok {
        let message = response
            .body
            .get_str("error")
            .map(str::to_string)
            .unwrap_or_else(|| path.failure_fallback().to_string());
        return Err(LoginError::ServerRejected {
            status: response.status,
            message,
        });
    }

    let token = match response.body.get("token") {
        Some(Value::String(token)) if !token.is_empty() => token.clone(),
        other => {
            let detail = match other {
                _ if response.body.is_absent() => "body is not a JSON object",
                None => "token field missing",
                Some(Value::String(_)) => "token is empty",
                Some(_) => "token is not a string",
            };
            warn!(
                "Malformed {} login response (HTTP {}): {}",
                path, response.status, detail
            );
            return Err(LoginError::MalformedResponse);
        }
    };

    let user = match response.body.get("user") {
        Some(Value::Object(user)) => user.clone(),
        Some(other) => {
            warn!(
                "{} login response has a non-object user ({}), using an empty record",
                path,
                json_kind(other)
            );
            Map::new()
        }
        None => Map::new(),
    };

    Ok(Session::new(token, user))
}
