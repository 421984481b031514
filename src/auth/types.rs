//! Authentication types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use url::Url;

/// Arbitrary user attributes returned by the backend.
pub type UserRecord = Map<String, Value>;

/// Email/password pair for a single submission. Never persisted.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Both fields are filled in
    pub fn is_complete(&self) -> bool {
        !self.email.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Persisted proof of login
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub token: String,
    #[serde(default)]
    pub user: UserRecord,
}

impl Session {
    pub fn new(token: impl Into<String>, user: UserRecord) -> Self {
        Self {
            token: token.into(),
            user,
        }
    }
}

/// Result of a submit operation on the login screen
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    /// Session persisted and the app navigated to its entry route
    Success(Session),
    /// Attempt ended without a session
    Failure(LoginError),
    /// Ignored: another attempt on the same path was in flight, or the
    /// screen was torn down before the attempt resolved
    Skipped,
}

impl AuthOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Success(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthOutcome::Success(session) => Some(session),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&LoginError> {
        match self {
            AuthOutcome::Failure(error) => Some(error),
            _ => None,
        }
    }
}

/// `response_type` requested from the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    IdToken,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::IdToken => "id_token",
        }
    }
}

/// Authorization request parameters for one redirect attempt
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthRequestConfig {
    pub client_id: String,
    pub redirect_uri: Url,
    pub scopes: BTreeSet<String>,
    pub response_type: ResponseType,
    /// Freshness value echoed inside the identity token
    pub nonce: String,
    /// CSRF value echoed back on the redirect
    pub state: String,
}

impl OAuthRequestConfig {
    /// Space-separated scope string in a stable order
    pub fn scope_param(&self) -> String {
        self.scopes
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Terminal outcome of an OAuth redirect exchange.
///
/// `Cancelled` and `Dismissed` never surface an error to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthResult {
    Success { id_token: String },
    Cancelled,
    Dismissed,
    Error { description: String },
}

/// Missing or unusable OAuth configuration, detected before any network call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Please configure the Google OAuth client ID")]
    MissingClientId,

    #[error("Google sign-in is not ready yet. Please try again in a moment.")]
    NotReady,
}

/// Why a login attempt did not produce a session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error("Please enter both your email and password")]
    Validation,

    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Sign-in was cancelled")]
    Cancelled,

    #[error("Server rejected login ({status}): {message}")]
    ServerRejected { status: u16, message: String },

    #[error("The login response was invalid")]
    MalformedResponse,

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Failed to save session: {0}")]
    StorageFailure(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),
}

impl LoginError {
    /// Message shown to the user, or `None` for silent outcomes.
    ///
    /// Raw transport and storage details stay in the logs.
    pub fn user_message(&self, path: super::manager::LoginPath) -> Option<String> {
        match self {
            LoginError::Cancelled => None,
            LoginError::Validation | LoginError::Configuration(_) => Some(self.to_string()),
            LoginError::ServerRejected { message, .. } => Some(message.clone()),
            LoginError::MalformedResponse => Some(self.to_string()),
            LoginError::Provider(description) => Some(description.clone()),
            LoginError::StorageFailure(_) => {
                Some("Could not save your session. Please try again.".to_string())
            }
            LoginError::TransportFailure(_) => Some(path.transport_message().to_string()),
        }
    }
}

/// Errors from the plumbing underneath the login flow
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Discovery error: {0}")]
    DiscoveryError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Redirect error: {0}")]
    RedirectError(String),
}
