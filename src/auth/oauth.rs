//! Google sign-in redirect driver
//!
//! Discovers the provider's endpoints, builds an implicit-flow
//! (`response_type=id_token`) authorization request, hands it to an
//! [`AuthorizationAgent`] for the interactive part and classifies what comes
//! back into an [`OAuthResult`].
//!
//! ```text
//! Idle -> Configuring -> Ready -> AwaitingRedirect -> Resolved(..)
//!                          ^                              |
//!                          +------------- next attempt ---+
//! ```

use super::types::{AuthError, OAuthRequestConfig, OAuthResult, ResponseType};
use crate::settings::is_placeholder_client_id;
use crate::utils::preview;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use log::{debug, error, info, warn};
use rand::Rng;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use url::Url;

/// Callback path appended to the redirect URI
pub const REDIRECT_PATH: &str = "oauth2redirect";
pub const SCOPES: [&str; 3] = ["openid", "email", "profile"];

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";
const GENERIC_FAILURE: &str = "Google sign-in was cancelled or failed";
const MISSING_ID_TOKEN: &str = "Failed to get a Google ID token";
const STATE_MISMATCH: &str = "Security error: state mismatch. Please try again.";
const UNUSABLE_CLIENT: &str = "Google OAuth client ID is not configured";
const ALREADY_IN_PROGRESS: &str = "Google sign-in is already in progress";
const NOT_CONFIGURED: &str = "Google sign-in is not configured yet";

/// OpenID provider metadata
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiscoveryDocument {
    #[serde(default)]
    pub issuer: Option<String>,
    pub authorization_endpoint: Url,
    #[serde(default)]
    pub token_endpoint: Option<Url>,
}

/// Fetch `<issuer>/.well-known/openid-configuration`
pub async fn fetch_discovery(
    http: &reqwest::Client,
    issuer: &Url,
) -> Result<DiscoveryDocument, AuthError> {
    let url = format!(
        "{}/{}",
        issuer.as_str().trim_end_matches('/'),
        DISCOVERY_PATH
    );
    debug!("Fetching discovery document from {}", url);

    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|e| AuthError::NetworkError(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        error!("Discovery failed: {}", status);
        return Err(AuthError::DiscoveryError(format!(
            "Discovery request returned {}",
            status
        )));
    }

    response
        .json::<DiscoveryDocument>()
        .await
        .map_err(|e| {
            AuthError::DiscoveryError(format!("Failed to parse discovery document: {}", e))
        })
}

/// Redirect URI for a custom app scheme: `<scheme>://oauth2redirect`
pub fn make_redirect_uri(scheme: &str) -> Result<Url, AuthError> {
    let scheme_name = scheme.trim_end_matches(":/").trim_end_matches(':');
    let uri = format!("{}://{}", scheme_name, REDIRECT_PATH);
    Url::parse(&uri)
        .map_err(|e| AuthError::ConfigError(format!("Invalid redirect scheme {:?}: {}", scheme, e)))
}

/// 16 random bytes, base64url without padding
pub fn generate_nonce() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Authorization URL for a request against the discovered endpoint
pub fn authorization_url(endpoint: &Url, request: &OAuthRequestConfig) -> Url {
    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .append_pair("client_id", &request.client_id)
        .append_pair("redirect_uri", request.redirect_uri.as_str())
        .append_pair("response_type", request.response_type.as_str())
        .append_pair("scope", &request.scope_param())
        .append_pair("nonce", &request.nonce)
        .append_pair("state", &request.state);
    url
}

/// Tokens the agent may already have extracted from the redirect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    pub id_token: Option<String>,
}

/// Raw outcome of the interactive step, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentResponse {
    /// The provider redirected back without an `error` parameter
    Success {
        params: HashMap<String, String>,
        authentication: Option<TokenSet>,
    },
    /// The provider redirected back with an `error` parameter
    Error { params: HashMap<String, String> },
    /// The user cancelled the exchange
    Cancel,
    /// The browser was closed or the screen went away
    Dismiss,
    /// Another exchange already owns the agent
    Locked,
}

/// Interactive part of the flow: show the authorization page and wait for
/// the provider to redirect back. Resolves exactly once per call.
#[async_trait]
pub trait AuthorizationAgent: Send + Sync {
    /// Where the provider must send the user back to
    fn redirect_uri(&self) -> Url;

    /// Open `authorization_url` and wait for the redirect
    async fn authorize(&self, authorization_url: &Url) -> Result<AgentResponse, AuthError>;
}

/// Turn an agent response into a terminal result for the attempt
pub fn classify(response: AgentResponse, expected_state: &str) -> OAuthResult {
    match response {
        AgentResponse::Success {
            params,
            authentication,
        } => {
            if params.get("state").map(String::as_str) != Some(expected_state) {
                warn!("OAuth callback state does not match the request");
                return OAuthResult::Error {
                    description: STATE_MISMATCH.to_string(),
                };
            }

            let id_token = params
                .get("id_token")
                .cloned()
                .or_else(|| authentication.and_then(|auth| auth.id_token))
                .filter(|token| !token.is_empty());

            match id_token {
                Some(id_token) => OAuthResult::Success { id_token },
                None => OAuthResult::Error {
                    description: MISSING_ID_TOKEN.to_string(),
                },
            }
        }
        AgentResponse::Cancel => OAuthResult::Cancelled,
        AgentResponse::Dismiss => OAuthResult::Dismissed,
        AgentResponse::Error { params } => OAuthResult::Error {
            description: params
                .get("error_description")
                .filter(|d| !d.is_empty())
                .cloned()
                .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
        },
        AgentResponse::Locked => OAuthResult::Error {
            description: GENERIC_FAILURE.to_string(),
        },
    }
}

/// Where the driver is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Configuring,
    /// Discovery done, an attempt may start
    Ready,
    AwaitingRedirect,
    Resolved(OAuthResult),
}

/// Drives one screen's Google sign-in attempts
pub struct OAuthDriver {
    client_id: String,
    issuer: Url,
    http: reqwest::Client,
    agent: Arc<dyn AuthorizationAgent>,
    state: Mutex<DriverState>,
    discovery: Mutex<Option<DiscoveryDocument>>,
}

impl OAuthDriver {
    pub fn new(
        client_id: impl Into<String>,
        issuer: Url,
        agent: Arc<dyn AuthorizationAgent>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            issuer,
            http: reqwest::Client::new(),
            agent,
            state: Mutex::new(DriverState::Idle),
            discovery: Mutex::new(None),
        }
    }

    /// Skip discovery with already known provider metadata
    pub fn with_discovery(self, discovery: DiscoveryDocument) -> Self {
        if self.has_usable_client() {
            self.set_state(DriverState::Ready);
        }
        *self.lock_discovery() = Some(discovery);
        self
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_discovery(&self) -> std::sync::MutexGuard<'_, Option<DiscoveryDocument>> {
        self.discovery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: DriverState) {
        *self.lock_state() = state;
    }

    pub fn state(&self) -> DriverState {
        self.lock_state().clone()
    }

    /// The client id is neither blank nor the template placeholder
    pub fn has_usable_client(&self) -> bool {
        !is_placeholder_client_id(&self.client_id)
    }

    /// Discovery finished and no attempt is running
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), DriverState::Ready | DriverState::Resolved(_))
    }

    /// Resolve provider metadata. Without a usable client id nothing is
    /// fetched and the driver stays idle.
    pub async fn configure(&self) -> Result<(), AuthError> {
        if !self.has_usable_client() {
            warn!("Google OAuth client ID is missing or a placeholder; skipping discovery");
            return Err(AuthError::ConfigError(UNUSABLE_CLIENT.to_string()));
        }

        {
            let mut state = self.lock_state();
            match &*state {
                DriverState::Idle => {}
                busy @ (DriverState::Configuring | DriverState::AwaitingRedirect) => {
                    debug!("Driver busy ({:?}), not reconfiguring", busy);
                    return Ok(());
                }
                DriverState::Ready | DriverState::Resolved(_) => return Ok(()),
            }
            *state = DriverState::Configuring;
        }

        match fetch_discovery(&self.http, &self.issuer).await {
            Ok(discovery) => {
                info!(
                    "Discovered authorization endpoint {}",
                    discovery.authorization_endpoint
                );
                *self.lock_discovery() = Some(discovery);
                self.set_state(DriverState::Ready);
                Ok(())
            }
            Err(e) => {
                error!("OAuth discovery failed: {}", e);
                self.set_state(DriverState::Idle);
                Err(e)
            }
        }
    }

    /// Fresh request parameters for one attempt
    pub fn build_request(&self) -> OAuthRequestConfig {
        OAuthRequestConfig {
            client_id: self.client_id.clone(),
            redirect_uri: self.agent.redirect_uri(),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
            response_type: ResponseType::IdToken,
            nonce: generate_nonce(),
            state: generate_nonce(),
        }
    }

    /// Run one interactive exchange and classify its outcome.
    ///
    /// Suspends until the user completes, cancels or dismisses the page.
    /// Errors only when the agent itself fails (browser launch, server I/O).
    pub async fn prompt(&self) -> Result<OAuthResult, AuthError> {
        if !self.has_usable_client() {
            return Ok(OAuthResult::Error {
                description: UNUSABLE_CLIENT.to_string(),
            });
        }

        let endpoint = {
            let mut state = self.lock_state();
            match &*state {
                DriverState::Ready | DriverState::Resolved(_) => {}
                DriverState::AwaitingRedirect => {
                    return Ok(OAuthResult::Error {
                        description: ALREADY_IN_PROGRESS.to_string(),
                    });
                }
                DriverState::Idle | DriverState::Configuring => {
                    return Ok(OAuthResult::Error {
                        description: NOT_CONFIGURED.to_string(),
                    });
                }
            }
            let endpoint = match self.lock_discovery().as_ref() {
                Some(discovery) => discovery.authorization_endpoint.clone(),
                None => {
                    return Ok(OAuthResult::Error {
                        description: NOT_CONFIGURED.to_string(),
                    });
                }
            };
            *state = DriverState::AwaitingRedirect;
            endpoint
        };

        let request = self.build_request();
        let url = authorization_url(&endpoint, &request);
        info!(
            "Starting Google sign-in (state: {}...)",
            preview(&request.state, 8)
        );

        let result = match self.agent.authorize(&url).await {
            Ok(response) => classify(response, &request.state),
            Err(e) => {
                // Back to a state a new attempt can start from
                self.set_state(DriverState::Ready);
                return Err(e);
            }
        };

        match &result {
            OAuthResult::Success { id_token } => {
                info!("Received Google ID token ({}...)", preview(id_token, 8))
            }
            OAuthResult::Cancelled => info!("Google sign-in cancelled"),
            OAuthResult::Dismissed => info!("Google sign-in dismissed"),
            OAuthResult::Error { description } => warn!("Google sign-in failed: {}", description),
        }

        self.set_state(DriverState::Resolved(result.clone()));
        Ok(result)
    }
}

/// What the platform delivers to a [`DeepLinkAgent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeepLinkEvent {
    /// The app was opened through its URI scheme
    Callback(Url),
    Cancel,
    Dismiss,
}

/// Sender side of a [`DeepLinkAgent`], owned by whatever receives deep links
#[derive(Debug, Clone)]
pub struct DeepLinkHandle {
    sender: UnboundedSender<DeepLinkEvent>,
}

impl DeepLinkHandle {
    /// Deliver a URL the app was opened with. Returns false once the agent is gone.
    pub fn deliver(&self, url: Url) -> bool {
        self.sender.send(DeepLinkEvent::Callback(url)).is_ok()
    }

    pub fn cancel(&self) -> bool {
        self.sender.send(DeepLinkEvent::Cancel).is_ok()
    }

    pub fn dismiss(&self) -> bool {
        self.sender.send(DeepLinkEvent::Dismiss).is_ok()
    }
}

/// Browser launcher used by the agents
pub type UrlOpener = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Agent for custom-scheme redirects (`first://oauth2redirect#id_token=...`).
///
/// Opens the authorization page, then waits for the platform to hand the
/// callback URL over through a [`DeepLinkHandle`].
pub struct DeepLinkAgent {
    redirect_uri: Url,
    opener: UrlOpener,
    events: tokio::sync::Mutex<UnboundedReceiver<DeepLinkEvent>>,
}

impl DeepLinkAgent {
    pub fn new(scheme: &str) -> Result<(Self, DeepLinkHandle), AuthError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let agent = Self {
            redirect_uri: make_redirect_uri(scheme)?,
            opener: Arc::new(crate::utils::open_url),
            events: tokio::sync::Mutex::new(receiver),
        };
        Ok((agent, DeepLinkHandle { sender }))
    }

    /// Replace the browser launcher
    pub fn with_opener(mut self, opener: UrlOpener) -> Self {
        self.opener = opener;
        self
    }

    /// Whether `url` is a callback for this agent's redirect URI
    fn is_callback(&self, url: &Url) -> bool {
        url.scheme() == self.redirect_uri.scheme()
            && url.host_str() == self.redirect_uri.host_str()
            && url.path().trim_end_matches('/') == self.redirect_uri.path().trim_end_matches('/')
    }
}

/// Query and fragment parameters of a callback URL; fragment wins on conflict
pub fn callback_params(url: &Url) -> HashMap<String, String> {
    let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if let Some(fragment) = url.fragment() {
        params.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
    }
    params
}

/// Split callback parameters into a success or provider error response
pub fn response_from_params(params: HashMap<String, String>) -> AgentResponse {
    if params.contains_key("error") {
        AgentResponse::Error { params }
    } else {
        AgentResponse::Success {
            params,
            authentication: None,
        }
    }
}

#[async_trait]
impl AuthorizationAgent for DeepLinkAgent {
    fn redirect_uri(&self) -> Url {
        self.redirect_uri.clone()
    }

    async fn authorize(&self, authorization_url: &Url) -> Result<AgentResponse, AuthError> {
        let Ok(mut events) = self.events.try_lock() else {
            return Ok(AgentResponse::Locked);
        };

        // Anything queued before this attempt belongs to an earlier one
        while let Ok(stale) = events.try_recv() {
            debug!("Dropping stale deep link event: {:?}", stale);
        }

        (self.opener)(authorization_url.as_str())
            .map_err(|e| AuthError::RedirectError(format!("Failed to open browser: {}", e)))?;

        loop {
            match events.recv().await {
                Some(DeepLinkEvent::Callback(url)) if self.is_callback(&url) => {
                    return Ok(response_from_params(callback_params(&url)));
                }
                Some(DeepLinkEvent::Callback(url)) => {
                    debug!("Ignoring deep link for another route: {}", url.path());
                }
                Some(DeepLinkEvent::Cancel) => return Ok(AgentResponse::Cancel),
                Some(DeepLinkEvent::Dismiss) | None => return Ok(AgentResponse::Dismiss),
            }
        }
    }
}
