//! Authentication module for the First client
//!
//! Handles sign-in against the First backend:
//! - Direct email/password sign-in
//! - Google sign-in via an OAuth redirect (loopback server or deep link)
//! - Session persistence (file + OS keyring)

pub mod http_client;
pub mod manager;
pub mod oauth;
pub mod oauth_server;
pub mod storage;
pub mod types;

pub use http_client::{ApiClient, ParsedBody, RawResponse, RequestOptions};
pub use manager::{LoginManager, LoginPath, LoginView, ENTRY_ROUTE, SIGNUP_ROUTE};
pub use oauth::{
    AgentResponse, AuthorizationAgent, DeepLinkAgent, DeepLinkEvent, DeepLinkHandle,
    DiscoveryDocument, DriverState, OAuthDriver,
};
pub use oauth_server::{LoopbackAgent, LoopbackControl, DEFAULT_OAUTH_PORT};
pub use storage::{MemoryStorage, SecureStorage, SessionStore};
pub use types::*;
