//! First Auth Library
//!
//! Login and session establishment for the First client: email/password
//! sign-in, Google sign-in through an OAuth redirect, and persistence of the
//! resulting session.

pub mod auth;
pub mod settings;
pub mod utils;

// Re-export commonly used items
pub use auth::{AuthError, AuthOutcome, Credentials, LoginError, LoginManager, Session};
pub use settings::{AppConfig, Platform};
