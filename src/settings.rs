//! Startup configuration
//!
//! Every value is resolved once, first present wins:
//! environment variable → app manifest (`config.json`) → built-in default.

use crate::auth::types::AuthError;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

const CONFIG_FILE: &str = "config.json";
const APP_NAME: &str = "First";

/// Client id shipped in the template config. Never valid for real requests.
pub const PLACEHOLDER_CLIENT_ID: &str = "YOUR_ANDROID_CLIENT_ID.apps.googleusercontent.com";
pub const DEFAULT_REDIRECT_SCHEME: &str = "first";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:4000";
pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";

pub const ENV_API_BASE_URL: &str = "FIRST_API_BASE_URL";
pub const ENV_ANDROID_CLIENT_ID: &str = "FIRST_GOOGLE_OAUTH_ANDROID_CLIENT_ID";
pub const ENV_IOS_CLIENT_ID: &str = "FIRST_GOOGLE_OAUTH_IOS_CLIENT_ID";
pub const ENV_WEB_CLIENT_ID: &str = "FIRST_GOOGLE_OAUTH_WEB_CLIENT_ID";
pub const ENV_REDIRECT_SCHEME: &str = "FIRST_GOOGLE_OAUTH_REDIRECT_SCHEME";
pub const ENV_PLATFORM: &str = "FIRST_PLATFORM";

/// Platform the client runs as; selects the OAuth client id and redirect style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
    Desktop,
}

impl Platform {
    /// Platform of the current build target
    pub fn current() -> Self {
        if cfg!(target_os = "ios") {
            Platform::Ios
        } else if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_arch = "wasm32") {
            Platform::Web
        } else {
            Platform::Desktop
        }
    }

    /// Web and desktop receive the OAuth redirect on a loopback HTTP server;
    /// mobile receives it through the app's URI scheme
    pub fn uses_loopback_redirect(self) -> bool {
        matches!(self, Platform::Web | Platform::Desktop)
    }
}

impl FromStr for Platform {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            "web" => Ok(Platform::Web),
            "desktop" => Ok(Platform::Desktop),
            other => Err(AuthError::ConfigError(format!("Unknown platform: {}", other))),
        }
    }
}

/// App manifest layer. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppManifest {
    #[serde(default, rename = "apiBaseUrl")]
    pub api_base_url: Option<String>,
    #[serde(default, rename = "googleOAuthAndroidClientId")]
    pub google_oauth_android_client_id: Option<String>,
    #[serde(default, rename = "googleOAuthIosClientId")]
    pub google_oauth_ios_client_id: Option<String>,
    #[serde(default, rename = "googleOAuthWebClientId")]
    pub google_oauth_web_client_id: Option<String>,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub platform: Option<Platform>,
}

impl AppManifest {
    /// Default manifest location: `<config_dir>/First/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Load a manifest; a missing or unreadable file yields an empty manifest
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            debug!("Manifest {} does not exist, using defaults", path.display());
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(manifest) => {
                    info!("Loaded manifest from {:?}", path);
                    manifest
                }
                Err(e) => {
                    error!("Failed to parse manifest file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read manifest file: {}", e);
                Self::default()
            }
        }
    }
}

/// Resolved startup configuration. Not mutated after startup.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub api_base_url: Url,
    pub platform: Platform,
    pub android_client_id: String,
    pub ios_client_id: String,
    pub web_client_id: String,
    pub redirect_scheme: String,
    pub issuer: Url,
}

impl AppConfig {
    /// Resolve from the process environment and the default manifest
    pub fn load() -> Result<Self, AuthError> {
        let manifest = AppManifest::default_path()
            .map(|path| AppManifest::load_from(&path))
            .unwrap_or_default();
        Self::resolve(|key| std::env::var(key).ok(), &manifest)
    }

    /// Resolve from an arbitrary variable lookup and manifest
    pub fn resolve<F>(env: F, manifest: &AppManifest) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let android_client_id = resolve_first([
            env(ENV_ANDROID_CLIENT_ID),
            manifest.google_oauth_android_client_id.clone(),
        ])
        .unwrap_or_else(|| PLACEHOLDER_CLIENT_ID.to_string());

        let ios_client_id = resolve_first([
            env(ENV_IOS_CLIENT_ID),
            manifest.google_oauth_ios_client_id.clone(),
            Some(android_client_id.clone()),
        ])
        .unwrap_or_else(|| android_client_id.clone());

        let web_client_id = resolve_first([
            env(ENV_WEB_CLIENT_ID),
            manifest.google_oauth_web_client_id.clone(),
            Some(android_client_id.clone()),
        ])
        .unwrap_or_else(|| android_client_id.clone());

        let redirect_scheme = resolve_first([env(ENV_REDIRECT_SCHEME), manifest.scheme.clone()])
            .unwrap_or_else(|| DEFAULT_REDIRECT_SCHEME.to_string());

        let platform = match env(ENV_PLATFORM).filter(|v| !v.trim().is_empty()) {
            Some(value) => value.parse()?,
            None => manifest.platform.unwrap_or_else(Platform::current),
        };

        let api_base_url = resolve_first([env(ENV_API_BASE_URL), manifest.api_base_url.clone()])
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let api_base_url = Url::parse(&api_base_url).map_err(|e| {
            AuthError::ConfigError(format!("Invalid API base URL {:?}: {}", api_base_url, e))
        })?;

        let issuer = Url::parse(GOOGLE_ISSUER)
            .map_err(|e| AuthError::ConfigError(format!("Invalid issuer URL: {}", e)))?;

        Ok(Self {
            api_base_url,
            platform,
            android_client_id,
            ios_client_id,
            web_client_id,
            redirect_scheme,
            issuer,
        })
    }

    /// OAuth client id for the configured platform
    pub fn client_id(&self) -> &str {
        client_id_for(
            self.platform,
            &self.android_client_id,
            &self.ios_client_id,
            &self.web_client_id,
        )
    }

    /// Whether the platform client id can be used for real requests
    pub fn has_usable_client_id(&self) -> bool {
        !is_placeholder_client_id(self.client_id())
    }
}

/// First present, non-blank candidate
pub fn resolve_first<I>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
}

/// Pick the client id for a platform; desktop shares the android id
pub fn client_id_for<'a>(
    platform: Platform,
    android: &'a str,
    ios: &'a str,
    web: &'a str,
) -> &'a str {
    match platform {
        Platform::Ios => ios,
        Platform::Web => web,
        Platform::Android | Platform::Desktop => android,
    }
}

/// Blank or template client ids cannot be sent to the identity provider
pub fn is_placeholder_client_id(client_id: &str) -> bool {
    let trimmed = client_id.trim();
    trimmed.is_empty() || trimmed == PLACEHOLDER_CLIENT_ID
}
