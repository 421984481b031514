//! Localhost HTTP server for OAuth redirects
//!
//! Web and desktop builds receive the provider redirect on
//! `http://127.0.0.1:<port>/oauth2redirect`. Implicit-flow parameters arrive
//! in the URL fragment, which browsers never send to servers, so the redirect
//! page relays `location.hash` back to `/oauth2redirect/complete` as a query.

use super::oauth::{
    response_from_params, AgentResponse, AuthorizationAgent, UrlOpener, REDIRECT_PATH,
};
use super::types::AuthError;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiny_http::{Header, Response, Server, StatusCode};
use url::Url;

/// Default port for the OAuth redirect server
pub const DEFAULT_OAUTH_PORT: u16 = 17436;

const COMPLETE_PATH: &str = "complete";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const SIGNAL_NONE: u8 = 0;
const SIGNAL_CANCEL: u8 = 1;
const SIGNAL_DISMISS: u8 = 2;

/// Routes the redirect server understands
#[derive(Debug, Clone, PartialEq, Eq)]
enum CallbackRoute {
    /// Provider redirect; parameters are still in the browser's fragment
    Redirect,
    /// Relayed parameters
    Complete(HashMap<String, String>),
}

/// Cancels or dismisses the exchange a [`LoopbackAgent`] is waiting on
#[derive(Debug, Clone)]
pub struct LoopbackControl {
    signal: Arc<AtomicU8>,
}

impl LoopbackControl {
    pub fn cancel(&self) {
        self.signal.store(SIGNAL_CANCEL, Ordering::SeqCst);
    }

    pub fn dismiss(&self) {
        self.signal.store(SIGNAL_DISMISS, Ordering::SeqCst);
    }
}

/// Agent that opens the system browser and waits on a loopback server
pub struct LoopbackAgent {
    server: Arc<Server>,
    port: u16,
    redirect_uri: Url,
    signal: Arc<AtomicU8>,
    busy: AtomicBool,
    opener: UrlOpener,
}

impl LoopbackAgent {
    /// Bind the redirect server on localhost.
    ///
    /// Tries the default port first, then falls back to a random available port.
    pub fn bind() -> Result<Self, AuthError> {
        let (server, port) = match Server::http(("127.0.0.1", DEFAULT_OAUTH_PORT)) {
            Ok(s) => (s, DEFAULT_OAUTH_PORT),
            Err(e) => {
                warn!(
                    "Default port {} unavailable: {}, trying random port",
                    DEFAULT_OAUTH_PORT, e
                );
                Self::bind_random()?
            }
        };
        info!("OAuth redirect server listening on port {}", port);
        Self::from_server(server, port)
    }

    /// Bind on a random available port
    pub fn bind_any() -> Result<Self, AuthError> {
        let (server, port) = Self::bind_random()?;
        Self::from_server(server, port)
    }

    fn bind_random() -> Result<(Server, u16), AuthError> {
        let server = Server::http("127.0.0.1:0").map_err(|e| {
            error!("Failed to start OAuth server: {}", e);
            AuthError::RedirectError(format!("Failed to start OAuth server: {}", e))
        })?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or_else(|| AuthError::RedirectError("Failed to get assigned port".to_string()))?;
        Ok((server, port))
    }

    fn from_server(server: Server, port: u16) -> Result<Self, AuthError> {
        let redirect_uri = Url::parse(&format!("http://127.0.0.1:{}/{}", port, REDIRECT_PATH))
            .map_err(|e| AuthError::RedirectError(format!("Invalid redirect URI: {}", e)))?;
        Ok(Self {
            server: Arc::new(server),
            port,
            redirect_uri,
            signal: Arc::new(AtomicU8::new(SIGNAL_NONE)),
            busy: AtomicBool::new(false),
            opener: Arc::new(crate::utils::open_url),
        })
    }

    /// Replace the browser launcher
    pub fn with_opener(mut self, opener: UrlOpener) -> Self {
        self.opener = opener;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn control(&self) -> LoopbackControl {
        LoopbackControl {
            signal: Arc::clone(&self.signal),
        }
    }

    /// Serve requests until a callback or a cancel/dismiss signal arrives
    fn run_exchange(server: &Server, signal: &AtomicU8) -> AgentResponse {
        loop {
            match signal.load(Ordering::SeqCst) {
                SIGNAL_CANCEL => return AgentResponse::Cancel,
                SIGNAL_DISMISS => return AgentResponse::Dismiss,
                _ => {}
            }

            let request = match server.recv_timeout(POLL_INTERVAL) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    debug!("OAuth server recv error: {}", e);
                    continue;
                }
            };

            match Self::parse_callback(request.url()) {
                Some(CallbackRoute::Redirect) => {
                    debug!("Serving fragment relay page");
                    if let Err(e) = request.respond(html_response(200, relay_html())) {
                        warn!("Failed to send relay page: {}", e);
                    }
                }
                Some(CallbackRoute::Complete(params)) => {
                    info!("OAuth callback received");
                    let response = response_from_params(params);
                    let page = match &response {
                        AgentResponse::Success { .. } => {
                            result_html(
                                "Signed in",
                                "You can close this window and return to First.",
                            )
                        }
                        _ => result_html("Sign-in failed", "Return to First and try again."),
                    };
                    if let Err(e) = request.respond(html_response(200, page)) {
                        warn!("Failed to send result page: {}", e);
                    }
                    return response;
                }
                None => {
                    debug!("Ignoring request for {}", request.url());
                    let _ = request.respond(html_response(404, result_html("Not found", "")));
                }
            }
        }
    }

    /// Parse a request target (`/path?query`)
    fn parse_callback(target: &str) -> Option<CallbackRoute> {
        let url = Url::parse(&format!("http://localhost{}", target)).ok()?;
        let path = url.path().trim_end_matches('/');

        if path == format!("/{}", REDIRECT_PATH) {
            return Some(CallbackRoute::Redirect);
        }
        if path == format!("/{}/{}", REDIRECT_PATH, COMPLETE_PATH) {
            return Some(CallbackRoute::Complete(
                url.query_pairs().into_owned().collect(),
            ));
        }
        None
    }
}

impl Drop for LoopbackAgent {
    fn drop(&mut self) {
        // Lets a blocked exchange thread exit
        self.signal.store(SIGNAL_DISMISS, Ordering::SeqCst);
    }
}

/// Clears the busy flag when an exchange ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthorizationAgent for LoopbackAgent {
    fn redirect_uri(&self) -> Url {
        self.redirect_uri.clone()
    }

    async fn authorize(&self, authorization_url: &Url) -> Result<AgentResponse, AuthError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(AgentResponse::Locked);
        }
        let _busy = BusyGuard(&self.busy);

        self.signal.store(SIGNAL_NONE, Ordering::SeqCst);
        (self.opener)(authorization_url.as_str())
            .map_err(|e| AuthError::RedirectError(format!("Failed to open browser: {}", e)))?;

        let server = Arc::clone(&self.server);
        let signal = Arc::clone(&self.signal);
        tokio::task::spawn_blocking(move || Self::run_exchange(&server, &signal))
            .await
            .map_err(|e| AuthError::RedirectError(format!("OAuth server task failed: {}", e)))
    }
}

fn html_response(status: u16, body: String) -> Response<Cursor<Vec<u8>>> {
    let response = Response::from_string(body).with_status_code(StatusCode(status));
    match Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

fn relay_html() -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>First - Signing in</title></head>
<body>
<p>Completing sign-in...</p>
<script>
  var params = window.location.hash.substring(1) || window.location.search.substring(1);
  window.location.replace('/{}/{}?' + params);
</script>
</body>
</html>"#,
        REDIRECT_PATH, COMPLETE_PATH
    )
}

fn result_html(title: &str, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>First - {title}</title>
<style>
  body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
         background: linear-gradient(135deg, #B5E5A8 0%, #9FD4C7 100%);
         min-height: 100vh; display: flex; align-items: center; justify-content: center;
         color: #2D8650; }}
  .container {{ text-align: center; padding: 3rem; max-width: 480px; }}
</style>
</head>
<body><div class="container"><h1>{title}</h1><p>{message}</p></div></body>
</html>"#
    )
}
