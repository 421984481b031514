//! HTTP client for the First backend

use super::types::AuthError;
use log::{debug, warn};
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = concat!("First-Auth/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Method and optional JSON body for a backend request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub json: Option<Value>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            json: None,
        }
    }

    pub fn post(json: Value) -> Self {
        Self {
            method: Method::POST,
            json: Some(json),
        }
    }
}

/// Best-effort parsed JSON body.
///
/// `None` stands for "absent or unparseable" and behaves like an empty object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBody(Option<Map<String, Value>>);

impl ParsedBody {
    /// Parse a response body, never failing. Non-object JSON counts as absent.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => Self(Some(map)),
            Ok(other) => {
                debug!("Response body is JSON but not an object ({})", json_kind(&other));
                Self(None)
            }
            Err(e) => {
                if !bytes.is_empty() {
                    debug!("Response body is not valid JSON: {}", e);
                }
                Self(None)
            }
        }
    }

    pub fn is_absent(&self) -> bool {
        self.0.is_none()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.as_ref().and_then(|map| map.get(key))
    }

    /// A field's value, only when it is a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

impl From<Value> for ParsedBody {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(Some(map)),
            _ => Self(None),
        }
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Backend response. Non-2xx statuses are data here, not errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub ok: bool,
    pub body: ParsedBody,
}

/// HTTP client for backend API calls
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new ApiClient for the given backend base URL
    pub fn new(base_url: Url) -> Result<Self, AuthError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    /// Full URL for a backend path, keeping any path prefix of the base URL
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Send a JSON request to the backend.
    ///
    /// Only transport failures (DNS, refused connection, timeout) are errors.
    /// The body is read and parsed defensively; a body that cannot be read
    /// or parsed comes back as an absent [`ParsedBody`].
    pub async fn request(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<RawResponse, AuthError> {
        let url = self.endpoint(path);
        debug!("{} {}", options.method, url);

        let mut request = self
            .client
            .request(options.method, &url)
            .header("Accept", "application/json");
        if let Some(json) = &options.json {
            request = request.json(json);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = match response.bytes().await {
            Ok(bytes) => ParsedBody::from_bytes(&bytes),
            Err(e) => {
                warn!("Failed to read response body from {}: {}", url, e);
                ParsedBody::default()
            }
        };

        debug!("{} -> {}", url, status);
        Ok(RawResponse {
            status: status.as_u16(),
            ok: status.is_success(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(server.uri().parse().unwrap()).unwrap()
    }

    #[test]
    fn test_parsed_body_object() {
        let body = ParsedBody::from_bytes(br#"{"error":"nope","user":{"id":1},"n":3}"#);
        assert!(!body.is_absent());
        assert_eq!(body.get_str("error"), Some("nope"));
        assert_eq!(body.get_str("n"), None);
        assert_eq!(body.get("user"), Some(&json!({"id": 1})));
    }

    #[test]
    fn test_parsed_body_garbage_is_absent() {
        assert!(ParsedBody::from_bytes(b"<html>502</html>").is_absent());
        assert!(ParsedBody::from_bytes(b"").is_absent());
        assert!(ParsedBody::from_bytes(b"[1,2]").is_absent());
        assert!(ParsedBody::from_bytes(b"\"token\"").is_absent());
        assert_eq!(ParsedBody::from_bytes(b"null").get("token"), None);
    }

    #[test]
    fn test_endpoint_keeps_base_prefix() {
        let client = ApiClient::new("https://api.example.com/v1/".parse().unwrap()).unwrap();
        assert_eq!(
            client.endpoint("/auth/login"),
            "https://api.example.com/v1/auth/login"
        );
    }

    #[tokio::test]
    async fn test_request_posts_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"email": "a@b.com", "password": "secret"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"token": "t1", "user": {"id": 1}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server)
            .request(
                "/auth/login",
                RequestOptions::post(json!({"email": "a@b.com", "password": "secret"})),
            )
            .await
            .unwrap();

        assert!(response.ok);
        assert_eq!(response.status, 200);
        assert_eq!(response.body.get_str("token"), Some("t1"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": "invalid credentials"})),
            )
            .mount(&server)
            .await;

        let response = client_for(&server)
            .request("/auth/login", RequestOptions::post(json!({})))
            .await
            .unwrap();

        assert!(!response.ok);
        assert_eq!(response.status, 401);
        assert_eq!(response.body.get_str("error"), Some("invalid credentials"));
    }

    #[tokio::test]
    async fn test_unparseable_body_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&server)
            .await;

        let response = client_for(&server)
            .request("/health", RequestOptions::get())
            .await
            .unwrap();

        assert!(!response.ok);
        assert!(response.body.is_absent());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Bind then drop a listener so the port is closed
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let base = format!("http://127.0.0.1:{}", port);
        let client = ApiClient::new(base.parse().unwrap()).unwrap();

        let result = client
            .request("/auth/login", RequestOptions::post(json!({})))
            .await;
        assert!(matches!(result, Err(AuthError::NetworkError(_))));
    }
}
