//! Error taxonomy and request helpers shared by every endpoint.

use std::fmt;
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde_json::Value;

/// User-Agent sent with every request.
pub const USER_AGENT: &str = concat!("waifu/", env!("CARGO_PKG_VERSION"));

/// Categories of client errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Non-success HTTP status
    HttpStatus,
    /// Request or read timed out
    Timeout,
    /// Connection could not be established or broke mid-stream
    Connection,
    /// Response body or frame could not be decoded
    Parse,
    /// The server answered with an `error` payload
    Api,
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientErrorKind::HttpStatus => write!(f, "http_status"),
            ClientErrorKind::Timeout => write!(f, "timeout"),
            ClientErrorKind::Connection => write!(f, "connection"),
            ClientErrorKind::Parse => write!(f, "parse"),
            ClientErrorKind::Api => write!(f, "api_error"),
        }
    }
}

/// Structured error from the avatar server or the HTTP layer.
#[derive(Debug, Clone)]
pub struct ClientError {
    pub kind: ClientErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Raw response body, when there is one
    pub details: Option<String>,
    /// HTTP status for `HttpStatus` errors
    pub status: Option<u16>,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            status: None,
        }
    }

    pub fn http_status(status: u16, body: &str) -> Self {
        let detail = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|json| json.get("detail").or(json.get("error")).cloned())
            .and_then(|v| v.as_str().map(str::to_string));
        let message = match detail {
            Some(msg) => format!("HTTP {status}: {msg}"),
            None => format!("HTTP {status}"),
        };
        Self {
            kind: ClientErrorKind::HttpStatus,
            message,
            details: (!body.is_empty()).then(|| body.to_string()),
            status: Some(status),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Parse, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Api, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ClientError {}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

pub(crate) fn classify_reqwest_error(e: &reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::new(ClientErrorKind::Timeout, format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ClientError::new(ClientErrorKind::Connection, format!("Connection failed: {e}"))
    } else if e.is_decode() {
        ClientError::parse(format!("Invalid response body: {e}"))
    } else {
        ClientError::new(ClientErrorKind::Connection, format!("Network error: {e}"))
    }
}

/// HTTP client bound to one server: base URL, optional bearer token.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ApiClient {
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ClientError::new(ClientErrorKind::Connection, e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Sends `builder`, mapping transport failures and non-success statuses.
    pub(crate) async fn send(&self, builder: RequestBuilder) -> ClientResult<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::http_status(status.as_u16(), &body));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_extracts_detail() {
        let err = ClientError::http_status(404, r#"{"detail":"Not Found"}"#);
        assert_eq!(err.message, "HTTP 404: Not Found");
        assert!(err.is_not_found());
        assert_eq!(err.kind, ClientErrorKind::HttpStatus);

        let err = ClientError::http_status(500, "boom");
        assert_eq!(err.message, "HTTP 500");
        assert_eq!(err.details.as_deref(), Some("boom"));

        let err = ClientError::http_status(502, "");
        assert!(err.details.is_none());
    }
}
