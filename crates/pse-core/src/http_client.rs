//! Transport seam between the PSE Edge adapter and the network.
//!
//! Adapters build [`HttpRequest`]s and hand them to an [`HttpClient`]; tests
//! substitute a canned client and inspect the recorded requests.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Request payload. Edge endpoints take either a urlencoded form or JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    /// Field order is preserved on the wire.
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

impl Body {
    pub const fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Form(_) => Some("application/x-www-form-urlencoded; charset=UTF-8"),
            Self::Json(_) => Some("application/json"),
        }
    }

    pub fn encode(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Form(fields) => Some(
                fields
                    .iter()
                    .map(|(name, value)| format!("{}={}", urlencoding::encode(name), urlencoding::encode(value)))
                    .collect::<Vec<_>>()
                    .join("&"),
            ),
            Self::Json(value) => Some(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Lowercase names, in insertion order.
    pub headers: Vec<(String, String)>,
    pub body: Body,
    pub timeout: Duration,
}

impl HttpRequest {
    fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Body::Empty,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(existing, _)| *existing != name);
        self.headers.push((name, value.into()));
        self
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        self.body = Body::Form(
            fields
                .iter()
                .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
                .collect(),
        );
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = Duration::from_millis(timeout_ms);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Response as seen by adapters. Header names are lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    /// The request could not be built or sent as written.
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

impl HttpError {
    /// Whether a later attempt could plausibly succeed.
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::Invalid(_))
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(error: reqwest::Error) -> Self {
        let message = error.to_string();
        if error.is_timeout() {
            Self::Timeout(message)
        } else if error.is_connect() {
            Self::Connect(message)
        } else if error.is_builder() {
            Self::Invalid(message)
        } else {
            Self::Transport(message)
        }
    }
}

pub trait HttpClient: Send + Sync {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a>;
}

/// reqwest transport with a cookie jar; Edge hands out a session cookie on first contact.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let builder = reqwest::Client::builder()
            .user_agent(concat!("pse-etl/", env!("CARGO_PKG_VERSION")))
            .cookie_store(true);
        match builder.build() {
            Ok(client) => Self { client },
            Err(error) => {
                tracing::warn!(%error, "falling back to a default http client");
                Self {
                    client: reqwest::Client::new(),
                }
            }
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        }
        .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let (Some(content_type), Some(encoded)) = (request.body.content_type(), request.body.encode()) {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(encoded);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_ascii_lowercase(), value.to_owned()))
            })
            .collect();
        let body = response.text().await?;

        Ok(HttpResponse { status, headers, body })
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(self.send(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_body_keeps_field_order_and_escapes_values() {
        let request = HttpRequest::post("https://edge.test/companyDirectory/search.ax")
            .form(&[("pageNo", "2"), ("keyword", "a&b c")]);

        assert_eq!(request.body.encode().as_deref(), Some("pageNo=2&keyword=a%26b%20c"));
        assert_eq!(
            request.body.content_type(),
            Some("application/x-www-form-urlencoded; charset=UTF-8")
        );
    }

    #[test]
    fn repeated_header_replaces_earlier_value() {
        let request = HttpRequest::get("https://edge.test/")
            .header("Referer", "https://edge.test/a")
            .header("referer", "https://edge.test/b");

        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header_value("REFERER"), Some("https://edge.test/b"));
    }

    #[test]
    fn response_header_lookup_ignores_case() {
        let response = HttpResponse::ok("{}").with_header("Date", "Fri, 12 Jan 2024 08:00:00 GMT");
        assert_eq!(response.header("DATE"), Some("Fri, 12 Jan 2024 08:00:00 GMT"));
    }

    #[test]
    fn only_invalid_requests_are_permanent() {
        assert!(HttpError::Timeout(String::from("slow")).is_transient());
        assert!(!HttpError::Invalid(String::from("bad url")).is_transient());
    }
}
