use bytes::Bytes;
use std::future::Future;
use std::time::Duration;

mod client;

pub use client::HttpClient;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("only http:// URLs are supported: {0}")]
    OnlyHttpSupported(String),

    #[error("http request build failed: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("http request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("http request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read response body: {0}")]
    BodyRead(#[from] hyper::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum HttpTransportErrorKind {
    InvalidUrl,
    Connect,
    Timeout,
    Request,
    BodyRead,
}

impl Error {
    pub fn transport_error_kind(&self) -> HttpTransportErrorKind {
        match self {
            Error::InvalidUrl(_) | Error::OnlyHttpSupported(_) | Error::RequestBuild(_) => {
                HttpTransportErrorKind::InvalidUrl
            }
            Error::Request(err) if err.is_connect() => HttpTransportErrorKind::Connect,
            Error::Request(_) => HttpTransportErrorKind::Request,
            Error::Timeout(_) => HttpTransportErrorKind::Timeout,
            Error::BodyRead(_) => HttpTransportErrorKind::BodyRead,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// `Content-Type` and `Accept` set to `application/json`.
    #[must_use]
    pub fn json(self) -> Self {
        self.with_header("content-type", "application/json")
            .with_header("accept", "application/json")
    }
}

/// Sends one request and yields the response or a transport failure.
///
/// Non-2xx statuses are responses, not errors.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, req: HttpRequest) -> impl Future<Output = Result<HttpResponse>> + Send;
}

impl Transport for HttpClient {
    fn send(&self, req: HttpRequest) -> impl Future<Output = Result<HttpResponse>> + Send {
        self.request(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_request_carries_content_type_and_accept() {
        let req = HttpRequest::new(http::Method::POST, "http://127.0.0.1:8080/api/purchase")
            .json()
            .with_timeout(Duration::from_secs(2));

        assert_eq!(req.method, http::Method::POST);
        assert!(req.body.is_empty());
        assert_eq!(req.timeout, Some(Duration::from_secs(2)));
        assert!(
            req.headers
                .iter()
                .any(|(k, v)| k == "content-type" && v == "application/json")
        );
        assert!(
            req.headers
                .iter()
                .any(|(k, v)| k == "accept" && v == "application/json")
        );
    }

    #[test]
    fn transport_error_kinds_are_snake_case() {
        assert_eq!(
            Error::Timeout(Duration::from_millis(5))
                .transport_error_kind()
                .to_string(),
            "timeout"
        );
        assert_eq!(
            Error::InvalidUrl("x".to_string()).transport_error_kind(),
            HttpTransportErrorKind::InvalidUrl
        );
        assert_eq!(HttpTransportErrorKind::BodyRead.as_ref(), "body_read");
    }
}
