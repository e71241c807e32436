//! HTTP client abstraction for the remote source.
//!
//! The remote loader only needs "GET with a timeout and optional headers,
//! return status and body". The trait keeps the loader independent of the
//! HTTP library; [`ReqwestClient`] is the production implementation.

use std::sync::Arc;
use std::time::Duration;

/// A GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Target URL.
    pub url: String,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Overall request timeout.
    pub timeout: Duration,
}

impl HttpRequest {
    /// Creates a request without extra headers.
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout,
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A response: status code plus raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implementations must honor `request.timeout`. Transport failures
/// (connection refused, timeout, TLS) are returned as `Err`; any HTTP
/// status, including 5xx, is an `Ok` response.
pub trait HttpClient: Send + Sync {
    /// Performs a GET request.
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, String>;
}

impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, String> {
        (**self).get(request)
    }
}

/// Blocking `reqwest` client.
///
/// Must not be called from inside an async runtime thread.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, String> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("allowsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("failed to create HTTP client: {e}"))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, String> {
        let mut builder = self.client.get(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .map_err(|e| format!("HTTP request failed: {e}"))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| format!("failed to read response body: {e}"))?;

        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder() {
        let request = HttpRequest::get("https://example.com/users", Duration::from_secs(3))
            .with_header("Authorization", "Bearer t");

        assert_eq!(request.url, "https://example.com/users");
        assert_eq!(request.timeout, Duration::from_secs(3));
        assert_eq!(request.headers.len(), 1);
    }

    #[test]
    fn success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(301, "").is_success());
        assert!(!HttpResponse::new(500, "").is_success());
    }

    #[test]
    fn reqwest_client_reports_connection_failure() {
        let client = ReqwestClient::new().unwrap();
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let request = HttpRequest::get("http://127.0.0.1:9/", Duration::from_millis(500));
        assert!(client.get(&request).is_err());
    }
}
