//! Transport boundary: the only call into the service under test.

use async_trait::async_trait;
use quill_proto::{HttpRequest, HttpResponse, Method, NetworkError};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Sends one request and returns whatever the service answered.
///
/// Any HTTP status is a response, not an error. `NetworkError` means no
/// response arrived at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError>;
}

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Creates a transport whose requests give up after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NetworkError::Other(e.to_string()))?;
        Ok(Self {
            client,
            timeout: request_timeout,
        })
    }

    fn classify(&self, error: &reqwest::Error) -> NetworkError {
        if error.is_timeout() {
            NetworkError::Timeout(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX))
        } else if error.is_connect() {
            NetworkError::Connect(error.to_string())
        } else {
            NetworkError::Other(error.to_string())
        }
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        debug!(method = %request.method, url = %request.url, "Sending request");

        let mut builder = self
            .client
            .request(to_reqwest(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| self.classify(&e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let text = response.text().await.map_err(|e| self.classify(&e))?;

        debug!(status, bytes = text.len(), "Received response");

        Ok(HttpResponse {
            status,
            headers,
            body: (!text.is_empty()).then_some(text),
        })
    }
}
