//! reqwest-backed HTTP client for api sources and send outputs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;

use crate::domain::reasoning::{HttpClient, HttpRequest, HttpResponse};
use crate::domain::DomainError;

#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Client whose requests time out after `timeout` unless the request sets its own
    pub fn with_timeout(timeout: Duration) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, DomainError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| DomainError::validation(format!("Invalid HTTP method: {}", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DomainError::http(format!("Request to {} failed: {}", request.url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DomainError::http(format!("Failed to read response body: {}", e)))?;

        Ok(HttpResponse { status, body })
    }
}
