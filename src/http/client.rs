//! # HTTP transport used by the API client
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised before a complete HTTP response is available.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HttpClientError {
    #[error("could not build the http client: {0}")]
    Build(String),
    #[error("connection error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// The `HttpClient` trait defines the interface the API client uses to send requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, HttpClientError>;
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub(crate) timeout: Duration,
    pub(crate) conn_timeout: Duration,
}

impl HttpConfig {
    pub fn new(timeout: Duration, conn_timeout: Duration) -> Self {
        Self {
            timeout,
            conn_timeout,
        }
    }
}

/// [HttpClient] backed by an async reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn try_new(config: &HttpConfig) -> Result<Self, HttpClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.conn_timeout)
            .build()
            .map_err(|err| HttpClientError::Build(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, HttpClientError> {
        let (parts, body) = request.into_parts();
        let res = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body)
            .send()
            .await
            .map_err(|err| HttpClientError::Transport(err.to_string()))?;

        let status = res.status();
        let version = res.version();
        let body: Vec<u8> = res
            .bytes()
            .await
            .map_err(|err| HttpClientError::Transport(err.to_string()))?
            .into();

        http::Response::builder()
            .status(status)
            .version(version)
            .body(body)
            .map_err(|err| HttpClientError::InvalidResponse(err.to_string()))
    }
}
