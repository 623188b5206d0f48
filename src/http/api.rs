//! Resilient client for the remote job API.
//!
//! Every call is retried forever on connection errors and 5xx responses, waiting an
//! exponentially growing delay between attempts (see [Backoff]). Any other non-2xx response is
//! returned to the caller as [ApiError::Client] without retrying.
use super::backoff::Backoff;
use super::client::HttpClient;
use super::model::{NextSteps, NextStepsQuery, StatusUpdate, SubUnit};
use crate::console::{ConsoleBatch, ConsoleSink};
use crate::status::SystemCode;
use async_trait::async_trait;
use http::{header, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("{method} {url} returned status {status}: {body}")]
    Client {
        method: String,
        url: String,
        status: u16,
        body: String,
    },
    #[error("could not build request: {0}")]
    Request(String),
    #[error("could not encode request body: {0}")]
    Encode(String),
    #[error("response body is not valid JSON: {0}")]
    InvalidBody(String),
    #[error("unexpected response payload: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Client { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Remote operations the agent depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn get_system_codes(&self) -> Result<Vec<SystemCode>, ApiError>;

    /// Returns the next step to run for the affinity group or `None` once the group is complete.
    async fn get_next_step(
        &self,
        run_id: &str,
        affinity_group: &str,
    ) -> Result<Option<String>, ApiError>;

    async fn get_sub_units(&self, step_id: &str) -> Result<Vec<SubUnit>, ApiError>;

    async fn put_unit_status(&self, unit_id: &str, update: &StatusUpdate) -> Result<(), ApiError>;

    async fn put_step_status(&self, step_id: &str, update: &StatusUpdate) -> Result<(), ApiError>;

    async fn put_cluster_node(&self, node_id: &str, update: &StatusUpdate)
        -> Result<(), ApiError>;
}

pub struct ApiClient<C> {
    http_client: C,
    base_url: String,
    token: String,
    initial_delay: Duration,
}

impl<C> ApiClient<C>
where
    C: HttpClient,
{
    pub fn new(http_client: C, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            initial_delay: super::backoff::INITIAL_DELAY,
        }
    }

    /// Overrides the first retry delay.
    pub fn with_initial_delay(self, initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            ..self
        }
    }

    /// Performs a call and returns its parsed JSON body, or [Value::Null] for an empty body.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let payload = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|err| ApiError::Encode(err.to_string()))?
            .unwrap_or_default();

        let mut backoff = Backoff::new().with_initial_delay(self.initial_delay);
        let started = Instant::now();
        debug!(%method, %url, "Starting call");

        loop {
            let request = self.build_request(&method, &url, payload.clone())?;
            let attempt = self.http_client.send(request).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let response = match attempt {
                Ok(response) if !response.status().is_server_error() => response,
                Ok(response) => {
                    let delay = backoff.next_delay();
                    error!(
                        %method, %url, elapsed_ms, status = response.status().as_u16(),
                        "Call returned a server error. Retrying in {} ms", delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    error!(
                        %method, %url, elapsed_ms, %err,
                        "Call failed. Retrying in {} ms", delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = String::from_utf8_lossy(response.body()).to_string();
                warn!(%method, %url, elapsed_ms, status = status.as_u16(), %body, "Call rejected");
                return Err(ApiError::Client {
                    method: method.to_string(),
                    url,
                    status: status.as_u16(),
                    body,
                });
            }

            debug!(%method, %url, elapsed_ms, status = status.as_u16(), "Call succeeded");
            return parse_body(response.body());
        }
    }

    fn build_request(
        &self,
        method: &Method,
        url: &str,
        payload: Vec<u8>,
    ) -> Result<http::Request<Vec<u8>>, ApiError> {
        http::Request::builder()
            .method(method.clone())
            .uri(url)
            .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
            .header(header::AUTHORIZATION, format!("apiToken {}", self.token))
            .body(payload)
            .map_err(|err| ApiError::Request(err.to_string()))
    }

    async fn put(&self, path: &str, update: &StatusUpdate) -> Result<(), ApiError> {
        let body = to_value(update)?;
        self.call(Method::PUT, path, Some(&body)).await.map(|_| ())
    }
}

fn parse_body(body: &[u8]) -> Result<Value, ApiError> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|err| ApiError::InvalidBody(err.to_string()))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|err| ApiError::Decode(err.to_string()))
}

fn to_value<T: serde::Serialize>(payload: &T) -> Result<Value, ApiError> {
    serde_json::to_value(payload).map_err(|err| ApiError::Encode(err.to_string()))
}

#[async_trait]
impl<C> JobApi for ApiClient<C>
where
    C: HttpClient,
{
    async fn get_system_codes(&self) -> Result<Vec<SystemCode>, ApiError> {
        decode(self.call(Method::GET, "/systemCodes", None).await?)
    }

    async fn get_next_step(
        &self,
        run_id: &str,
        affinity_group: &str,
    ) -> Result<Option<String>, ApiError> {
        let query = to_value(&NextStepsQuery { affinity_group })?;
        let value = self
            .call(
                Method::POST,
                &format!("/runs/{run_id}/nextSteps"),
                Some(&query),
            )
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let next: NextSteps = decode(value)?;
        Ok(next.step_ids.into_iter().next())
    }

    async fn get_sub_units(&self, step_id: &str) -> Result<Vec<SubUnit>, ApiError> {
        let value = self
            .call(Method::GET, &format!("/steplets?stepIds={step_id}"), None)
            .await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        decode(value)
    }

    async fn put_unit_status(&self, unit_id: &str, update: &StatusUpdate) -> Result<(), ApiError> {
        self.put(&format!("/steplets/{unit_id}"), update).await
    }

    async fn put_step_status(&self, step_id: &str, update: &StatusUpdate) -> Result<(), ApiError> {
        self.put(&format!("/steps/{step_id}"), update).await
    }

    async fn put_cluster_node(
        &self,
        node_id: &str,
        update: &StatusUpdate,
    ) -> Result<(), ApiError> {
        self.put(&format!("/clusterNodes/{node_id}"), update).await
    }
}

#[async_trait]
impl<C> ConsoleSink for ApiClient<C>
where
    C: HttpClient,
{
    async fn post_entries(&self, batch: &ConsoleBatch) -> Result<(), ApiError> {
        let body = to_value(batch)?;
        self.call(Method::POST, batch.path(), Some(&body))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::client::{HttpClientError, MockHttpClient};
    use assert_matches::assert_matches;
    use mockall::Sequence;
    use serde_json::json;
    use tracing_test::traced_test;

    fn response(status: u16, body: &str) -> http::Response<Vec<u8>> {
        http::Response::builder()
            .status(status)
            .body(body.as_bytes().to_vec())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn server_error_is_retried_after_a_delay() {
        let mut http_client = MockHttpClient::new();
        let mut seq = Sequence::new();
        http_client
            .expect_send()
            .once()
            .in_sequence(&mut seq)
            .returning(|_| Ok(response(500, "")));
        http_client
            .expect_send()
            .once()
            .in_sequence(&mut seq)
            .returning(|_| Ok(response(200, r#"[{"name":"success","code":30}]"#)));

        let api = ApiClient::new(http_client, "http://api", "token");
        let started = tokio::time::Instant::now();
        let codes = api.get_system_codes().await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(
            codes,
            vec![SystemCode {
                name: "success".to_string(),
                code: 30
            }]
        );
        assert!(logs_contain("Retrying in 1000 ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn connection_errors_are_retried_with_growing_delays() {
        let mut http_client = MockHttpClient::new();
        let mut seq = Sequence::new();
        http_client
            .expect_send()
            .times(3)
            .in_sequence(&mut seq)
            .returning(|_| Err(HttpClientError::Transport("refused".to_string())));
        http_client
            .expect_send()
            .once()
            .in_sequence(&mut seq)
            .returning(|_| Ok(response(200, "")));

        let api = ApiClient::new(http_client, "http://api", "token");
        let started = tokio::time::Instant::now();
        api.put_unit_status("1", &StatusUpdate::new(30))
            .await
            .unwrap();

        // 1s + 2s + 4s
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let mut http_client = MockHttpClient::new();
        http_client
            .expect_send()
            .once()
            .returning(|_| Ok(response(404, "not found")));

        let api = ApiClient::new(http_client, "http://api/", "token");
        let err = api.get_sub_units("9").await.unwrap_err();

        assert_matches!(err, ApiError::Client { status: 404, ref url, ref body, .. } => {
            assert_eq!(url, "http://api/steplets?stepIds=9");
            assert_eq!(body, "not found");
        });
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn invalid_json_body_is_an_error_despite_success_status() {
        let mut http_client = MockHttpClient::new();
        http_client
            .expect_send()
            .once()
            .returning(|_| Ok(response(200, "<html>")));

        let api = ApiClient::new(http_client, "http://api", "token");
        let err = api.call(Method::GET, "/systemCodes", None).await;
        assert_matches!(err, Err(ApiError::InvalidBody(_)));
    }

    #[tokio::test]
    async fn requests_carry_token_and_json_body() {
        let mut http_client = MockHttpClient::new();
        http_client
            .expect_send()
            .once()
            .withf(|req| {
                req.method() == Method::POST
                    && req.uri() == "http://api/runs/5/nextSteps"
                    && req.headers()[header::AUTHORIZATION] == "apiToken secret"
                    && serde_json::from_slice::<Value>(req.body()).unwrap()
                        == json!({"affinityGroup": "build"})
            })
            .returning(|_| Ok(response(200, r#"{"stepIds":[42, 43]}"#)));

        let api = ApiClient::new(http_client, "http://api", "secret");
        assert_eq!(
            api.get_next_step("5", "build").await.unwrap(),
            Some("42".to_string())
        );
    }

    #[tokio::test]
    async fn empty_next_steps_completes_the_group() {
        let mut http_client = MockHttpClient::new();
        http_client
            .expect_send()
            .once()
            .returning(|_| Ok(response(200, r#"{"stepIds":[]}"#)));

        let api = ApiClient::new(http_client, "http://api", "secret");
        assert_eq!(api.get_next_step("5", "build").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unexpected_payload_is_a_decode_error() {
        let mut http_client = MockHttpClient::new();
        http_client
            .expect_send()
            .once()
            .returning(|_| Ok(response(200, r#"{"codes": 1}"#)));

        let api = ApiClient::new(http_client, "http://api", "secret");
        assert_matches!(api.get_system_codes().await, Err(ApiError::Decode(_)));
    }
}
