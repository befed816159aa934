//! HTTP connector client.
//!
//! Connectors are black-box processes exposing `GET /pull?since=<ISO-8601>`
//! and `GET /health`. This client is the only way documents enter the
//! orchestrator: it pulls one finite, ordered batch per call, restartable via
//! the opaque `since` cursor.

use crate::errors::SourceError;
use crate::traits::{CredentialResolver, DocumentSource, NoCredentials};
use crate::types::{AuthCredential, PullBatch, SourceConfig};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(4);
const BODY_EXCERPT_LEN: usize = 512;

/// HTTP implementation of [`DocumentSource`]
pub struct HttpConnector {
    client: Client,
    resolver: Arc<dyn CredentialResolver>,
}

#[derive(Debug, Deserialize)]
struct HealthPayload {
    status: String,
}

impl HttpConnector {
    /// Create a connector client with the given per-request timeout
    pub fn new(
        timeout: Duration,
        resolver: Arc<dyn CredentialResolver>,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::ConfigError(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client, resolver })
    }

    /// Connector client without credentials, for local connectors
    pub fn unauthenticated(timeout: Duration) -> Result<Self, SourceError> {
        Self::new(timeout, Arc::new(NoCredentials))
    }

    fn apply_auth(&self, request: RequestBuilder, source: &SourceConfig) -> RequestBuilder {
        let credential = source
            .auth_ref
            .as_deref()
            .and_then(|auth_ref| self.resolver.resolve(auth_ref));
        match credential {
            Some(AuthCredential::Bearer(token)) => request.bearer_auth(token),
            Some(AuthCredential::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            None => request,
        }
    }

    /// GET with bounded exponential backoff. 5xx and transport errors retry;
    /// 4xx surfaces immediately.
    async fn get_with_retries(
        &self,
        source: &SourceConfig,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Response, SourceError> {
        let mut attempt: u32 = 0;
        loop {
            let request = self.apply_auth(self.client.get(url).query(query), source);
            let error = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let body = excerpt(&response.text().await.unwrap_or_default());
                    let error = SourceError::Http {
                        status: status.as_u16(),
                        body,
                    };
                    if !status.is_server_error() {
                        // Client errors are not retryable
                        return Err(error);
                    }
                    error
                }
                Err(e) if e.is_timeout() => SourceError::Timeout(e.to_string()),
                Err(e) => SourceError::Network(e.to_string()),
            };
            if attempt >= MAX_RETRIES {
                return Err(error);
            }
            let delay = BACKOFF_CAP.min(BACKOFF_BASE * 2u32.pow(attempt));
            warn!(
                source_id = %source.source_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "connector request failed, retrying: {}", error
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl DocumentSource for HttpConnector {
    async fn pull(
        &self,
        source: &SourceConfig,
        since: Option<&str>,
    ) -> Result<PullBatch, SourceError> {
        let url = format!("{}/pull", source.connector_url.trim_end_matches('/'));
        let query: Vec<(&str, &str)> = since.map(|s| ("since", s)).into_iter().collect();

        debug!(source_id = %source.source_id, %url, ?since, "pulling documents");
        let response = self.get_with_retries(source, &url, &query).await?;
        let batch: PullBatch = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidPayload(format!("pull response: {}", e)))?;

        debug!(
            source_id = %source.source_id,
            documents = batch.documents.len(),
            "pull completed"
        );
        Ok(batch)
    }

    async fn health(&self, source: &SourceConfig) -> Result<(), SourceError> {
        let url = format!("{}/health", source.connector_url.trim_end_matches('/'));
        let response = self.get_with_retries(source, &url, &[]).await?;
        let payload: HealthPayload = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidPayload(format!("health response: {}", e)))?;
        if payload.status == "ok" {
            Ok(())
        } else {
            Err(SourceError::Http {
                status: 200,
                body: format!("connector reports status '{}'", payload.status),
            })
        }
    }
}

fn excerpt(body: &str) -> String {
    if body.len() <= BODY_EXCERPT_LEN {
        return body.to_string();
    }
    let mut end = BODY_EXCERPT_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
