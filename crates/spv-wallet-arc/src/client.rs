//! ARC HTTP client for broadcasting and querying transactions.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use spv_wallet_transaction::Transaction;
use tracing::debug;

use crate::error::ArcError;
use crate::types::{ArcConfig, ArcResponse, PayloadKind};

/// Async broadcasting trait for ARC.
pub trait AsyncBroadcaster {
    /// Broadcast a transaction asynchronously.
    fn broadcast(
        &self,
        tx: &Transaction,
    ) -> impl std::future::Future<Output = Result<ArcResponse, ArcError>> + Send;

    /// Query the current status of a transaction.
    fn status(
        &self,
        txid: &str,
    ) -> impl std::future::Future<Output = Result<ArcResponse, ArcError>> + Send;
}

/// HTTP client for the ARC API.
#[derive(Debug, Clone)]
pub struct ArcClient {
    /// Client configuration.
    config: ArcConfig,
    /// Underlying HTTP client.
    client: reqwest::Client,
}

impl ArcClient {
    /// Create a new ARC client with the given configuration.
    pub fn new(config: ArcConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    /// The client configuration.
    pub fn config(&self) -> &ArcConfig {
        &self.config
    }

    /// Choose the payload for `tx`: EF when preferred and every input has
    /// its source output, raw bytes otherwise.
    pub fn payload_for(&self, tx: &Transaction) -> (Vec<u8>, PayloadKind) {
        if self.config.prefer_extended_format {
            if let Ok(ef) = tx.to_ef_bytes() {
                return (ef, PayloadKind::Extended);
            }
        }
        (tx.to_bytes(), PayloadKind::Raw)
    }

    /// Broadcast a transaction to the ARC API.
    pub async fn broadcast_async(&self, tx: &Transaction) -> Result<ArcResponse, ArcError> {
        let (payload, kind) = self.payload_for(tx);
        debug!(txid = %tx.tx_id_hex(), ?kind, bytes = payload.len(), "submitting to ARC");
        self.broadcast_bytes(payload).await
    }

    /// Submit already-serialized transaction bytes (raw or EF).
    ///
    /// An "already known" answer, whether on a 2xx or a 4xx, is returned
    /// as success.
    pub async fn broadcast_bytes(&self, payload: Vec<u8>) -> Result<ArcResponse, ArcError> {
        let url = format!("{}/tx", self.config.base_url);
        let headers = self.build_headers();

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if status.is_success() {
            let response: ArcResponse = serde_json::from_str(&text)?;
            if response.is_rejected() && !response.is_already_known() {
                return Err(ArcError::Rejected {
                    code: response.status.unwrap_or_default(),
                    description: response.description(),
                });
            }
            return Ok(response);
        }

        if status.is_client_error() && status.as_u16() != 429 {
            if let Ok(response) = serde_json::from_str::<ArcResponse>(&text) {
                if response.is_already_known() {
                    return Ok(response);
                }
                return Err(ArcError::Rejected {
                    code: response.status.unwrap_or(i32::from(status.as_u16())),
                    description: response.description(),
                });
            }
        }

        Err(ArcError::ServerError {
            status_code: status.as_u16(),
            message: text,
        })
    }

    /// Query the status of a transaction by txid.
    pub async fn status(&self, txid: &str) -> Result<ArcResponse, ArcError> {
        let url = format!("{}/tx/{}", self.config.base_url, txid);
        let headers = self.build_headers();

        let resp = self.client.get(&url).headers(headers).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ArcError::ServerError {
                status_code: status.as_u16(),
                message,
            });
        }

        let text = resp.text().await?;
        let response: ArcResponse = serde_json::from_str(&text)?;
        Ok(response)
    }

    /// Build common headers from config.
    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(ref key) = self.config.api_key {
            if let Ok(val) = HeaderValue::from_str(&format!("Bearer {key}")) {
                headers.insert(AUTHORIZATION, val);
            }
        }

        if let Some(ref url) = self.config.callback_url {
            if let Ok(val) = HeaderValue::from_str(url) {
                headers.insert("x-callbackurl", val);
            }
        }

        if let Some(ref token) = self.config.callback_token {
            if let Ok(val) = HeaderValue::from_str(token) {
                headers.insert("x-callbacktoken", val);
            }
        }

        if let Some(ref status) = self.config.wait_for_status {
            if let Ok(val) = HeaderValue::from_str(&status.as_code().to_string()) {
                headers.insert("x-waitforstatus", val);
            }
        }

        let flags = [
            (self.config.skip_fee_validation, "x-skipfeevalidation"),
            (self.config.skip_script_validation, "x-skipscriptvalidation"),
            (self.config.skip_tx_validation, "x-skiptxvalidation"),
        ];
        for (enabled, name) in flags {
            if enabled {
                headers.insert(name, HeaderValue::from_static("true"));
            }
        }

        if let Some(timeout) = self.config.max_timeout {
            if let Ok(val) = HeaderValue::from_str(&timeout.to_string()) {
                headers.insert("x-maxtimeout", val);
            }
        }

        headers
    }
}

impl AsyncBroadcaster for ArcClient {
    async fn broadcast(&self, tx: &Transaction) -> Result<ArcResponse, ArcError> {
        self.broadcast_async(tx).await
    }

    async fn status(&self, txid: &str) -> Result<ArcResponse, ArcError> {
        ArcClient::status(self, txid).await
    }
}
