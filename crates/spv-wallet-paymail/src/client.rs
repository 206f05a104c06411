//! Paymail HTTP client: capability discovery, address resolution and the
//! two P2P endpoints (payment destination and transaction submission).

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::address::{expand_template, SanitizedPaymail};
use crate::error::PaymailError;
use crate::types::{
    Capabilities, P2PDestinationResponse, P2PTransaction, P2PTransactionResponse, PaymailConfig,
    ResolveAddressRequest, ResolveAddressResponse, BRFC_BASIC_ADDRESS_RESOLUTION,
    BRFC_BEEF_TRANSACTION, BRFC_P2P_PAYMENT_DESTINATION, BRFC_P2P_TRANSACTION,
};

/// HTTP client for paymail providers.
#[derive(Debug, Clone)]
pub struct PaymailClient {
    /// Client configuration.
    config: PaymailConfig,
    /// Underlying HTTP client.
    client: reqwest::Client,
}

impl PaymailClient {
    /// Create a new paymail client with the given configuration.
    pub fn new(config: PaymailConfig) -> Result<Self, PaymailError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(Self::build_headers(&config))
            .build()?;
        Ok(Self { config, client })
    }

    /// The client configuration.
    pub fn config(&self) -> &PaymailConfig {
        &self.config
    }

    /// URL of the capability document for `domain`.
    pub fn capabilities_url(&self, domain: &str) -> String {
        match self.config.port {
            Some(port) => format!(
                "{}://{}:{}/.well-known/bsvalias",
                self.config.scheme, domain, port
            ),
            None => format!("{}://{}/.well-known/bsvalias", self.config.scheme, domain),
        }
    }

    /// Fetch and check the capability document of `domain`.
    pub async fn get_capabilities(&self, domain: &str) -> Result<Capabilities, PaymailError> {
        let url = self.capabilities_url(domain);
        let caps: Capabilities = self.do_get(&url).await?;
        if caps.bsvalias.is_empty() {
            return Err(PaymailError::InvalidCapabilities(format!(
                "{domain}: missing bsvalias version"
            )));
        }
        debug!(domain, count = caps.capabilities.len(), "fetched paymail capabilities");
        Ok(caps)
    }

    /// Basic address resolution: ask the provider for a locking script.
    ///
    /// # Arguments
    /// * `caps` - Capabilities of the receiver's domain.
    /// * `paymail` - The receiver.
    /// * `request` - Sender details and intended amount.
    ///
    /// # Returns
    /// The locking script hex returned by the provider.
    pub async fn resolve_address(
        &self,
        caps: &Capabilities,
        paymail: &SanitizedPaymail,
        request: &ResolveAddressRequest,
    ) -> Result<String, PaymailError> {
        let url = self.capability_url(caps, BRFC_BASIC_ADDRESS_RESOLUTION, paymail)?;
        let response: ResolveAddressResponse = self.do_post(&url, request).await?;
        if response.output.is_empty() {
            return Err(PaymailError::InvalidResponse(format!(
                "{}: empty output script",
                paymail.address
            )));
        }
        Ok(response.output)
    }

    /// Request P2P payment destinations for `satoshis`.
    pub async fn get_p2p_payment_destination(
        &self,
        caps: &Capabilities,
        paymail: &SanitizedPaymail,
        satoshis: u64,
    ) -> Result<P2PDestinationResponse, PaymailError> {
        let url = self.capability_url(caps, BRFC_P2P_PAYMENT_DESTINATION, paymail)?;
        let body = serde_json::json!({ "satoshis": satoshis });
        let response: P2PDestinationResponse = self.do_post(&url, &body).await?;

        if response.outputs.is_empty() {
            return Err(PaymailError::InvalidResponse(format!(
                "{}: destination response has no outputs",
                paymail.address
            )));
        }
        if response.reference.is_empty() {
            return Err(PaymailError::InvalidResponse(format!(
                "{}: destination response has no reference",
                paymail.address
            )));
        }
        Ok(response)
    }

    /// Submit a transaction to the receiver's P2P endpoint.
    ///
    /// The BEEF endpoint is used when `transaction.beef` is set, the basic
    /// one otherwise.
    pub async fn send_p2p_transaction(
        &self,
        caps: &Capabilities,
        paymail: &SanitizedPaymail,
        transaction: &P2PTransaction,
    ) -> Result<P2PTransactionResponse, PaymailError> {
        let brfc = if transaction.beef.is_some() {
            BRFC_BEEF_TRANSACTION
        } else {
            BRFC_P2P_TRANSACTION
        };
        let url = self.capability_url(caps, brfc, paymail)?;
        self.submit_p2p_transaction(&url, transaction).await
    }

    /// Submit a transaction to an already expanded receive URL.
    ///
    /// A 409 or an "already received" answer is reported as
    /// [`PaymailError::Duplicate`].
    pub async fn submit_p2p_transaction(
        &self,
        url: &str,
        transaction: &P2PTransaction,
    ) -> Result<P2PTransactionResponse, PaymailError> {
        match self.do_post::<_, P2PTransactionResponse>(url, transaction).await {
            Ok(response) => Ok(response),
            Err(PaymailError::ServerError {
                status_code,
                message,
            }) if status_code == 409 || message.to_lowercase().contains("already") => {
                Err(PaymailError::Duplicate(message))
            }
            Err(e) => Err(e),
        }
    }

    /// Expand the URL template advertised for `brfc` for this paymail.
    pub fn capability_url(
        &self,
        caps: &Capabilities,
        brfc: &str,
        paymail: &SanitizedPaymail,
    ) -> Result<String, PaymailError> {
        let template = caps
            .get_string(brfc)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PaymailError::MissingCapability(brfc.to_string()))?;
        Ok(expand_template(template, &paymail.alias, &paymail.domain))
    }

    async fn do_get<T: DeserializeOwned>(&self, url: &str) -> Result<T, PaymailError> {
        let resp = self.client.get(url).send().await?;
        Self::parse_response(url, resp).await
    }

    async fn do_post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, PaymailError> {
        let resp = self.client.post(url).json(body).send().await?;
        Self::parse_response(url, resp).await
    }

    async fn parse_response<T: DeserializeOwned>(
        url: &str,
        resp: reqwest::Response,
    ) -> Result<T, PaymailError> {
        let status = resp.status();

        if status.as_u16() == 404 {
            return Err(PaymailError::NotFound(url.to_string()));
        }

        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(PaymailError::ServerError {
                status_code: status.as_u16(),
                message,
            });
        }

        let text = resp.text().await?;
        let parsed = serde_json::from_str(&text)?;
        Ok(parsed)
    }

    /// Build common headers from config.
    fn build_headers(config: &PaymailConfig) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(val) = HeaderValue::from_str(&config.user_agent) {
            headers.insert(USER_AGENT, val);
        }
        headers
    }
}
