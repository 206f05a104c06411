#![deny(missing_docs)]

//! # spv-wallet-paymail
//!
//! Client side of the paymail protocol as used when paying someone:
//! address sanitation and third-party handle conversion, capability
//! discovery, basic address resolution, P2P payment destinations and
//! P2P transaction submission.
//!
//! # Example
//!
//! ```no_run
//! use spv_wallet_paymail::{PaymailClient, PaymailConfig, BRFC_P2P_PAYMENT_DESTINATION};
//!
//! # async fn run() -> Result<(), spv_wallet_paymail::PaymailError> {
//! let client = PaymailClient::new(PaymailConfig::default())?;
//! let caps = client.get_capabilities("moneybutton.com").await?;
//! let supports_p2p = caps.has(BRFC_P2P_PAYMENT_DESTINATION);
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod client;
pub mod error;
pub mod types;


pub use address::{convert_handle, sanitize_paymail, validate_paymail, SanitizedPaymail};
pub use client::PaymailClient;
pub use error::PaymailError;
pub use types::{
    Capabilities, P2PDestinationResponse, P2PMetadata, P2PTransaction, P2PTransactionResponse,
    PaymailConfig, PaymentOutput, PayloadFormat, ResolveAddressRequest, ResolveAddressResponse,
    BRFC_BASIC_ADDRESS_RESOLUTION, BRFC_BEEF_TRANSACTION, BRFC_P2P_PAYMENT_DESTINATION,
    BRFC_P2P_TRANSACTION,
};
