#![deny(missing_docs)]

//! # spv-wallet-arc
//!
//! ARC (Authoritative Response Component) HTTP client used by the wallet
//! engine to broadcast signed transactions and follow them until mined.
//!
//! Transactions are submitted in Extended Format when every input knows
//! its source output, and as raw bytes otherwise.
//!
//! # Example
//!
//! ```no_run
//! use spv_wallet_arc::{ArcClient, ArcConfig};
//!
//! let client = ArcClient::new(ArcConfig {
//!     base_url: "https://arc.taal.com/v1".to_string(),
//!     api_key: Some("my-key".to_string()),
//!     ..Default::default()
//! });
//! ```

pub mod client;
pub mod error;
pub mod types;


pub use client::{ArcClient, AsyncBroadcaster};
pub use error::ArcError;
pub use types::{ArcConfig, ArcResponse, ArcStatus, PayloadKind};
