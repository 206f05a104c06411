//! Requested outputs and draft configuration.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use spv_wallet_script::Script;

use crate::error::EngineError;
use crate::fee::{FeeUnit, MAX_SATOSHIS, MAX_SATOSHIS_PER_BYTE};
use crate::model::Outpoint;

/// MAP protocol prefix address.
pub const MAP_PREFIX: &str = "1PuQa7K62MiKCtssSLKy1kh56WWU7MtUR5";
/// MAP `SET` command.
pub const MAP_SET: &str = "SET";

/// An output requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputSpec {
    /// Pay an address, a paymail or a third-party handle.
    To {
        /// Address, paymail or handle.
        to: String,
        /// Amount to pay.
        satoshis: u64,
    },
    /// Pay a raw locking script given as hex.
    Script {
        /// Locking script hex.
        script: String,
        /// Amount to pay.
        satoshis: u64,
    },
    /// A zero-value data output.
    OpReturn {
        /// The data to carry.
        op_return: OpReturn,
    },
}

impl OutputSpec {
    /// Pay `satoshis` to an address, paymail or handle.
    pub fn to(to: impl Into<String>, satoshis: u64) -> Self {
        OutputSpec::To {
            to: to.into(),
            satoshis,
        }
    }

    /// Requested amount; zero for data outputs.
    pub fn satoshis(&self) -> u64 {
        match self {
            OutputSpec::To { satoshis, .. } | OutputSpec::Script { satoshis, .. } => *satoshis,
            OutputSpec::OpReturn { .. } => 0,
        }
    }
}

/// Data carried by an OP_RETURN output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpReturn {
    /// A complete script, as hex.
    Hex(String),
    /// Hex-encoded pushes.
    HexParts(Vec<String>),
    /// UTF-8 pushes.
    StringParts(Vec<String>),
    /// A MAP `SET` record.
    Map {
        /// Application name.
        app: String,
        /// Record type.
        #[serde(rename = "type")]
        kind: String,
        /// Further key/value pairs, in key order.
        #[serde(default)]
        keys: BTreeMap<String, String>,
    },
}

impl OpReturn {
    /// Build the locking script for this data.
    pub fn to_script(&self) -> Result<Script, EngineError> {
        let script = match self {
            OpReturn::Hex(hex_script) => {
                let script = Script::from_hex(hex_script)?;
                if !script.is_data() {
                    return Err(EngineError::InvalidInput(
                        "op_return hex is not a data script".to_string(),
                    ));
                }
                script
            }
            OpReturn::HexParts(parts) => {
                let decoded = parts
                    .iter()
                    .map(hex::decode)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| EngineError::InvalidInput(format!("op_return hex part: {e}")))?;
                Script::op_return(&decoded)?
            }
            OpReturn::StringParts(parts) => Script::op_return(parts)?,
            OpReturn::Map { app, kind, keys } => {
                let mut parts: Vec<&str> = vec![MAP_PREFIX, MAP_SET, "app", app.as_str(), "type", kind.as_str()];
                for (key, value) in keys {
                    parts.push(key);
                    parts.push(value);
                }
                Script::op_return(&parts)?
            }
        };
        Ok(script)
    }
}

fn default_change_count() -> u32 {
    1
}

fn default_change_minimum() -> u64 {
    1250
}

/// What a draft should pay and how it is funded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftConfig {
    /// Requested outputs, in order.
    pub outputs: Vec<OutputSpec>,
    /// Overrides the engine's fee rate.
    #[serde(default)]
    pub fee_unit: Option<FeeUnit>,
    /// Overrides the engine's draft expiry, in seconds. Must be non-zero.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Fund only from these outpoints.
    #[serde(default)]
    pub from_utxos: Vec<Outpoint>,
    /// Always spend these outpoints, in addition to whatever selection picks.
    #[serde(default)]
    pub include_utxos: Vec<Outpoint>,
    /// How many outputs the change may be spread over.
    #[serde(default = "default_change_count")]
    pub change_destinations_count: u32,
    /// Smallest change output when change is spread.
    #[serde(default = "default_change_minimum")]
    pub change_minimum_satoshis: u64,
}

impl Default for DraftConfig {
    fn default() -> Self {
        DraftConfig {
            outputs: Vec::new(),
            fee_unit: None,
            expires_in: None,
            from_utxos: Vec::new(),
            include_utxos: Vec::new(),
            change_destinations_count: default_change_count(),
            change_minimum_satoshis: default_change_minimum(),
        }
    }
}

impl DraftConfig {
    /// Default settings paying `outputs`.
    pub fn with_outputs(outputs: Vec<OutputSpec>) -> Self {
        DraftConfig {
            outputs,
            ..DraftConfig::default()
        }
    }

    /// Reject caller input errors before anything is resolved or reserved.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.outputs.is_empty() {
            return Err(EngineError::InvalidInput("no outputs".to_string()));
        }
        if self.expires_in == Some(0) {
            return Err(EngineError::InvalidInput(
                "expires_in must be non-zero".to_string(),
            ));
        }
        if self.fee_unit.is_some_and(|unit| !unit.is_valid()) {
            return Err(EngineError::InvalidInput(format!(
                "fee unit must have non-zero bytes and at most {MAX_SATOSHIS_PER_BYTE} sat/byte"
            )));
        }
        for (name, outpoints) in [("from_utxos", &self.from_utxos), ("include_utxos", &self.include_utxos)] {
            let mut seen = HashSet::with_capacity(outpoints.len());
            if let Some(repeated) = outpoints.iter().find(|o| !seen.insert(**o)) {
                return Err(EngineError::InvalidInput(format!(
                    "{name} lists {repeated} more than once"
                )));
            }
        }

        let mut total: u64 = 0;
        for (index, output) in self.outputs.iter().enumerate() {
            let satoshis = output.satoshis();
            if satoshis > MAX_SATOSHIS {
                return Err(EngineError::InvalidInput(format!(
                    "output {index}: {satoshis} exceeds {MAX_SATOSHIS} satoshis"
                )));
            }
            total = total
                .checked_add(satoshis)
                .filter(|t| *t <= MAX_SATOSHIS)
                .ok_or_else(|| {
                    EngineError::InvalidInput(format!("outputs exceed {MAX_SATOSHIS} satoshis in total"))
                })?;
            match output {
                OutputSpec::To { to, satoshis } => {
                    if to.trim().is_empty() {
                        return Err(EngineError::InvalidInput(format!(
                            "output {index}: empty destination"
                        )));
                    }
                    if *satoshis == 0 {
                        return Err(EngineError::InvalidInput(format!(
                            "output {index}: amount must be positive"
                        )));
                    }
                }
                OutputSpec::Script { script, satoshis } => {
                    let parsed = Script::from_hex(script)?;
                    if *satoshis == 0 && !parsed.is_data() {
                        return Err(EngineError::InvalidInput(format!(
                            "output {index}: amount must be positive"
                        )));
                    }
                }
                OutputSpec::OpReturn { .. } => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_op_return() {
        let op = OpReturn::Map {
            app: "tonicpow".to_string(),
            kind: "offer_click".to_string(),
            keys: BTreeMap::from([("offer_id".to_string(), "1".to_string())]),
        };
        let script = op.to_script().unwrap();
        assert!(script.is_data());
        let mut expected = vec![0x00, 0x6a, MAP_PREFIX.len() as u8];
        expected.extend_from_slice(MAP_PREFIX.as_bytes());
        expected.extend_from_slice(&[3]);
        expected.extend_from_slice(b"SET");
        assert!(script.as_bytes().starts_with(&expected));
        assert!(script.as_bytes().ends_with(b"\x08offer_id\x011"));
    }

    #[test]
    fn test_string_and_hex_parts_agree() {
        let from_strings = OpReturn::StringParts(vec!["hello".to_string()]).to_script().unwrap();
        let from_hex = OpReturn::HexParts(vec![hex::encode("hello")]).to_script().unwrap();
        assert_eq!(from_strings, from_hex);
        assert_eq!(from_strings.to_hex(), "006a0568656c6c6f");
        assert_eq!(
            OpReturn::Hex("006a0568656c6c6f".to_string()).to_script().unwrap(),
            from_strings
        );
    }

    #[test]
    fn test_hex_must_be_data_script() {
        let p2pkh = "76a914eb0bd5edba389198e73f8efabddfc61666969ff788ac".to_string();
        assert!(OpReturn::Hex(p2pkh).to_script().is_err());
    }

    #[test]
    fn test_validate_rejects_caller_errors() {
        assert!(DraftConfig::default().validate().is_err());
        assert!(DraftConfig::with_outputs(vec![OutputSpec::to("alice@example.com", 0)])
            .validate()
            .is_err());
        let mut config = DraftConfig::with_outputs(vec![OutputSpec::to("alice@example.com", 10)]);
        config.expires_in = Some(0);
        assert!(config.validate().is_err());
        config.expires_in = Some(60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_repeated_outpoints() {
        let outpoint = Outpoint::new(spv_wallet_primitives::chainhash::ChainHash::new([9; 32]), 0);
        let mut config = DraftConfig::with_outputs(vec![OutputSpec::to("alice@example.com", 10)]);
        config.include_utxos = vec![outpoint, outpoint];
        assert!(matches!(config.validate(), Err(EngineError::InvalidInput(_))));

        config.include_utxos = vec![outpoint];
        config.from_utxos = vec![outpoint, outpoint];
        assert!(matches!(config.validate(), Err(EngineError::InvalidInput(_))));

        config.from_utxos = vec![outpoint];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_amounts() {
        let half = u64::MAX / 2 + 1;
        let config = DraftConfig::with_outputs(vec![
            OutputSpec::to("alice@example.com", half),
            OutputSpec::to("bob@example.com", half),
        ]);
        assert!(matches!(config.validate(), Err(EngineError::InvalidInput(_))));

        let config = DraftConfig::with_outputs(vec![
            OutputSpec::to("alice@example.com", MAX_SATOSHIS),
            OutputSpec::to("bob@example.com", 1),
        ]);
        assert!(matches!(config.validate(), Err(EngineError::InvalidInput(_))));

        let mut config = DraftConfig::with_outputs(vec![OutputSpec::to("alice@example.com", 10)]);
        config.fee_unit = Some(FeeUnit::new(u64::MAX / 2, 1));
        assert!(matches!(config.validate(), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_config_from_json() {
        let config: DraftConfig = serde_json::from_str(
            r#"{"outputs": [
                {"kind": "to", "to": "alice@example.com", "satoshis": 1000},
                {"kind": "op_return", "op_return": {"string_parts": ["hi"]}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.outputs.len(), 2);
        assert_eq!(config.change_destinations_count, 1);
        assert_eq!(config.change_minimum_satoshis, 1250);
    }
}
