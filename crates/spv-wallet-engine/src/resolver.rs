//! Output resolution: turns an [`OutputSpec`] into concrete script outputs,
//! negotiating with the receiver's paymail provider where needed.

use chrono::Utc;
use rand::seq::index::sample;
use rand::Rng;
use spv_wallet_paymail::{
    convert_handle, validate_paymail, Capabilities, P2PDestinationResponse, PaymailClient,
    PaymailError, PayloadFormat, ResolveAddressRequest, SanitizedPaymail,
    BRFC_BASIC_ADDRESS_RESOLUTION, BRFC_BEEF_TRANSACTION, BRFC_P2P_PAYMENT_DESTINATION,
    BRFC_P2P_TRANSACTION,
};
use spv_wallet_script::{Address, Script};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::model::{DraftOutput, PaymailP4, ResolutionType, ScriptOutput};
use crate::outputs::OutputSpec;

/// Amount requested from a P2P provider when the caller asked for nothing.
pub const DEFAULT_P2P_MINIMUM_SATOSHIS: u64 = 100;

/// Who is paying, as told to paymail providers.
#[derive(Debug, Clone, Default)]
pub struct Sender {
    /// Sender handle.
    pub paymail: String,
    /// Display name.
    pub name: String,
    /// Purpose of the payment.
    pub note: String,
}

/// Resolves destinations, calling out to paymail providers.
#[derive(Debug, Clone)]
pub struct PaymailResolver {
    client: PaymailClient,
    p2p_minimum_satoshis: u64,
}

impl PaymailResolver {
    /// Resolve through `client`, asking P2P providers for at least
    /// `p2p_minimum_satoshis` when the caller requested nothing.
    pub fn new(client: PaymailClient, p2p_minimum_satoshis: u64) -> Self {
        PaymailResolver {
            client,
            p2p_minimum_satoshis,
        }
    }

    /// The underlying paymail client.
    pub fn client(&self) -> &PaymailClient {
        &self.client
    }

    /// Resolve one requested output.
    pub async fn resolve(&self, spec: &OutputSpec, sender: &Sender) -> Result<DraftOutput, EngineError> {
        match spec {
            OutputSpec::To { to, satoshis } => self.resolve_destination(to, *satoshis, sender).await,
            OutputSpec::Script { script, satoshis } => {
                let script = Script::from_hex(script)?;
                Ok(DraftOutput {
                    to: None,
                    satoshis: *satoshis,
                    scripts: vec![ScriptOutput::new(script, *satoshis)],
                    paymail_p4: None,
                    op_return: None,
                    use_for_change: false,
                })
            }
            OutputSpec::OpReturn { op_return } => {
                let script = op_return.to_script()?;
                Ok(DraftOutput {
                    to: None,
                    satoshis: 0,
                    scripts: vec![ScriptOutput::new(script, 0)],
                    paymail_p4: None,
                    op_return: Some(op_return.clone()),
                    use_for_change: false,
                })
            }
        }
    }

    /// Resolve an address, paymail or third-party handle.
    pub async fn resolve_destination(
        &self,
        destination: &str,
        satoshis: u64,
        sender: &Sender,
    ) -> Result<DraftOutput, EngineError> {
        let converted = convert_handle(destination);
        if converted.contains('@') {
            return self.resolve_paymail(destination, &converted, satoshis, sender).await;
        }

        let address = Address::from_string(destination.trim())
            .map_err(|e| EngineError::InvalidInput(format!("destination {destination}: {e}")))?;
        let mut output = ScriptOutput::new(address.locking_script(), satoshis);
        output.address = Some(address.address_string.clone());
        Ok(DraftOutput {
            to: Some(destination.to_string()),
            satoshis,
            scripts: vec![output],
            paymail_p4: None,
            op_return: None,
            use_for_change: false,
        })
    }

    async fn resolve_paymail(
        &self,
        destination: &str,
        paymail: &str,
        satoshis: u64,
        sender: &Sender,
    ) -> Result<DraftOutput, EngineError> {
        let paymail = validate_paymail(paymail)
            .map_err(|e| EngineError::InvalidInput(format!("destination {destination}: {e}")))?;
        let failed = |source: PaymailError| EngineError::PaymailResolution {
            domain: paymail.domain.clone(),
            source,
        };

        let caps = self.client.get_capabilities(&paymail.domain).await.map_err(failed)?;

        let (scripts, p4) = if caps.has(BRFC_P2P_PAYMENT_DESTINATION)
            && (caps.has(BRFC_BEEF_TRANSACTION) || caps.has(BRFC_P2P_TRANSACTION))
        {
            self.negotiate_p2p(&caps, &paymail, satoshis, sender).await?
        } else if caps.has(BRFC_BASIC_ADDRESS_RESOLUTION) {
            self.resolve_basic(&caps, &paymail, satoshis, sender).await?
        } else {
            return Err(failed(PaymailError::MissingCapability(
                BRFC_BASIC_ADDRESS_RESOLUTION.to_string(),
            )));
        };

        let total = scripts.iter().map(|s| s.satoshis).sum();
        Ok(DraftOutput {
            to: Some(destination.to_string()),
            satoshis: total,
            scripts,
            paymail_p4: Some(p4),
            op_return: None,
            use_for_change: false,
        })
    }

    async fn negotiate_p2p(
        &self,
        caps: &Capabilities,
        paymail: &SanitizedPaymail,
        satoshis: u64,
        sender: &Sender,
    ) -> Result<(Vec<ScriptOutput>, PaymailP4), EngineError> {
        let failed = |source: PaymailError| EngineError::PaymailResolution {
            domain: paymail.domain.clone(),
            source,
        };

        let substituted = satoshis == 0;
        let amount = if substituted {
            warn!(
                paymail = %paymail.address,
                minimum = self.p2p_minimum_satoshis,
                "non-positive P2P amount, requesting the minimum instead"
            );
            self.p2p_minimum_satoshis
        } else {
            satoshis
        };

        let destination = self
            .client
            .get_p2p_payment_destination(caps, paymail, amount)
            .await
            .map_err(failed)?;
        let scripts = p2p_outputs(&destination, amount, &mut rand::thread_rng()).map_err(failed)?;

        let format = if caps.has(BRFC_BEEF_TRANSACTION) {
            PayloadFormat::Beef
        } else {
            PayloadFormat::Basic
        };
        let receive_brfc = match format {
            PayloadFormat::Beef => BRFC_BEEF_TRANSACTION,
            PayloadFormat::Basic => BRFC_P2P_TRANSACTION,
        };

        let p4 = PaymailP4 {
            alias: paymail.alias.clone(),
            domain: paymail.domain.clone(),
            from_paymail: sender.paymail.clone(),
            note: sender.note.clone(),
            destination_endpoint: self
                .client
                .capability_url(caps, BRFC_P2P_PAYMENT_DESTINATION, paymail)
                .map_err(failed)?,
            receive_endpoint: self
                .client
                .capability_url(caps, receive_brfc, paymail)
                .map_err(failed)?,
            reference_id: destination.reference.clone(),
            format,
            resolution_type: ResolutionType::P2p,
            amount_substituted: substituted,
        };
        debug!(
            paymail = %paymail.address,
            outputs = scripts.len(),
            reference = %p4.reference_id,
            ?format,
            "negotiated P2P destination"
        );
        Ok((scripts, p4))
    }

    async fn resolve_basic(
        &self,
        caps: &Capabilities,
        paymail: &SanitizedPaymail,
        satoshis: u64,
        sender: &Sender,
    ) -> Result<(Vec<ScriptOutput>, PaymailP4), EngineError> {
        let failed = |source: PaymailError| EngineError::PaymailResolution {
            domain: paymail.domain.clone(),
            source,
        };

        let request = ResolveAddressRequest {
            sender_handle: sender.paymail.clone(),
            dt: Utc::now().to_rfc3339(),
            amount: Some(satoshis),
            purpose: sender.note.clone(),
            sender_name: sender.name.clone(),
        };
        let script_hex = self
            .client
            .resolve_address(caps, paymail, &request)
            .await
            .map_err(failed)?;
        let script = Script::from_hex(&script_hex)
            .map_err(|e| failed(PaymailError::InvalidResponse(format!("output script: {e}"))))?;

        let p4 = PaymailP4 {
            alias: paymail.alias.clone(),
            domain: paymail.domain.clone(),
            from_paymail: sender.paymail.clone(),
            note: sender.note.clone(),
            destination_endpoint: String::new(),
            receive_endpoint: String::new(),
            reference_id: String::new(),
            format: PayloadFormat::Basic,
            resolution_type: ResolutionType::Basic,
            amount_substituted: false,
        };
        Ok((vec![ScriptOutput::new(script, satoshis)], p4))
    }
}

/// Turn a P2P destination response into script outputs carrying `total`.
///
/// With several outputs the amount is split at random so the parts do not
/// reveal the payment size.
pub fn p2p_outputs<R: Rng + ?Sized>(
    destination: &P2PDestinationResponse,
    total: u64,
    rng: &mut R,
) -> Result<Vec<ScriptOutput>, PaymailError> {
    let amounts = random_split(total, destination.outputs.len(), rng).ok_or_else(|| {
        PaymailError::InvalidResponse(format!(
            "cannot split {total} satoshis across {} outputs",
            destination.outputs.len()
        ))
    })?;

    destination
        .outputs
        .iter()
        .zip(amounts)
        .map(|(output, satoshis)| {
            let script = Script::from_hex(&output.script).map_err(|e| {
                PaymailError::InvalidResponse(format!("destination script: {e}"))
            })?;
            let mut resolved = ScriptOutput::new(script, satoshis);
            resolved.address = output.address.clone();
            Ok(resolved)
        })
        .collect()
}

/// Split `total` into `parts` positive amounts at random cut points.
///
/// `None` when `parts` is zero or larger than `total`.
pub fn random_split<R: Rng + ?Sized>(total: u64, parts: usize, rng: &mut R) -> Option<Vec<u64>> {
    if parts == 0 || (parts as u64) > total {
        return None;
    }
    if parts == 1 {
        return Some(vec![total]);
    }

    // Distinct cut points in 1..total.
    let mut cuts: Vec<u64> = sample(rng, (total - 1) as usize, parts - 1)
        .into_iter()
        .map(|i| i as u64 + 1)
        .collect();
    cuts.sort_unstable();

    let mut amounts = Vec::with_capacity(parts);
    let mut previous = 0;
    for cut in cuts {
        amounts.push(cut - previous);
        previous = cut;
    }
    amounts.push(total - previous);
    Some(amounts)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use spv_wallet_paymail::PaymentOutput;

    use super::*;

    const SCRIPT: &str = "76a914eb0bd5edba389198e73f8efabddfc61666969ff788ac";

    #[test]
    fn test_random_split_preserves_sum() {
        let mut rng = StdRng::seed_from_u64(7);
        for parts in 1..6 {
            let amounts = random_split(1_000, parts, &mut rng).unwrap();
            assert_eq!(amounts.len(), parts);
            assert_eq!(amounts.iter().sum::<u64>(), 1_000);
            assert!(amounts.iter().all(|a| *a > 0));
        }
        assert_eq!(random_split(3, 3, &mut rng), Some(vec![1, 1, 1]));
        assert_eq!(random_split(2, 3, &mut rng), None);
        assert_eq!(random_split(2, 0, &mut rng), None);
    }

    #[test]
    fn test_p2p_outputs() {
        let destination = P2PDestinationResponse {
            outputs: vec![
                PaymentOutput {
                    address: None,
                    satoshis: 0,
                    script: SCRIPT.to_string(),
                },
                PaymentOutput {
                    address: Some("1NRoySJ9Lvby6DuE2UQYnyT67AASwNZxGb".to_string()),
                    satoshis: 0,
                    script: SCRIPT.to_string(),
                },
            ],
            reference: "r".to_string(),
        };
        let mut rng = StdRng::seed_from_u64(1);
        let outputs = p2p_outputs(&destination, 500, &mut rng).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs.iter().map(|o| o.satoshis).sum::<u64>(), 500);
        assert!(outputs[1].address.is_some());
    }

    #[tokio::test]
    async fn test_resolve_plain_address() {
        let resolver = PaymailResolver::new(
            PaymailClient::new(Default::default()).unwrap(),
            DEFAULT_P2P_MINIMUM_SATOSHIS,
        );
        let output = resolver
            .resolve_destination("1E7ucTTWRTahCyViPhxSMor2pj4VGQdFMr", 1_000, &Sender::default())
            .await
            .unwrap();
        assert_eq!(output.scripts.len(), 1);
        assert!(output.scripts[0].script.is_p2pkh());
        assert!(output.paymail_p4.is_none());

        let err = resolver
            .resolve_destination("not-an-address", 1_000, &Sender::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
}
