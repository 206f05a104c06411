//! Draft transaction builder.
//!
//! Resolution happens first and without any lock held. Reservation and fee
//! computation then alternate until the reserved inputs cover the outputs
//! and the fee at the final size.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info};

use crate::error::EngineError;
use crate::fee::{
    self, output_size, transaction_size, FeeCalculation, FeeError, FeeRequest, FeeUnit, MAX_SATOSHIS,
};
use crate::model::{
    Account, DraftInput, DraftOutput, DraftStatus, DraftTransaction, Metadata, ScriptOutput,
};
use crate::outputs::DraftConfig;
use crate::reservation::{Reservation, ReservationGuard, ReservationManager, ReservationRequest};
use crate::resolver::{PaymailResolver, Sender};
use crate::store::Datastore;

/// Metadata key overriding the note sent to P2P receivers.
pub const METADATA_NOTE: &str = "note";

/// Engine-wide defaults applied to every draft.
#[derive(Debug, Clone, Copy)]
pub struct BuildSettings {
    /// Fee rate unless the draft overrides it.
    pub fee_unit: FeeUnit,
    /// Change below this is folded into the fee.
    pub dust_limit: u64,
    /// Draft lifetime unless the draft overrides it.
    pub draft_expiry_secs: u64,
    /// Cap on reserve/fee rounds.
    pub max_fee_rounds: u32,
}

/// Builds drafts for one engine.
pub struct DraftBuilder<'a> {
    store: &'a dyn Datastore,
    reservations: &'a ReservationManager,
    resolver: &'a PaymailResolver,
    settings: BuildSettings,
}

impl<'a> DraftBuilder<'a> {
    /// Builder over the engine's store, reservations and resolver.
    pub fn new(
        store: &'a dyn Datastore,
        reservations: &'a ReservationManager,
        resolver: &'a PaymailResolver,
        settings: BuildSettings,
    ) -> Self {
        DraftBuilder {
            store,
            reservations,
            resolver,
            settings,
        }
    }

    /// Build and persist a draft paying `config.outputs` from `account_id`.
    ///
    /// # Arguments
    /// * `account_id` - The paying account.
    /// * `config` - Outputs and funding options.
    /// * `metadata` - Stored with the draft and its transaction.
    /// * `now` - Creation time; the expiry is counted from it.
    ///
    /// # Returns
    /// The draft, holding its reservation until recorded, canceled or expired.
    pub async fn build_at(
        &self,
        account_id: &str,
        config: DraftConfig,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Result<DraftTransaction, EngineError> {
        config.validate()?;
        let account = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| EngineError::NotFound(format!("account {account_id}")))?;

        let sender = self.sender(&account, &metadata);
        let mut outputs = Vec::with_capacity(config.outputs.len() + 1);
        for spec in &config.outputs {
            outputs.push(self.resolver.resolve(spec, &sender).await?);
        }

        let draft_id = hex::encode(rand::random::<[u8; 32]>());
        let fee_unit = config.fee_unit.unwrap_or(self.settings.fee_unit);
        let expires_in = config.expires_in.unwrap_or(self.settings.draft_expiry_secs);
        let expires_at = now + Duration::seconds(i64::from(u32::try_from(expires_in).unwrap_or(u32::MAX)));

        let guard = ReservationGuard::new(self.reservations, account_id, &draft_id);
        let (reservation, calc) =
            self.fund(&account, &draft_id, &config, &outputs, fee_unit, expires_at, now)?;

        let total_output_satoshis = output_total(&outputs)?;
        for amount in &calc.change {
            outputs.push(DraftOutput {
                to: None,
                satoshis: *amount,
                scripts: vec![ScriptOutput::new(account.change_locking_script.clone(), *amount)],
                paymail_p4: None,
                op_return: None,
                use_for_change: true,
            });
        }

        let inputs: Vec<DraftInput> = reservation
            .utxos
            .iter()
            .map(|u| DraftInput {
                outpoint: u.outpoint,
                satoshis: u.satoshis,
                locking_script: u.locking_script.clone(),
            })
            .collect();

        let mut draft = DraftTransaction {
            id: draft_id.clone(),
            account_id: account_id.to_string(),
            config,
            fee_unit,
            outputs,
            inputs,
            fee: calc.fee,
            total_input_satoshis: reservation.total_satoshis(),
            total_output_satoshis,
            change_satoshis: calc.change_total(),
            estimated_size: calc.size,
            hex: String::new(),
            status: DraftStatus::Draft,
            metadata,
            created_at: now,
            expires_at,
        };
        let tx = draft.to_transaction();
        draft.hex = tx.to_hex();

        let paid = draft.total_output_satoshis + draft.change_satoshis + draft.fee;
        if draft.total_input_satoshis != paid || tx.total_output_satoshis() + draft.fee != paid {
            error!(
                draft_id = %draft.id,
                inputs = draft.total_input_satoshis,
                outputs = draft.total_output_satoshis,
                change = draft.change_satoshis,
                fee = draft.fee,
                "draft does not balance"
            );
            return Err(EngineError::InvariantViolation(format!(
                "draft {}: inputs {} != outputs + change + fee {}",
                draft.id, draft.total_input_satoshis, paid
            )));
        }

        self.store.put_draft(draft.clone())?;
        guard.keep();
        info!(
            draft_id = %draft.id,
            account_id,
            inputs = draft.inputs.len(),
            outputs = tx.outputs.len(),
            fee = draft.fee,
            change = draft.change_satoshis,
            "built draft transaction"
        );
        Ok(draft)
    }

    /// Reserve inputs and settle fee and change, growing the reservation
    /// when the inputs fall short at the final size.
    #[allow(clippy::too_many_arguments)]
    fn fund(
        &self,
        account: &Account,
        draft_id: &str,
        config: &DraftConfig,
        outputs: &[DraftOutput],
        fee_unit: FeeUnit,
        reserved_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(Reservation, FeeCalculation), EngineError> {
        let output_sizes: Vec<u64> = outputs
            .iter()
            .flat_map(|o| &o.scripts)
            .map(|s| output_size(s.script.len()))
            .collect();
        let output_total = output_total(outputs)?;
        let change_output_size = output_size(account.change_locking_script.len());

        // Outputs plus one change output; the reservation adds its inputs' cost.
        let mut with_change = output_sizes.clone();
        with_change.push(change_output_size);
        let mut minimum = output_total
            .checked_add(fee_unit.fee_for(transaction_size(&[], &with_change)))
            .filter(|m| *m <= MAX_SATOSHIS)
            .ok_or_else(|| EngineError::InvalidInput("outputs plus fee exceed the money supply".to_string()))?;

        let mut reserved = 0;
        for round in 0..self.settings.max_fee_rounds.max(1) {
            let reservation = self.reservations.reserve_at(
                &ReservationRequest {
                    account_id: &account.id,
                    draft_id,
                    minimum_satoshis: minimum,
                    fee_unit,
                    reserved_until,
                    from_utxos: &config.from_utxos,
                    include_utxos: &config.include_utxos,
                },
                now,
            )?;
            reserved = reservation.total_satoshis();
            let input_sizes: Vec<u64> = reservation
                .utxos
                .iter()
                .map(|u| fee::input_size(&u.locking_script))
                .collect();

            let request = FeeRequest {
                input_total: reservation.total_satoshis(),
                input_sizes: &input_sizes,
                output_total,
                output_sizes: &output_sizes,
                change_output_size,
                change_outputs: config.change_destinations_count,
                change_minimum: config.change_minimum_satoshis,
                fee_unit,
                dust_limit: self.settings.dust_limit,
                max_rounds: self.settings.max_fee_rounds,
            };
            match fee::calculate(&request) {
                Ok(calc) => return Ok((reservation, calc)),
                Err(FeeError::Shortfall { missing }) => {
                    debug!(draft_id, round, missing, "reservation short of fee, growing it");
                    minimum = minimum.saturating_add(missing);
                }
                Err(e) => return Err(EngineError::InvalidInput(e.to_string())),
            }
        }

        Err(EngineError::InsufficientFunds {
            required: minimum,
            available: reserved,
        })
    }

    fn sender(&self, account: &Account, metadata: &Metadata) -> Sender {
        let config = self.resolver.client().config();
        let note = metadata
            .get(METADATA_NOTE)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| config.note.clone());
        Sender {
            paymail: account
                .paymail
                .clone()
                .unwrap_or_else(|| config.sender_paymail.clone()),
            name: config.sender_name.clone(),
            note,
        }
    }
}

/// Sum of every resolved script output, bounded by the money supply.
fn output_total(outputs: &[DraftOutput]) -> Result<u64, EngineError> {
    outputs
        .iter()
        .flat_map(|o| &o.scripts)
        .try_fold(0u64, |total, s| total.checked_add(s.satoshis).filter(|t| *t <= MAX_SATOSHIS))
        .ok_or_else(|| EngineError::InvalidInput("outputs exceed the money supply".to_string()))
}
