//! Fee and change arithmetic.
//!
//! Sizes are estimates of the *signed* transaction: inputs are costed with
//! the unlocking script they will carry once signed, outputs with their
//! exact serialized size.

use serde::{Deserialize, Serialize};
use spv_wallet_primitives::util::VarInt;
use spv_wallet_script::Script;

/// Version (4) plus lock time (4).
pub const TX_FIXED_SIZE: u64 = 8;
/// Outpoint (36), script length (1), signature + compressed key push (106), sequence (4), rounded up.
pub const P2PKH_INPUT_SIZE: u64 = 148;
/// Conservative estimate for inputs whose unlocking script is unknown.
pub const UNKNOWN_INPUT_SIZE: u64 = 500;
/// Serialized size of a P2PKH output.
pub const P2PKH_OUTPUT_SIZE: u64 = 34;
/// Total supply in satoshis; no amount or sum of amounts may exceed it.
pub const MAX_SATOSHIS: u64 = 21_000_000 * 100_000_000;
/// Highest accepted fee rate, in satoshis per byte.
pub const MAX_SATOSHIS_PER_BYTE: u64 = 100_000;

/// A fee rate: `satoshis` per `bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeUnit {
    /// Satoshis charged per `bytes`.
    pub satoshis: u64,
    /// Size the rate applies to; must be non-zero.
    pub bytes: u64,
}

impl Default for FeeUnit {
    fn default() -> Self {
        FeeUnit {
            satoshis: 1,
            bytes: 1,
        }
    }
}

impl FeeUnit {
    /// `satoshis` per `bytes`.
    pub fn new(satoshis: u64, bytes: u64) -> Self {
        FeeUnit { satoshis, bytes }
    }

    /// Non-zero byte count and a rate no higher than [`MAX_SATOSHIS_PER_BYTE`].
    pub fn is_valid(&self) -> bool {
        self.bytes > 0
            && u128::from(self.satoshis) <= u128::from(self.bytes) * u128::from(MAX_SATOSHIS_PER_BYTE)
    }

    /// Fee for `size` bytes, rounded up. Saturates at `u64::MAX`.
    pub fn fee_for(&self, size: u64) -> u64 {
        if self.bytes == 0 {
            return 0;
        }
        let fee = (u128::from(size) * u128::from(self.satoshis)).div_ceil(u128::from(self.bytes));
        u64::try_from(fee).unwrap_or(u64::MAX)
    }
}

/// Estimated signed size of an input spending `locking_script`.
pub fn input_size(locking_script: &Script) -> u64 {
    if locking_script.is_p2pkh() {
        P2PKH_INPUT_SIZE
    } else {
        UNKNOWN_INPUT_SIZE
    }
}

/// Serialized size of an output carrying a script of `script_len` bytes.
pub fn output_size(script_len: usize) -> u64 {
    8 + VarInt(script_len as u64).length() as u64 + script_len as u64
}

/// Size of a transaction with the given per-input and per-output sizes.
pub fn transaction_size(input_sizes: &[u64], output_sizes: &[u64]) -> u64 {
    TX_FIXED_SIZE
        + VarInt(input_sizes.len() as u64).length() as u64
        + input_sizes.iter().sum::<u64>()
        + VarInt(output_sizes.len() as u64).length() as u64
        + output_sizes.iter().sum::<u64>()
}

/// Inputs to a fee/change computation.
#[derive(Debug, Clone)]
pub struct FeeRequest<'a> {
    /// Satoshis held by the inputs.
    pub input_total: u64,
    /// Estimated signed size of each input.
    pub input_sizes: &'a [u64],
    /// Satoshis paid to the requested outputs.
    pub output_total: u64,
    /// Serialized size of each requested output.
    pub output_sizes: &'a [u64],
    /// Size of one change output.
    pub change_output_size: u64,
    /// Wanted number of change outputs; at least one is assumed.
    pub change_outputs: u32,
    /// Each change output must be at least this large to split change.
    pub change_minimum: u64,
    /// Rate the fee is charged at.
    pub fee_unit: FeeUnit,
    /// Change below this is folded into the fee.
    pub dust_limit: u64,
    /// Cap on recomputation rounds.
    pub max_rounds: u32,
}

/// Result of a successful fee/change computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeCalculation {
    /// Fee paid to miners.
    pub fee: u64,
    /// One amount per change output, empty when change was folded.
    pub change: Vec<u64>,
    /// Estimated signed size the fee was charged on.
    pub size: u64,
}

impl FeeCalculation {
    /// Sum of all change outputs.
    pub fn change_total(&self) -> u64 {
        self.change.iter().sum()
    }
}

/// Why no fee/change split exists for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FeeError {
    /// There is nothing to pay.
    #[error("transaction has no outputs")]
    NoOutputs,
    /// The inputs do not cover the outputs plus the fee without change.
    #[error("inputs are short by {missing} satoshis")]
    Shortfall {
        /// Satoshis still needed.
        missing: u64,
    },
    /// Zero bytes, or a rate above the accepted maximum.
    #[error("fee rate must cover a non-zero number of bytes and stay within {MAX_SATOSHIS_PER_BYTE} sat/byte")]
    InvalidFeeUnit,
    /// Outputs plus fee exceed the representable amount.
    #[error("outputs plus fee exceed {MAX_SATOSHIS} satoshis")]
    AmountOverflow,
}

/// Compute fee and change so that `inputs = outputs + change + fee` exactly.
///
/// Termination: each round either returns or lowers the number of change
/// outputs, which starts at `change_outputs` and stops at one. When even a
/// single change output does not pay for its own bytes, or would be dust,
/// the remainder goes to the fee. `max_rounds` caps the loop regardless.
pub fn calculate(req: &FeeRequest<'_>) -> Result<FeeCalculation, FeeError> {
    if req.output_sizes.is_empty() {
        return Err(FeeError::NoOutputs);
    }
    if !req.fee_unit.is_valid() {
        return Err(FeeError::InvalidFeeUnit);
    }

    let base_size = transaction_size(req.input_sizes, req.output_sizes);
    let base = req.fee_unit.fee_for(base_size);
    let needed = req
        .output_total
        .checked_add(base)
        .filter(|n| *n <= MAX_SATOSHIS)
        .ok_or(FeeError::AmountOverflow)?;
    if req.input_total < needed {
        return Err(FeeError::Shortfall {
            missing: needed - req.input_total,
        });
    }

    let folded = FeeCalculation {
        fee: req.input_total - req.output_total,
        change: Vec::new(),
        size: base_size,
    };

    let mut count = req.change_outputs.max(1);
    for _ in 0..req.max_rounds.max(1) {
        let remainder = req.input_total - needed;
        if remainder < req.dust_limit.max(1) {
            return Ok(folded);
        }

        let mut sizes = req.output_sizes.to_vec();
        sizes.extend(std::iter::repeat(req.change_output_size).take(count as usize));
        let size = transaction_size(req.input_sizes, &sizes);
        let fee = req.fee_unit.fee_for(size);
        let paid = req.output_total.saturating_add(fee);
        let available = req.input_total.saturating_sub(paid);

        if req.input_total < paid || available < req.dust_limit.max(1).saturating_mul(u64::from(count)) {
            if count > 1 {
                count = 1;
                continue;
            }
            return Ok(folded);
        }

        if count > 1 && available < req.change_minimum.saturating_mul(u64::from(count)) {
            count = u32::try_from(available / req.change_minimum.max(1))
                .unwrap_or(1)
                .clamp(1, count - 1);
            continue;
        }

        return Ok(FeeCalculation {
            fee,
            change: split_evenly(available, count),
            size,
        });
    }
    Ok(folded)
}

/// Split `total` into `parts` amounts differing by at most one satoshi.
pub fn split_evenly(total: u64, parts: u32) -> Vec<u64> {
    let parts = u64::from(parts.max(1));
    let share = total / parts;
    let extra = total % parts;
    (0..parts).map(|i| share + u64::from(i < extra)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(input_total: u64, inputs: &'a [u64], output_total: u64, outputs: &'a [u64]) -> FeeRequest<'a> {
        FeeRequest {
            input_total,
            input_sizes: inputs,
            output_total,
            output_sizes: outputs,
            change_output_size: P2PKH_OUTPUT_SIZE,
            change_outputs: 1,
            change_minimum: 1250,
            fee_unit: FeeUnit::default(),
            dust_limit: 1,
            max_rounds: 8,
        }
    }

    #[test]
    fn test_sizes() {
        assert_eq!(output_size(25), P2PKH_OUTPUT_SIZE);
        assert_eq!(transaction_size(&[148], &[34, 34]), 226);
        assert_eq!(input_size(&Script::from_hex("76a914eb0bd5edba389198e73f8efabddfc61666969ff788ac").unwrap()), 148);
        assert_eq!(input_size(&Script::from_bytes(&[0x51])), UNKNOWN_INPUT_SIZE);
    }

    #[test]
    fn test_fee_unit_rounds_up() {
        assert_eq!(FeeUnit::new(1, 1).fee_for(226), 226);
        assert_eq!(FeeUnit::new(1, 1000).fee_for(226), 1);
        assert_eq!(FeeUnit::new(50, 1000).fee_for(226), 12);
        assert_eq!(FeeUnit::new(1, 0).fee_for(226), 0);
    }

    #[test]
    fn test_extreme_fee_rates() {
        assert_eq!(FeeUnit::new(u64::MAX / 2, 1).fee_for(226), u64::MAX);
        assert!(!FeeUnit::new(u64::MAX / 2, 1).is_valid());
        assert!(!FeeUnit::new(1, 0).is_valid());
        assert!(FeeUnit::new(MAX_SATOSHIS_PER_BYTE, 1).is_valid());
        assert!(!FeeUnit::new(MAX_SATOSHIS_PER_BYTE + 1, 1).is_valid());
    }

    #[test]
    fn test_oversized_outputs_overflow() {
        let err = calculate(&request(u64::MAX, &[148], u64::MAX - 10, &[34])).unwrap_err();
        assert_eq!(err, FeeError::AmountOverflow);
    }

    #[test]
    fn test_single_payment_with_change() {
        let calc = calculate(&request(10_000, &[148], 1_000, &[34])).unwrap();
        assert_eq!(calc.fee, 226);
        assert_eq!(calc.change, vec![8_774]);
        assert_eq!(calc.size, 226);
    }

    #[test]
    fn test_change_that_cannot_pay_for_itself_is_folded() {
        // Base size 192 leaves 20 sats; a change output would cost 34.
        let calc = calculate(&request(1_212, &[148], 1_000, &[34])).unwrap();
        assert!(calc.change.is_empty());
        assert_eq!(calc.fee, 212);
    }

    #[test]
    fn test_dust_change_is_folded() {
        let mut req = request(1_300, &[148], 1_000, &[34]);
        req.dust_limit = 100;
        let calc = calculate(&req).unwrap();
        assert!(calc.change.is_empty());
        assert_eq!(calc.fee, 300);
    }

    #[test]
    fn test_shortfall() {
        let err = calculate(&request(1_000, &[148], 1_000, &[34])).unwrap_err();
        assert_eq!(err, FeeError::Shortfall { missing: 192 });
    }

    #[test]
    fn test_no_outputs() {
        assert_eq!(
            calculate(&request(1_000, &[148], 0, &[])).unwrap_err(),
            FeeError::NoOutputs
        );
    }

    #[test]
    fn test_change_split_across_outputs() {
        let mut req = request(10_000, &[148], 1_000, &[34]);
        req.change_outputs = 3;
        let calc = calculate(&req).unwrap();
        assert_eq!(calc.change.len(), 3);
        assert_eq!(calc.fee, transaction_size(&[148], &[34; 4]));
        assert_eq!(calc.fee + calc.change_total() + 1_000, 10_000);
    }

    #[test]
    fn test_change_split_reduced_below_minimum() {
        // 2_000 change cannot give three outputs 1_250 each; one fits.
        let mut req = request(3_300, &[148], 1_000, &[34]);
        req.change_outputs = 3;
        let calc = calculate(&req).unwrap();
        assert_eq!(calc.change.len(), 1);
        assert_eq!(calc.fee + calc.change_total() + 1_000, 3_300);
    }

    #[test]
    fn test_split_evenly() {
        assert_eq!(split_evenly(10, 3), vec![4, 3, 3]);
        assert_eq!(split_evenly(9, 1), vec![9]);
    }
}
