use rust_decimal::Decimal;

use crate::blockchain::filter_builder::TRANSFER_EVENT_SIGNATURE;
use crate::error::ProcessingError;
use crate::models::{normalize_address, Address, RawLog};

/// A `Transfer` log decoded into typed fields
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTransfer {
    pub from: Address,
    pub to: Address,
    /// Raw integer amount in the token's smallest unit
    pub raw_amount: u128,
    /// Amount in whole token units
    pub amount: Decimal,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u32,
}

/// Decodes `Transfer` logs emitted by one token contract
pub struct TransferDecoder {
    contract: Address,
    decimals: u32,
}

impl TransferDecoder {
    pub fn new(contract: Address, decimals: u32) -> Self {
        Self { contract, decimals }
    }

    pub fn decode(&self, log: &RawLog) -> Result<DecodedTransfer, ProcessingError> {
        if normalize_address(&log.address) != normalize_address(self.contract.as_str()) {
            return Err(ProcessingError::LogParsing(format!(
                "log emitted by {} instead of {}",
                log.address, self.contract
            )));
        }

        let signature = log
            .topics
            .first()
            .ok_or_else(|| ProcessingError::LogParsing("log has no topics".to_string()))?;
        if normalize_address(signature) != normalize_address(TRANSFER_EVENT_SIGNATURE) {
            return Err(ProcessingError::EventSignature {
                expected: TRANSFER_EVENT_SIGNATURE.to_string(),
                got: signature.clone(),
            });
        }

        // ERC-20 Transfer has 3 topics: [signature, from, to]; ERC-721 adds a 4th
        if log.topics.len() != 3 {
            return Err(ProcessingError::TopicCount {
                expected: 3,
                got: log.topics.len(),
            });
        }

        let from = Address::from_topic(&log.topics[1])
            .map_err(|e| ProcessingError::LogParsing(format!("from topic: {}", e)))?;
        let to = Address::from_topic(&log.topics[2])
            .map_err(|e| ProcessingError::LogParsing(format!("to topic: {}", e)))?;

        let raw_amount = extract_amount_from_data(&log.data)?;
        let amount = format_units(raw_amount, self.decimals)?;

        Ok(DecodedTransfer {
            from,
            to,
            raw_amount,
            amount,
            tx_hash: log.transaction_hash.clone(),
            block_number: log.block_number,
            log_index: log.log_index,
        })
    }
}

/// Largest mantissa a `Decimal` can hold (2^96 - 1)
const MAX_DECIMAL_MANTISSA: u128 = 79_228_162_514_264_337_593_543_950_335;

/// Convert an integer amount in the smallest unit into whole units.
///
/// Amounts wider than a `Decimal` mantissa lose their least significant
/// fractional digits; at least 28 significant digits are kept.
pub fn format_units(raw: u128, decimals: u32) -> Result<Decimal, ProcessingError> {
    let mut mantissa = raw;
    let mut scale = decimals;
    while mantissa > MAX_DECIMAL_MANTISSA && scale > 0 {
        mantissa /= 10;
        scale -= 1;
    }
    if mantissa > MAX_DECIMAL_MANTISSA {
        return Err(ProcessingError::AmountOverflow(format!("{} with {} decimals", raw, decimals)));
    }

    Decimal::try_from_i128_with_scale(mantissa as i128, scale)
        .map(|amount| amount.normalize())
        .map_err(|_| ProcessingError::AmountOverflow(format!("{} with {} decimals", raw, decimals)))
}

/// Extract the uint256 amount from the data field
fn extract_amount_from_data(data: &str) -> Result<u128, ProcessingError> {
    let normalized = normalize_address(data);

    if !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProcessingError::AmountParsing(format!("non-hex data: {}", data)));
    }
    if normalized.len() != 64 {
        return Err(ProcessingError::AmountParsing(format!(
            "data should be 64 hex characters, got {}",
            normalized.len()
        )));
    }

    let (high, low) = normalized.split_at(32);
    if high.chars().any(|c| c != '0') {
        return Err(ProcessingError::AmountOverflow(format!("0x{}", normalized)));
    }

    u128::from_str_radix(low, 16)
        .map_err(|e| ProcessingError::AmountParsing(format!("Failed to parse amount: {}", e)))
}
