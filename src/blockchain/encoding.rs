//! Type-2 (EIP-1559) transaction encoding for delegated execution.
//!
//! # Layout
//! ```text
//! 0x02 || rlp([chainId, nonce, maxPriorityFeePerGas, maxFeePerGas, gasLimit,
//!              to, value, data, accessList, v, r, s])
//! ```
//!
//! The gateway signs with the session key, so `v`, `r` and `s` are always
//! empty strings and the access list is always empty. Integers are minimal
//! big-endian and zero is the empty string, including nonce 0 and a zero
//! value.

use alloy::primitives::{Address, Bytes, U256};
use alloy_rlp::{BufMut, Decodable, Encodable, Header};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::blockchain::fees::FeeQuote;
use crate::blockchain::types::EncodingError;

/// EIP-2718 type byte for EIP-1559 transactions.
pub const EIP1559_TX_TYPE: u8 = 0x02;

/// Caller-supplied transaction parameters; absent fields are derived by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionIntent {
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub value: Option<U256>,
    #[serde(default)]
    pub data: Option<Bytes>,
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub gas_limit: Option<u64>,
    #[serde(default)]
    pub max_fee_per_gas: Option<u128>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<u128>,
}

impl TransactionIntent {
    /// Plain value transfer.
    pub fn transfer(to: Address, value: U256) -> Self {
        Self {
            to: Some(to),
            value: Some(value),
            ..Default::default()
        }
    }

    /// Fee pair supplied by the caller, if both halves are present.
    pub fn explicit_fees(&self) -> Option<Result<FeeQuote, EncodingError>> {
        match (self.max_fee_per_gas, self.max_priority_fee_per_gas) {
            (Some(max_fee), Some(priority_fee)) => Some(FeeQuote::new(max_fee, priority_fee)),
            _ => None,
        }
    }
}

/// The unsigned type-2 field tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl EncodedTransaction {
    fn value_bytes(&self) -> Vec<u8> {
        self.value.to_be_bytes_trimmed_vec()
    }

    fn fields_len(&self) -> usize {
        let empty: &[u8] = &[];
        let data: &[u8] = &self.data;
        self.chain_id.length()
            + self.nonce.length()
            + self.max_priority_fee_per_gas.length()
            + self.max_fee_per_gas.length()
            + self.gas_limit.length()
            + self.to.as_slice().length()
            + self.value_bytes().as_slice().length()
            + data.length()
            + Header { list: true, payload_length: 0 }.length()
            + 3 * empty.length()
    }

    /// `0x02 || rlp(fields)`.
    pub fn to_raw(&self) -> RawTransaction {
        let mut out = Vec::with_capacity(1 + self.length());
        out.push(EIP1559_TX_TYPE);
        self.encode(&mut out);
        RawTransaction(Bytes::from(out))
    }
}

impl Encodable for EncodedTransaction {
    fn encode(&self, out: &mut dyn BufMut) {
        let empty: &[u8] = &[];
        let data: &[u8] = &self.data;
        Header {
            list: true,
            payload_length: self.fields_len(),
        }
        .encode(out);
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.max_fee_per_gas.encode(out);
        self.gas_limit.encode(out);
        self.to.as_slice().encode(out);
        self.value_bytes().as_slice().encode(out);
        data.encode(out);
        // access list
        Header { list: true, payload_length: 0 }.encode(out);
        // v, r, s
        for _ in 0..3 {
            empty.encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.fields_len();
        Header {
            list: true,
            payload_length,
        }
        .length()
            + payload_length
    }
}

impl Decodable for EncodedTransaction {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let remaining = buf.len();

        let chain_id = u64::decode(buf)?;
        let nonce = u64::decode(buf)?;
        let max_priority_fee_per_gas = u128::decode(buf)?;
        let max_fee_per_gas = u128::decode(buf)?;
        let gas_limit = u64::decode(buf)?;
        let to = Address::try_from(Header::decode_bytes(buf, false)?)
            .map_err(|_| alloy_rlp::Error::Custom("to must be 20 bytes"))?;
        let value = U256::try_from_be_slice(Header::decode_bytes(buf, false)?)
            .ok_or(alloy_rlp::Error::Overflow)?;
        let data = Bytes::copy_from_slice(Header::decode_bytes(buf, false)?);

        let access_list = Header::decode(buf)?;
        if !access_list.list || access_list.payload_length != 0 {
            return Err(alloy_rlp::Error::Custom("access list must be empty"));
        }
        for _ in 0..3 {
            if !Header::decode_bytes(buf, false)?.is_empty() {
                return Err(alloy_rlp::Error::Custom("signature slots must be empty"));
            }
        }

        let consumed = remaining - buf.len();
        if consumed != header.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: header.payload_length,
                got: consumed,
            });
        }

        Ok(Self {
            chain_id,
            nonce,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            gas_limit,
            to,
            value,
            data,
        })
    }
}

/// Raw type-2 transaction bytes ready for the execute call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction(Bytes);

impl RawTransaction {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Standard-alphabet base64, the only payload form the gateway accepts.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl std::fmt::Display for RawTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Build the raw transaction for `intent` with the resolved chain parameters.
pub fn encode(
    intent: &TransactionIntent,
    chain_id: u64,
    nonce: u64,
    fees: FeeQuote,
    gas_limit: u64,
) -> Result<RawTransaction, EncodingError> {
    let to = intent.to.ok_or(EncodingError::MissingField("to"))?;

    let tx = EncodedTransaction {
        chain_id,
        nonce,
        max_priority_fee_per_gas: fees.max_priority_fee_per_gas(),
        max_fee_per_gas: fees.max_fee_per_gas(),
        gas_limit,
        to,
        value: intent.value.unwrap_or_default(),
        data: intent.data.clone().unwrap_or_default(),
    };

    let raw = tx.to_raw();
    if raw.as_bytes().len() != 1 + tx.length() {
        return Err(EncodingError::Rlp(format!(
            "encoded {} bytes, expected {}",
            raw.as_bytes().len(),
            1 + tx.length()
        )));
    }
    Ok(raw)
}

/// Parse raw type-2 bytes back into the field tuple.
pub fn decode(raw: &[u8]) -> Result<EncodedTransaction, EncodingError> {
    let (&tx_type, mut body) = raw
        .split_first()
        .ok_or_else(|| EncodingError::Rlp("empty input".to_string()))?;
    if tx_type != EIP1559_TX_TYPE {
        return Err(EncodingError::UnsupportedType(tx_type));
    }
    let tx = EncodedTransaction::decode(&mut body)?;
    if !body.is_empty() {
        return Err(EncodingError::Rlp(format!("{} trailing bytes", body.len())));
    }
    Ok(tx)
}
