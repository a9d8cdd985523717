//! Base64 JSON codec for the `PAYMENT-SIGNATURE` and `PAYMENT-RESPONSE` headers.

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::payment::PaymentPayload;
use crate::response::SettlementReceipt;
use crate::X402Error;

/// Largest header value accepted for decoding.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

fn encode<T: Serialize>(value: &T) -> Result<String, X402Error> {
    let json = serde_json::to_vec(value)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

fn decode<T: DeserializeOwned>(header: &str) -> Result<T, X402Error> {
    if header.len() > MAX_HEADER_BYTES {
        return Err(X402Error::MalformedPayment(format!(
            "header exceeds {MAX_HEADER_BYTES} bytes"
        )));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(header.trim())
        .map_err(|e| X402Error::MalformedPayment(format!("invalid base64: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| X402Error::MalformedPayment(format!("invalid JSON: {e}")))
}

pub fn encode_payment(payload: &PaymentPayload) -> Result<String, X402Error> {
    encode(payload)
}

pub fn decode_payment(header: &str) -> Result<PaymentPayload, X402Error> {
    decode(header)
}

pub fn encode_receipt(receipt: &SettlementReceipt) -> Result<String, X402Error> {
    encode(receipt)
}

pub fn decode_receipt(header: &str) -> Result<SettlementReceipt, X402Error> {
    decode(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_header_is_base64_json() {
        let payload = PaymentPayload {
            x402_version: 2,
            scheme: "exact".to_string(),
            network: "eip155:8453".to_string(),
            payload: serde_json::json!({ "from": "0x01" }),
        };
        let header = encode_payment(&payload).unwrap();
        let raw = base64::engine::general_purpose::STANDARD
            .decode(&header)
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["scheme"], "exact");
        assert_eq!(decode_payment(&header).unwrap(), payload);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_payment("%%%not-base64"),
            Err(X402Error::MalformedPayment(_))
        ));
        let not_json = base64::engine::general_purpose::STANDARD.encode("hello");
        assert!(matches!(
            decode_payment(&not_json),
            Err(X402Error::MalformedPayment(_))
        ));
        assert!(decode_payment(&"A".repeat(MAX_HEADER_BYTES + 4)).is_err());
    }
}
