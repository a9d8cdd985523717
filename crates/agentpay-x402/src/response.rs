use serde::{Deserialize, Serialize};

/// Result of a facilitator `verify` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

impl VerifyResponse {
    pub fn valid(payer: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            invalid_reason: None,
            payer: Some(payer.into()),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            invalid_reason: Some(reason.into()),
            payer: None,
        }
    }

    pub fn with_payer(mut self, payer: impl Into<String>) -> Self {
        self.payer = Some(payer.into());
        self
    }
}

/// Result of a settle operation, returned to the client in the PAYMENT-RESPONSE header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// Transaction reference. `None` while pending or on failure.
    pub transaction: Option<String>,
    pub network: String,
    #[serde(default)]
    pub payer: Option<String>,
    #[serde(default)]
    pub payee: Option<String>,
}

impl SettlementReceipt {
    pub fn failure(network: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error_reason: Some(reason.into()),
            transaction: None,
            network: network.into(),
            payer: None,
            payee: None,
        }
    }

    pub fn with_parties(mut self, payer: Option<String>, payee: Option<String>) -> Self {
        self.payer = payer;
        self.payee = payee;
        self
    }
}

/// Body of a `settle/status` response. `receipt` is `None` when no completed
/// settlement of the authorization is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementStatus {
    #[serde(default)]
    pub receipt: Option<SettlementReceipt>,
}

/// One payment kind a facilitator can verify and settle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_receipt_serializes_null_transaction() {
        let receipt = SettlementReceipt::failure("eip155:8453", "indeterminate");
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["transaction"].is_null());
        assert_eq!(json["errorReason"], "indeterminate");
    }

    #[test]
    fn test_verify_response_from_minimal_json() {
        let parsed: VerifyResponse = serde_json::from_str(r#"{"isValid":true}"#).unwrap();
        assert!(parsed.is_valid);
        assert!(parsed.invalid_reason.is_none());
    }
}
