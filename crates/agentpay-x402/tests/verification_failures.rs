use std::sync::Arc;

use alloy::primitives::{Address, FixedBytes, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;

use x402::eip712;
use x402::{
    ExactEvmFacilitator, ExactEvmPayload, ExactEvmSchemeClient, LedgerBackend, PaymentPayload,
    PaymentRequirement, SchemeClient, SchemeFacilitator, TransferWithAuthorization, USDC_BASE,
    X402_VERSION,
};

fn payee() -> Address {
    Address::repeat_byte(0x22)
}

fn requirement() -> PaymentRequirement {
    PaymentRequirement {
        scheme: "exact".to_string(),
        network: "eip155:8453".to_string(),
        pay_to: payee().to_string(),
        asset: USDC_BASE.to_string(),
        amount: "1000".to_string(),
        resource: "/weather".to_string(),
        description: Some("Weather data".to_string()),
        mime_type: Some("application/json".to_string()),
        max_timeout_seconds: 60,
        extra: Some(serde_json::json!({ "name": "USD Coin", "version": "2" })),
    }
}

fn facilitator() -> ExactEvmFacilitator<LedgerBackend> {
    ExactEvmFacilitator::new(Arc::new(LedgerBackend::new()))
}

async fn signed_payload() -> PaymentPayload {
    ExactEvmSchemeClient::new(PrivateKeySigner::random())
        .create_payment_payload(X402_VERSION, &requirement())
        .await
        .unwrap()
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Sign an authorization with an explicit validity window.
fn signed_with_window(valid_after: u64, valid_before: u64) -> PaymentPayload {
    let signer = PrivateKeySigner::random();
    let req = requirement();
    let nonce = eip712::random_nonce();
    let auth = TransferWithAuthorization {
        from: signer.address(),
        to: payee(),
        value: U256::from(1000u64),
        validAfter: U256::from(valid_after),
        validBefore: U256::from(valid_before),
        nonce,
    };
    let domain = eip712::domain_for_requirement(&req, &x402::ChainConfig::default()).unwrap();
    let sig = signer
        .sign_hash_sync(&eip712::signing_hash(&auth, &domain))
        .unwrap();
    ExactEvmPayload {
        from: signer.address(),
        to: payee(),
        value: "1000".to_string(),
        valid_after,
        valid_before,
        nonce,
        signature: eip712::encode_signature_hex(&sig),
    }
    .into_payload(X402_VERSION, "exact", "eip155:8453")
    .unwrap()
}

async fn reason(payload: &PaymentPayload, req: &PaymentRequirement) -> String {
    let resp = facilitator().verify(payload, req).await.unwrap();
    assert!(!resp.is_valid, "expected rejection");
    resp.invalid_reason.unwrap_or_default()
}

#[tokio::test]
async fn test_untouched_payload_verifies() {
    let resp = facilitator()
        .verify(&signed_payload().await, &requirement())
        .await
        .unwrap();
    assert!(resp.is_valid, "{:?}", resp.invalid_reason);
}

// -- Single-field mutations of the signed payload --

#[tokio::test]
async fn test_mutated_payload_fields_are_rejected() {
    let original = signed_payload().await;
    let valid_before = original.payload["validBefore"].as_u64().unwrap();
    let valid_after = original.payload["validAfter"].as_u64().unwrap();
    let mutations = vec![
        ("to", serde_json::json!(Address::repeat_byte(0x33))),
        ("from", serde_json::json!(Address::repeat_byte(0x44))),
        ("nonce", serde_json::json!(FixedBytes::<32>::new([0xff; 32]))),
        ("validBefore", serde_json::json!(valid_before - 1)),
        ("validAfter", serde_json::json!(valid_after + 1)),
    ];

    for (field, value) in mutations {
        let mut payload = original.clone();
        payload.payload[field] = value;
        let resp = facilitator().verify(&payload, &requirement()).await.unwrap();
        assert!(!resp.is_valid, "mutating {field} should invalidate");
    }
}

#[tokio::test]
async fn test_tampered_value_is_rejected() {
    let mut payload = signed_payload().await;
    payload.payload["value"] = serde_json::json!("1001");
    // Signature check runs before the amount comparison.
    assert_eq!(reason(&payload, &requirement()).await, "Invalid signature");
}

#[tokio::test]
async fn test_tampered_signature_is_rejected() {
    let mut payload = signed_payload().await;
    let sig = payload.payload["signature"].as_str().unwrap().to_string();
    let flipped = if sig.ends_with("1b") {
        format!("{}1c", &sig[..sig.len() - 2])
    } else {
        format!("{}1b", &sig[..sig.len() - 2])
    };
    payload.payload["signature"] = serde_json::json!(flipped);
    assert!(reason(&payload, &requirement())
        .await
        .starts_with("Invalid signature"));
}

#[tokio::test]
async fn test_garbage_signature_is_rejected() {
    let mut payload = signed_payload().await;
    payload.payload["signature"] = serde_json::json!("0xdead");
    assert!(reason(&payload, &requirement())
        .await
        .starts_with("Invalid signature"));
}

// -- Single-field mutations of the requirement --

#[tokio::test]
async fn test_requirement_mismatches_are_rejected() {
    let payload = signed_payload().await;

    let mut other_payee = requirement();
    other_payee.pay_to = Address::repeat_byte(0x55).to_string();
    assert_eq!(reason(&payload, &other_payee).await, "Recipient mismatch");

    let mut higher = requirement();
    higher.amount = "1001".to_string();
    assert_eq!(
        reason(&payload, &higher).await,
        "Payment amount below required"
    );

    let mut lower = requirement();
    lower.amount = "999".to_string();
    assert_eq!(
        reason(&payload, &lower).await,
        "Payment amount exceeds required"
    );

    let mut other_network = requirement();
    other_network.network = "eip155:84532".to_string();
    assert!(reason(&payload, &other_network).await.contains("mismatch"));

    // A different token changes the EIP-712 domain.
    let mut other_asset = requirement();
    other_asset.asset = Address::repeat_byte(0x66).to_string();
    assert!(reason(&payload, &other_asset)
        .await
        .starts_with("Invalid signature"));
}

#[tokio::test]
async fn test_wrong_version_is_rejected() {
    let mut payload = signed_payload().await;
    payload.x402_version = 1;
    assert!(reason(&payload, &requirement())
        .await
        .starts_with("Unsupported x402 version"));
}

// -- Time window --

#[tokio::test]
async fn test_not_yet_valid() {
    let t = now();
    let payload = signed_with_window(t + 30, t + 60);
    assert_eq!(
        reason(&payload, &requirement()).await,
        "Authorization not yet valid"
    );
}

#[tokio::test]
async fn test_expired() {
    let t = now();
    let payload = signed_with_window(t - 120, t - 61);
    assert_eq!(reason(&payload, &requirement()).await, "Authorization expired");
}

const FIXED_NOW: u64 = 1_700_000_000;

async fn reason_at_fixed_now(payload: &PaymentPayload) -> Option<String> {
    facilitator()
        .with_clock(|| Ok(FIXED_NOW))
        .verify(payload, &requirement())
        .await
        .unwrap()
        .invalid_reason
}

#[tokio::test]
async fn test_window_bounds_are_inclusive() {
    let t = FIXED_NOW;

    let starts_now = signed_with_window(t, t + 60);
    assert_eq!(reason_at_fixed_now(&starts_now).await, None);

    let ends_now = signed_with_window(t - 60, t);
    assert_eq!(reason_at_fixed_now(&ends_now).await, None);

    let ended_a_second_ago = signed_with_window(t - 61, t - 1);
    assert_eq!(
        reason_at_fixed_now(&ended_a_second_ago).await.as_deref(),
        Some("Authorization expired")
    );

    let starts_next_second = signed_with_window(t + 1, t + 61);
    assert_eq!(
        reason_at_fixed_now(&starts_next_second).await.as_deref(),
        Some("Authorization not yet valid")
    );
}

#[tokio::test]
async fn test_window_too_large() {
    let t = now();
    let payload = signed_with_window(t - 60, t + 3600);
    assert!(reason(&payload, &requirement())
        .await
        .starts_with("Validity window too large"));
}

// -- Settlement idempotence --

#[tokio::test]
async fn test_concurrent_settles_transfer_once() {
    let fac = Arc::new(facilitator());
    let payload = signed_payload().await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let fac = fac.clone();
            let payload = payload.clone();
            tokio::spawn(async move { fac.settle(&payload, &requirement()).await.unwrap() })
        })
        .collect();

    let mut receipts = Vec::new();
    for h in handles {
        receipts.push(h.await.unwrap());
    }

    assert_eq!(fac.backend().transfers().len(), 1);
    assert!(receipts.iter().all(|r| r.success));
    assert!(receipts
        .iter()
        .all(|r| r.transaction == receipts[0].transaction));
}

#[tokio::test]
async fn test_same_nonce_different_authorization_is_replay() {
    let fac = facilitator();
    let t = now();
    let signer = PrivateKeySigner::random();
    let req = requirement();
    let domain = eip712::domain_for_requirement(&req, &x402::ChainConfig::default()).unwrap();
    let nonce = eip712::random_nonce();

    let sign = |valid_before: u64| {
        let auth = TransferWithAuthorization {
            from: signer.address(),
            to: payee(),
            value: U256::from(1000u64),
            validAfter: U256::from(t - 10),
            validBefore: U256::from(valid_before),
            nonce,
        };
        let sig = signer
            .sign_hash_sync(&eip712::signing_hash(&auth, &domain))
            .unwrap();
        ExactEvmPayload {
            from: signer.address(),
            to: payee(),
            value: "1000".to_string(),
            valid_after: t - 10,
            valid_before,
            nonce,
            signature: eip712::encode_signature_hex(&sig),
        }
        .into_payload(X402_VERSION, "exact", "eip155:8453")
        .unwrap()
    };

    let first = fac.settle(&sign(t + 30), &req).await.unwrap();
    assert!(first.success);

    let second = fac.settle(&sign(t + 40), &req).await.unwrap();
    assert!(!second.success);
    assert_eq!(second.error_reason.as_deref(), Some("Nonce already used"));
    assert_eq!(fac.backend().transfers().len(), 1);
}
