use std::sync::Arc;
use std::thread;

use alloy::primitives::{Address, FixedBytes, B256};
use x402::nonce_store::{InMemoryNonceStore, NonceKey, NonceStore, SqliteNonceStore};

fn key(i: u64) -> NonceKey {
    let mut bytes = [0u8; 32];
    bytes[0..8].copy_from_slice(&i.to_be_bytes());
    NonceKey {
        payer: Address::repeat_byte(0x11),
        network: "eip155:8453".to_string(),
        nonce: FixedBytes::new(bytes),
    }
}

#[test]
fn test_purge_while_claiming() {
    let store = Arc::new(InMemoryNonceStore::new());
    let purger = store.clone();

    let t1 = thread::spawn(move || {
        for _ in 0..100 {
            purger.purge_expired(0);
        }
    });
    let claimer = store.clone();
    let t2 = thread::spawn(move || {
        for i in 0..1000u64 {
            claimer.try_claim(&key(i), B256::ZERO);
        }
    });

    t1.join().unwrap();
    t2.join().unwrap();
}

fn exactly_one_claim_wins(store: Arc<dyn NonceStore>) {
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || store.try_claim(&key(42), B256::repeat_byte(0x01)))
        })
        .collect();
    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 1);
}

#[test]
fn test_in_memory_single_winner() {
    exactly_one_claim_wins(Arc::new(InMemoryNonceStore::new()));
}

#[test]
fn test_sqlite_single_winner() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nonces.db");
    exactly_one_claim_wins(Arc::new(
        SqliteNonceStore::open(path.to_str().unwrap()).unwrap(),
    ));
}
