//! Nonce and settlement records for exactly-once settlement.
//!
//! A record is keyed by `(payer, network, nonce)` and remembers the fingerprint of
//! the authorization that claimed it plus the receipt once settlement finished, so a
//! repeated `settle` of the same authorization returns the same receipt.

use std::sync::Mutex;
use std::time::Instant;

use alloy::primitives::{Address, FixedBytes, B256};
use dashmap::DashMap;

use crate::response::SettlementReceipt;

/// Replay-protection scope of a nonce.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonceKey {
    pub payer: Address,
    pub network: String,
    pub nonce: FixedBytes<32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonceState {
    /// Claimed; the transfer was started but its outcome is not recorded.
    Pending,
    Settled(SettlementReceipt),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceRecord {
    /// Hash of the authorization that claimed the nonce.
    pub fingerprint: B256,
    pub state: NonceState,
}

/// Trait for nonce storage backends.
///
/// Implementations must be thread-safe (`Send + Sync`).
pub trait NonceStore: Send + Sync {
    fn get(&self, key: &NonceKey) -> Option<NonceRecord>;

    /// Atomically claim an unused nonce (state `Pending`).
    /// Returns `false` if the nonce was already claimed.
    fn try_claim(&self, key: &NonceKey, fingerprint: B256) -> bool;

    /// Record the final receipt of a claimed nonce.
    fn complete(&self, key: &NonceKey, receipt: &SettlementReceipt);

    /// Purge records older than `max_age_secs`. Returns number purged.
    fn purge_expired(&self, max_age_secs: u64) -> usize;
}

/// In-memory nonce store backed by DashMap. Fast but lost on restart.
pub struct InMemoryNonceStore {
    records: DashMap<NonceKey, (NonceRecord, Instant)>,
}

impl InMemoryNonceStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryNonceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceStore for InMemoryNonceStore {
    fn get(&self, key: &NonceKey) -> Option<NonceRecord> {
        self.records.get(key).map(|entry| entry.0.clone())
    }

    fn try_claim(&self, key: &NonceKey, fingerprint: B256) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.records.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert((
                    NonceRecord {
                        fingerprint,
                        state: NonceState::Pending,
                    },
                    Instant::now(),
                ));
                true
            }
        }
    }

    fn complete(&self, key: &NonceKey, receipt: &SettlementReceipt) {
        if let Some(mut entry) = self.records.get_mut(key) {
            entry.0.state = NonceState::Settled(receipt.clone());
        }
    }

    fn purge_expired(&self, max_age_secs: u64) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, (_, inserted)| inserted.elapsed().as_secs() < max_age_secs);
        before.saturating_sub(self.records.len())
    }
}

/// Persistent nonce store backed by SQLite. Survives restarts.
pub struct SqliteNonceStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteNonceStore {
    /// Open (or create) a SQLite nonce database at the given path.
    ///
    /// On Unix the file is restricted to 0600.
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settlement_nonces (
                payer TEXT NOT NULL,
                network TEXT NOT NULL,
                nonce BLOB NOT NULL,
                fingerprint BLOB NOT NULL,
                receipt TEXT,
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (payer, network, nonce)
            );
            CREATE INDEX IF NOT EXISTS idx_settlement_nonces_recorded_at
                ON settlement_nonces(recorded_at);
            PRAGMA journal_mode=WAL;",
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to set nonce database file permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("nonce store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Current unix timestamp. On clock error, returns i64::MAX so records are never
/// purged prematurely.
fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_else(|_| {
            tracing::error!("system clock before UNIX epoch, using max timestamp for nonce safety");
            i64::MAX
        })
}

fn payer_column(payer: &Address) -> String {
    format!("{payer:#x}")
}

impl NonceStore for SqliteNonceStore {
    fn get(&self, key: &NonceKey) -> Option<NonceRecord> {
        let conn = self.conn();
        let row = conn.query_row(
            "SELECT fingerprint, receipt FROM settlement_nonces
             WHERE payer = ?1 AND network = ?2 AND nonce = ?3",
            rusqlite::params![payer_column(&key.payer), key.network, key.nonce.as_slice()],
            |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Option<String>>(1)?)),
        );

        match row {
            Ok((fingerprint, receipt)) => {
                let state = match receipt.map(|r| serde_json::from_str(&r)) {
                    Some(Ok(receipt)) => NonceState::Settled(receipt),
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "stored receipt unreadable, treating as pending");
                        NonceState::Pending
                    }
                    None => NonceState::Pending,
                };
                Some(NonceRecord {
                    fingerprint: B256::try_from(fingerprint.as_slice()).unwrap_or_default(),
                    state,
                })
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                // Fail-secure: an unreadable record is treated as claimed.
                tracing::error!(error = %e, "nonce lookup failed, treating nonce as claimed");
                Some(NonceRecord {
                    fingerprint: B256::ZERO,
                    state: NonceState::Pending,
                })
            }
        }
    }

    fn try_claim(&self, key: &NonceKey, fingerprint: B256) -> bool {
        let conn = self.conn();
        // The primary key makes this atomic across processes sharing the database.
        conn.execute(
            "INSERT INTO settlement_nonces (payer, network, nonce, fingerprint, receipt, recorded_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            rusqlite::params![
                payer_column(&key.payer),
                key.network,
                key.nonce.as_slice(),
                fingerprint.as_slice(),
                unix_now()
            ],
        )
        .is_ok()
    }

    fn complete(&self, key: &NonceKey, receipt: &SettlementReceipt) {
        let json = match serde_json::to_string(receipt) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize receipt, nonce stays pending");
                return;
            }
        };
        let conn = self.conn();
        if let Err(e) = conn.execute(
            "UPDATE settlement_nonces SET receipt = ?4
             WHERE payer = ?1 AND network = ?2 AND nonce = ?3",
            rusqlite::params![payer_column(&key.payer), key.network, key.nonce.as_slice(), json],
        ) {
            tracing::error!(error = %e, "failed to record settlement receipt, nonce stays pending");
        }
    }

    fn purge_expired(&self, max_age_secs: u64) -> usize {
        let conn = self.conn();
        let now = unix_now();

        // Backward clock jump: skip purge rather than remove live records.
        let min_recorded: i64 = conn
            .query_row(
                "SELECT COALESCE(MIN(recorded_at), 0) FROM settlement_nonces",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        if min_recorded > 0 && now < min_recorded {
            tracing::warn!(
                now = now,
                min_recorded = min_recorded,
                "clock appears to have jumped backward, skipping nonce purge"
            );
            return 0;
        }

        let cutoff = now.saturating_sub(i64::try_from(max_age_secs).unwrap_or(i64::MAX));
        conn.execute(
            "DELETE FROM settlement_nonces WHERE recorded_at < ?1",
            rusqlite::params![cutoff],
        )
        .unwrap_or(0)
    }
}
