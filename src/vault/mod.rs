//! Key material per linked device: pre-key bundles and session records.
//!
//! Tables:
//! - `pre_key_bundles`: one bundle per device public key
//! - `sessions`: session records per (device public key, device id)
//!
//! Material is referenced by the slave public key and never shared across
//! devices. Removal is irreversible.

use crate::error::StoreError;
use parking_lot::Mutex;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Public keys published by a device for asynchronous session setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    /// Identity public key of the device.
    pub identity_key: Vec<u8>,
    /// Signed pre-key id.
    pub signed_pre_key_id: u32,
    /// Signed pre-key (public).
    pub signed_pre_key: Vec<u8>,
    /// Signature over the signed pre-key by the identity key.
    pub signed_pre_key_signature: Vec<u8>,
    /// Optional one-time pre-key (consumed on first use).
    pub one_time_pre_key: Option<Vec<u8>>,
    /// Registration id of the device.
    pub registration_id: u32,
}

/// What a removal actually deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyMaterialRemoval {
    pub pre_key_bundles: usize,
    pub sessions: usize,
}

impl KeyMaterialRemoval {
    pub fn is_empty(&self) -> bool {
        self.pre_key_bundles == 0 && self.sessions == 0
    }
}

/// SQLite-backed key-material vault.
pub struct KeyMaterialVault {
    conn: Mutex<rusqlite::Connection>,
}

impl KeyMaterialVault {
    /// Open (or create) the vault at the given path.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory vault (for tests).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_tables(conn: &rusqlite::Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pre_key_bundles (
                public_key TEXT PRIMARY KEY,
                bundle TEXT NOT NULL,
                stored_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                public_key TEXT NOT NULL,
                device_id INTEGER NOT NULL,
                record BLOB NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (public_key, device_id)
            );",
        )?;
        Ok(())
    }

    // ── Pre-key bundles ─────────────────────────────────────────────

    /// Store (or replace) the pre-key bundle for a device.
    pub fn store_pre_key_bundle(
        &self,
        public_key: &str,
        bundle: &PreKeyBundle,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(bundle)
            .map_err(|e| StoreError::Corrupt(format!("unencodable pre-key bundle: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO pre_key_bundles (public_key, bundle, stored_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![public_key, encoded, epoch_secs() as i64],
        )?;
        Ok(())
    }

    /// The stored pre-key bundle for a device, if any.
    pub fn pre_key_bundle(&self, public_key: &str) -> Result<Option<PreKeyBundle>, StoreError> {
        let conn = self.conn.lock();
        let encoded: Option<String> = conn
            .query_row(
                "SELECT bundle FROM pre_key_bundles WHERE public_key = ?1",
                rusqlite::params![public_key],
                |row| row.get(0),
            )
            .optional()?;

        encoded
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| {
                    StoreError::Corrupt(format!("pre-key bundle for {public_key}: {e}"))
                })
            })
            .transpose()
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Store (or replace) a session record.
    pub fn store_session(
        &self,
        public_key: &str,
        device_id: u32,
        record: &[u8],
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (public_key, device_id, record, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(public_key, device_id) DO UPDATE SET
                record = excluded.record,
                updated_at = excluded.updated_at",
            rusqlite::params![public_key, device_id, record, epoch_secs() as i64],
        )?;
        Ok(())
    }

    /// Number of session records held for a device.
    pub fn session_count(&self, public_key: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE public_key = ?1",
            rusqlite::params![public_key],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Whether any bundle or session exists for a device.
    pub fn has_key_material(&self, public_key: &str) -> Result<bool, StoreError> {
        Ok(self.pre_key_bundle(public_key)?.is_some() || self.session_count(public_key)? > 0)
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Remove the pre-key bundle and every session for a device.
    ///
    /// Removing material that does not exist is a no-op.
    pub fn remove_all_sessions_and_keys(
        &self,
        public_key: &str,
    ) -> Result<KeyMaterialRemoval, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let pre_key_bundles = tx.execute(
            "DELETE FROM pre_key_bundles WHERE public_key = ?1",
            rusqlite::params![public_key],
        )?;
        let sessions = tx.execute(
            "DELETE FROM sessions WHERE public_key = ?1",
            rusqlite::params![public_key],
        )?;
        tx.commit()?;

        let removal = KeyMaterialRemoval {
            pre_key_bundles,
            sessions,
        };
        tracing::debug!(
            device = %public_key,
            bundles = removal.pre_key_bundles,
            sessions = removal.sessions,
            "Key material removed"
        );
        Ok(removal)
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
