//! SQLite-backed local index of device links, keyed by master public key.
//!
//! Tables:
//! - `device_links`: master_public_key, slave_public_key, signatures,
//!   device_name, linked_at
//!
//! The link set for a master is only ever replaced or cleared as a whole,
//! inside one transaction, mirroring the directory's snapshot semantics.
//! Readers go through the same connection lock and so never observe a
//! half-written set.

use crate::error::StoreError;
use crate::link::{DeviceLink, DeviceLinkSet};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

/// A stored link plus its local-only metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub link: DeviceLink,
    pub name: Option<String>,
    pub linked_at: DateTime<Utc>,
}

/// Persistent device-link index.
pub struct DeviceLinkStore {
    conn: Mutex<rusqlite::Connection>,
}

impl DeviceLinkStore {
    /// Open (or create) the store at the given path.
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

    /// Create an in-memory store (for tests).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_tables(conn: &rusqlite::Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS device_links (
                master_public_key TEXT NOT NULL,
                slave_public_key TEXT NOT NULL,
                request_signature BLOB NOT NULL,
                grant_signature BLOB NOT NULL,
                device_name TEXT,
                linked_at INTEGER NOT NULL,
                PRIMARY KEY (master_public_key, slave_public_key)
            );",
        )?;
        Ok(())
    }

    /// All links for `master`. Empty if there are none.
    pub fn get_device_links(&self, master: &str) -> Result<DeviceLinkSet, StoreError> {
        Ok(self
            .entries(master)?
            .into_iter()
            .map(|entry| entry.link)
            .collect())
    }

    /// All links for `master` with their metadata, oldest first.
    pub fn entries(&self, master: &str) -> Result<Vec<LinkEntry>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT master_public_key, slave_public_key, request_signature, grant_signature,
                    device_name, linked_at
             FROM device_links WHERE master_public_key = ?1
             ORDER BY linked_at ASC, slave_public_key ASC",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![master], |row| {
                Ok((
                    DeviceLink {
                        master_public_key: row.get(0)?,
                        slave_public_key: row.get(1)?,
                        request_signature: row.get(2)?,
                        grant_signature: row.get(3)?,
                    },
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(link, name, linked_at_ms)| {
                let linked_at = DateTime::<Utc>::from_timestamp_millis(linked_at_ms)
                    .ok_or_else(|| {
                        StoreError::Corrupt(format!(
                            "linked_at {linked_at_ms} out of range for {}",
                            link.slave_public_key
                        ))
                    })?;
                Ok(LinkEntry {
                    link,
                    name,
                    linked_at,
                })
            })
            .collect()
    }

    /// The entry for one (master, slave) pair.
    pub fn entry(&self, master: &str, slave: &str) -> Result<Option<LinkEntry>, StoreError> {
        Ok(self
            .entries(master)?
            .into_iter()
            .find(|entry| entry.link.slave_public_key == slave))
    }

    /// Replace the whole link set for `master`.
    ///
    /// Name and `linked_at` survive for slaves that stay in the set; new
    /// slaves get the current time.
    pub fn set_device_links(&self, master: &str, links: &DeviceLinkSet) -> Result<(), StoreError> {
        if let Some(stray) = links.iter().find(|l| l.master_public_key != master) {
            return Err(StoreError::MasterMismatch {
                expected: master.to_string(),
                found: stray.master_public_key.clone(),
            });
        }

        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing: HashMap<String, (Option<String>, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT slave_public_key, device_name, linked_at
                 FROM device_links WHERE master_public_key = ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![master], |row| {
                Ok((row.get::<_, String>(0)?, (row.get(1)?, row.get(2)?)))
            })?;
            let collected = rows.collect::<Result<HashMap<_, _>, _>>()?;
            collected
        };

        tx.execute(
            "DELETE FROM device_links WHERE master_public_key = ?1",
            rusqlite::params![master],
        )?;

        for link in links.iter() {
            let (name, linked_at) = existing
                .get(&link.slave_public_key)
                .cloned()
                .unwrap_or((None, now));
            tx.execute(
                "INSERT INTO device_links
                    (master_public_key, slave_public_key, request_signature, grant_signature,
                     device_name, linked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    link.master_public_key,
                    link.slave_public_key,
                    link.request_signature,
                    link.grant_signature,
                    name,
                    linked_at,
                ],
            )?;
        }

        tx.commit()?;
        tracing::debug!(master = %master, links = links.len(), "Device link set replaced");
        Ok(())
    }

    /// Remove every link for `master`. Idempotent; returns how many were removed.
    pub fn clear_device_links(&self, master: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM device_links WHERE master_public_key = ?1",
            rusqlite::params![master],
        )?;
        tracing::debug!(master = %master, removed = deleted, "Device links cleared");
        Ok(deleted)
    }

    /// Set or clear the local display name of a linked device.
    /// Returns `false` if the pair is not linked.
    pub fn set_device_name(
        &self,
        master: &str,
        slave: &str,
        name: Option<&str>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE device_links SET device_name = ?3
             WHERE master_public_key = ?1 AND slave_public_key = ?2",
            rusqlite::params![master, slave, name],
        )?;
        Ok(updated > 0)
    }
}
