//! Persistent Wi-Fi credential store.
//!
//! A small namespaced key-value table in SQLite stands in for the
//! platform's non-volatile store. Namespace `wificonfig`, keys `ssid`,
//! `password`, `provisioned`.
//!
//! Do NOT change the namespace or key names: deployed devices would lose
//! their provisioning on upgrade.
//!
//! Every operation returns a boolean outcome; persistence failures are
//! logged and never panic.

use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, info, warn};

const NAMESPACE: &str = "wificonfig";
const KEY_SSID: &str = "ssid";
const KEY_PASSWORD: &str = "password";
const KEY_PROVISIONED: &str = "provisioned";

/// Wi-Fi credentials snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

/// The credential store. Interior mutability so handlers can share it.
pub struct CredStore {
    conn: Mutex<Connection>,
}

impl CredStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// In-memory store for tests and diskless bench units.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                 namespace TEXT NOT NULL,
                 key       TEXT NOT NULL,
                 value     TEXT NOT NULL,
                 PRIMARY KEY (namespace, key)
             )",
            [],
        )?;
        Ok(CredStore {
            conn: Mutex::new(conn),
        })
    }

    /// Load saved credentials. Returns `None` when the device has not been
    /// provisioned (or on storage failure, which is logged).
    pub fn load(&self) -> Option<Credentials> {
        let conn = self.conn.lock().unwrap();

        match read_key(&conn, KEY_PROVISIONED) {
            Ok(Some(flag)) if flag == "1" => {}
            Ok(_) => return None,
            Err(e) => {
                error!(error = %e, "credential store read failed");
                return None;
            }
        }

        let ssid = read_key(&conn, KEY_SSID).ok().flatten()?;
        let password = read_key(&conn, KEY_PASSWORD).ok().flatten()?;
        info!(ssid = %ssid, "loaded provisioned credentials");
        Some(Credentials { ssid, password })
    }

    /// Save credentials and set the provisioned flag in one transaction.
    /// Verified by re-reading and comparing lengths.
    pub fn save(&self, ssid: &str, password: &str) -> bool {
        let mut conn = self.conn.lock().unwrap();

        let tx = match conn.transaction() {
            Ok(tx) => tx,
            Err(e) => {
                error!(error = %e, "credential store transaction failed");
                return false;
            }
        };

        let writes = [
            (KEY_SSID, ssid),
            (KEY_PASSWORD, password),
            (KEY_PROVISIONED, "1"),
        ];
        for (key, value) in writes {
            if let Err(e) = tx.execute(
                "INSERT OR REPLACE INTO kv (namespace, key, value) VALUES (?1, ?2, ?3)",
                params![NAMESPACE, key, value],
            ) {
                error!(key, error = %e, "credential write failed");
                return false;
            }
        }
        if let Err(e) = tx.commit() {
            error!(error = %e, "credential commit failed");
            return false;
        }

        // Verify by re-reading.
        let ok = matches!(read_key(&conn, KEY_SSID), Ok(Some(s)) if s.len() == ssid.len())
            && matches!(read_key(&conn, KEY_PASSWORD), Ok(Some(p)) if p.len() == password.len());
        if ok {
            info!(ssid = %ssid, "credentials saved");
        } else {
            warn!("credential save verification failed");
        }
        ok
    }

    /// Erase the namespace.
    pub fn clear(&self) -> bool {
        let conn = self.conn.lock().unwrap();
        match conn.execute("DELETE FROM kv WHERE namespace = ?1", params![NAMESPACE]) {
            Ok(_) => {
                info!("credentials cleared");
                true
            }
            Err(e) => {
                error!(error = %e, "credential clear failed");
                false
            }
        }
    }

    /// Whether the provisioned flag is set.
    pub fn is_provisioned(&self) -> bool {
        let conn = self.conn.lock().unwrap();
        matches!(read_key(&conn, KEY_PROVISIONED), Ok(Some(flag)) if flag == "1")
    }
}

fn read_key(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
        params![NAMESPACE, key],
        |row| row.get(0),
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_before_provisioning_is_none() {
        let store = CredStore::open_in_memory().unwrap();
        assert!(store.load().is_none());
        assert!(!store.is_provisioned());
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = CredStore::open_in_memory().unwrap();
        assert!(store.save("HomeNet", "hunter22"));
        assert!(store.is_provisioned());
        assert_eq!(
            store.load(),
            Some(Credentials {
                ssid: "HomeNet".to_owned(),
                password: "hunter22".to_owned(),
            })
        );
    }

    #[test]
    fn clear_erases_the_namespace() {
        let store = CredStore::open_in_memory().unwrap();
        store.save("HomeNet", "pw");
        assert!(store.clear());
        assert!(store.load().is_none());
        assert!(!store.is_provisioned());
    }

    #[test]
    fn save_overwrites_previous_credentials() {
        let store = CredStore::open_in_memory().unwrap();
        store.save("OldNet", "old");
        store.save("NewNet", "new");
        assert_eq!(store.load().unwrap().ssid, "NewNet");
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.sqlite3");
        {
            let store = CredStore::open(&path).unwrap();
            store.save("HomeNet", "pw");
        }
        let store = CredStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap().ssid, "HomeNet");
    }
}
