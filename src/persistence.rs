//! On-disk state: a small JSON key-value store plus a plain-text uptime
//! marker, mirroring the data the bot must survive a restart without
//! losing — pool reserves, the sync cursor, blacklist state, burner
//! inventory, and running tx/balance statistics.
//!

use crate::error::PersistenceError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Keys used by [`Store::load`]/[`Store::save`]. Each maps to `<dir>/<key>.json`.
pub mod keys {
    pub const POOLS: &str = "pools";
    pub const POOL_NUMBERS: &str = "pool_numbers";
    pub const LAST_BLOCK: &str = "last_block";
    pub const BLACKLIST_PATHS: &str = "blacklist_paths";
    pub const PRE_BLACKLIST_PATHS: &str = "pre_blacklist_paths";
    pub const BURNERS: &str = "burners";
    pub const TX_STATS: &str = "tx_stats";
    pub const BALANCE_STATS: &str = "balance_stats";
}

/// A directory-backed JSON key-value store, one file per key.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Load `key`, returning `default` if the file does not exist yet (first
    /// boot / fresh deployment).
    pub fn load_or_default<T>(&self, key: &str, default: T) -> Result<T, PersistenceError>
    where
        T: DeserializeOwned,
    {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(default);
        }
        self.load(key)
    }

    pub fn load<T>(&self, key: &str) -> Result<T, PersistenceError>
    where
        T: DeserializeOwned,
    {
        let path = self.path_for(key);
        let raw = std::fs::read_to_string(&path).map_err(|source| PersistenceError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| PersistenceError::Serde {
            path: path.display().to_string(),
            source,
        })
    }

    /// Writes to `<key>.json.tmp` then renames over the real path, so a
    /// crash mid-write never leaves a truncated file behind for the next
    /// boot to trip over.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), PersistenceError>
    where
        T: Serialize,
    {
        std::fs::create_dir_all(&self.dir).map_err(|source| PersistenceError::Write {
            path: self.dir.display().to_string(),
            source,
        })?;
        let path = self.path_for(key);
        let tmp_path = self.dir.join(format!("{key}.json.tmp"));
        let serialized = serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Serde {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(&tmp_path, serialized).map_err(|source| PersistenceError::Write {
            path: tmp_path.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|source| PersistenceError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Plain-text "bot has been running since <timestamp>" marker, written once
/// at startup and read back by health checks / dashboards.
pub struct UptimeMarker {
    path: PathBuf,
}

impl UptimeMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn write_now(&self) -> Result<(), PersistenceError> {
        let now = chrono::Utc::now().to_rfc3339();
        std::fs::write(&self.path, now).map_err(|source| PersistenceError::Write {
            path: self.path.display().to_string(),
            source,
        })
    }

    pub fn read(&self) -> Result<Option<String>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&self.path)
            .map(Some)
            .map_err(|source| PersistenceError::Read {
                path: self.path.display().to_string(),
                source,
            })
    }
}

pub fn ensure_dir(dir: &Path) -> Result<(), PersistenceError> {
    std::fs::create_dir_all(dir).map_err(|source| PersistenceError::Write {
        path: dir.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        count: u64,
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("dexarb-persistence-test-{:?}", std::thread::current().id()));
        let store = Store::new(&dir);
        let value = Sample { count: 7 };
        store.save("sample", &value).unwrap();
        let loaded: Sample = store.load("sample").unwrap();
        assert_eq!(loaded, value);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_or_default_on_missing_file() {
        let dir = std::env::temp_dir().join(format!("dexarb-persistence-test-missing-{:?}", std::thread::current().id()));
        let store = Store::new(&dir);
        let loaded: Sample = store.load_or_default("missing", Sample { count: 0 }).unwrap();
        assert_eq!(loaded, Sample { count: 0 });
    }

    #[test]
    fn uptime_marker_write_and_read() {
        let path = std::env::temp_dir().join(format!("dexarb-uptime-test-{:?}.txt", std::thread::current().id()));
        let marker = UptimeMarker::new(&path);
        marker.write_now().unwrap();
        assert!(marker.read().unwrap().is_some());
        std::fs::remove_file(&path).ok();
    }
}
