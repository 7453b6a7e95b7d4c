//! JSON file cache of finished collections keyed by target, methods and limit

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collector::CollectionResult;
use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    generated_at: DateTime<Utc>,
    result: CollectionResult,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: BTreeMap<String, CacheEntry>,
}

pub struct ResultCache {
    path: PathBuf,
    ttl: Duration,
    enabled: bool,
    guard: Mutex<()>,
}

impl ResultCache {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration, enabled: bool) -> Self {
        Self {
            path: path.into(),
            ttl,
            enabled,
            guard: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.cache_path, config.cache_ttl, config.cache_enabled)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fresh entry for `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<CollectionResult>> {
        if !self.enabled {
            return Ok(None);
        }
        let _lock = self.lock()?;
        let file = load(&self.path)?;
        Ok(file
            .entries
            .get(key)
            .filter(|entry| is_fresh(entry, self.ttl))
            .map(|entry| {
                debug!("Cache hit for {} (from {})", key, entry.generated_at);
                entry.result.clone()
            }))
    }

    /// Store a result; expired entries are dropped on the way.
    pub fn put(&self, key: &str, result: &CollectionResult) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let _lock = self.lock()?;
        let mut file = load(&self.path)?;
        file.entries.retain(|_, entry| is_fresh(entry, self.ttl));
        file.entries.insert(
            key.to_string(),
            CacheEntry {
                generated_at: Utc::now(),
                result: result.clone(),
            },
        );
        save(&self.path, &file)
    }

    /// Drop expired entries and return how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let _lock = self.lock()?;
        let mut file = load(&self.path)?;
        let before = file.entries.len();
        file.entries.retain(|_, entry| is_fresh(entry, self.ttl));
        let removed = before - file.entries.len();
        if removed > 0 {
            save(&self.path, &file)?;
        }
        Ok(removed)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.guard
            .lock()
            .map_err(|_| Error::Unknown("cache lock poisoned".into()))
    }
}

fn is_fresh(entry: &CacheEntry, ttl: Duration) -> bool {
    let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(0));
    Utc::now() - entry.generated_at <= ttl
}

fn load(path: &Path) -> Result<CacheFile> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(CacheFile::default()),
        Err(err) => return Err(Error::IoError(err)),
    };

    match serde_json::from_str(&data) {
        Ok(file) => Ok(file),
        Err(err) => {
            warn!("Ignoring unreadable cache {}: {}", path.display(), err);
            Ok(CacheFile::default())
        }
    }
}

fn save(path: &Path, file: &CacheFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let serialized = serde_json::to_string_pretty(file)?;
    fs::write(path, serialized)?;
    Ok(())
}
