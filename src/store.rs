// src/store.rs
//! File-backed store for worker identities, credential files and scalar
//! settings
//!
//! Documents live as `<state_dir>/<key>.<ext>`; writes go through a
//! temporary file and a rename so a crash never leaves a half-written
//! identity behind.

use crate::utils::errors::{Result, WorkerError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk encoding of a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Json,
    Yaml,
}

impl StoreFormat {
    pub fn extension(&self) -> &str {
        match self {
            StoreFormat::Json => "json",
            StoreFormat::Yaml => "yaml",
        }
    }

    const ALL: [StoreFormat; 2] = [StoreFormat::Json, StoreFormat::Yaml];
}

/// Persistent per-worker state plus read access to layered settings
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
    settings: config::Config,
}

impl ConfigStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>, settings: config::Config) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            WorkerError::Store(format!("Failed to create state dir {:?}: {}", dir, e))
        })?;

        Ok(Self { dir, settings })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str, format: StoreFormat) -> PathBuf {
        self.dir.join(format!("{}.{}", key, format.extension()))
    }

    /// Load a stored document, or `None` if nothing was saved under `key`
    pub fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.load_as(key)
    }

    /// Typed variant of [`ConfigStore::load`]
    pub fn load_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        for format in StoreFormat::ALL {
            let path = self.path_for(key, format);
            if !path.exists() {
                continue;
            }

            debug!("Loading {:?}", path);
            let raw = fs::read_to_string(&path)?;
            let value = match format {
                StoreFormat::Json => serde_json::from_str(&raw)?,
                StoreFormat::Yaml => serde_yaml::from_str(&raw)?,
            };
            return Ok(Some(value));
        }

        Ok(None)
    }

    /// Persist `value` under `key`, returning the file it was written to
    pub fn save<T: Serialize>(&self, key: &str, value: &T, format: StoreFormat) -> Result<PathBuf> {
        let encoded = match format {
            StoreFormat::Json => serde_json::to_string_pretty(value)?,
            StoreFormat::Yaml => serde_yaml::to_string(value)?,
        };

        let path = self.path_for(key, format);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("{}.tmp", format.extension()));
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &path)?;

        // a key lives in exactly one format
        for other in StoreFormat::ALL.into_iter().filter(|f| *f != format) {
            let stale = self.path_for(key, other);
            if stale.exists() {
                fs::remove_file(stale)?;
            }
        }

        debug!("Saved {:?}", path);
        Ok(path)
    }

    /// Read a scalar setting, falling back to `default` when it is unset
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        match self.settings.get::<T>(key) {
            Ok(value) => Ok(value),
            Err(config::ConfigError::NotFound(_)) => Ok(default),
            Err(e) => Err(e.into()),
        }
    }
}
