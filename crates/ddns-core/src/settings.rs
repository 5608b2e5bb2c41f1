//! Settings persistence
//!
//! Holds the current [`Settings`] and writes every accepted change through
//! to disk when file-backed.

use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::config::{Settings, SettingsPatch};
use crate::persist;
use crate::Result;

/// Current settings, optionally persisted as JSON
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<Settings>,
}

impl SettingsStore {
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            current: RwLock::new(settings),
        }
    }

    /// Load settings from `path`, falling back to defaults when absent
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        persist::ensure_parent(&path).await?;

        let settings = match persist::load_with_recovery::<Settings>(&path).await? {
            Some(s) => match s.validate() {
                Ok(()) => s,
                Err(e) => {
                    tracing::warn!("Stored settings are invalid ({}), using defaults", e);
                    Settings::default()
                }
            },
            None => Settings::default(),
        };

        Ok(Self {
            path: Some(path),
            current: RwLock::new(settings),
        })
    }

    pub async fn get(&self) -> Settings {
        self.current.read().await.clone()
    }

    /// Validate and apply a partial update
    ///
    /// Returns the previous and the new settings.
    pub async fn update(&self, patch: &SettingsPatch) -> Result<(Settings, Settings)> {
        let mut guard = self.current.write().await;
        let merged = guard.merged(patch);
        merged.validate()?;

        if let Some(path) = &self.path {
            persist::write_atomic(path, &merged).await?;
        }

        let previous = std::mem::replace(&mut *guard, merged.clone());
        Ok((previous, merged))
    }
}
