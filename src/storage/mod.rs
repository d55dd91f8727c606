use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Everything the launcher persists between runs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Settings {
    pub game_install_path: String,
    pub username: String,
    pub auth_token: String,
    /// Unix seconds; zero when no session is stored.
    pub auth_token_expiry: i64,
}

impl Settings {
    pub fn has_install_path(&self) -> bool {
        !self.game_install_path.trim().is_empty()
    }

    pub fn session_valid_at(&self, now: i64) -> bool {
        !self.auth_token.is_empty() && self.auth_token_expiry > now
    }

    fn clear_session(&mut self) {
        self.auth_token.clear();
        self.auth_token_expiry = 0;
    }
}

/// Explicit settings handle shared by the engine, the installer and the account service.
///
/// Cloning shares the same in-memory state; every `update` writes through to disk.
#[derive(Clone, Debug)]
pub struct SettingsStore {
    path: PathBuf,
    state: Arc<Mutex<Settings>>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Arc::new(Mutex::new(Settings::default())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read settings from disk. A missing file yields defaults; an expired session is dropped.
    pub async fn load(&self) -> Result<Settings, String> {
        let mut settings = match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice::<Settings>(&bytes)
                .map_err(|e| format!("failed to parse {}: {e}", self.path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("settings: no file at {}, using defaults", self.path.display());
                Settings::default()
            }
            Err(err) => return Err(format!("failed to read settings: {err}")),
        };

        let expired = settings.auth_token_expiry > 0
            && settings.auth_token_expiry <= Utc::now().timestamp();
        *self.lock() = settings.clone();
        if expired {
            warn!("settings: stored session expired; clearing token");
            settings.clear_session();
            self.save(&settings).await?;
        }
        info!("settings: loaded from {}", self.path.display());
        Ok(settings)
    }

    pub fn snapshot(&self) -> Settings {
        self.lock().clone()
    }

    pub async fn save(&self, settings: &Settings) -> Result<(), String> {
        *self.lock() = settings.clone();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("unable to create settings dir: {e}"))?;
        }
        let bytes = serde_json::to_vec_pretty(settings)
            .map_err(|e| format!("failed to serialize settings: {e}"))?;
        fs::write(&self.path, bytes)
            .await
            .map_err(|e| format!("unable to persist settings: {e}"))
    }

    /// Apply `change` to the current settings and persist the result.
    pub async fn update<F>(&self, change: F) -> Result<Settings, String>
    where
        F: FnOnce(&mut Settings),
    {
        let updated = {
            let mut guard = self.lock();
            change(&mut guard);
            guard.clone()
        };
        self.save(&updated).await?;
        Ok(updated)
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let settings = store.load().await.unwrap();
        assert_eq!(settings, Settings::default());
        assert!(!settings.has_install_path());
    }

    #[tokio::test]
    async fn update_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(&path);
        store
            .update(|s| s.game_install_path = r"C:\VFUN\s4league".into())
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"GameInstallPath\""));

        let reopened = SettingsStore::new(&path);
        let loaded = reopened.load().await.unwrap();
        assert_eq!(loaded.game_install_path, r"C:\VFUN\s4league");
        assert_eq!(reopened.snapshot(), loaded);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let other = store.clone();
        other.update(|s| s.username = "bob".into()).await.unwrap();
        assert_eq!(store.snapshot().username, "bob");
    }

    #[tokio::test]
    async fn expired_session_is_cleared_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"GameInstallPath":"game","Username":"bob","AuthToken":"tok","AuthTokenExpiry":1}"#,
        )
        .unwrap();

        let store = SettingsStore::new(&path);
        let loaded = store.load().await.unwrap();
        assert!(loaded.auth_token.is_empty());
        assert_eq!(loaded.auth_token_expiry, 0);
        assert_eq!(loaded.username, "bob");

        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(on_disk.contains("\"AuthTokenExpiry\": 0"));
    }

    #[test]
    fn session_validity_depends_on_token_and_expiry() {
        let mut settings = Settings {
            auth_token: "tok".into(),
            auth_token_expiry: 100,
            ..Default::default()
        };
        assert!(settings.session_valid_at(99));
        assert!(!settings.session_valid_at(100));
        settings.clear_session();
        assert!(!settings.session_valid_at(0));
    }
}
