use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by a JSON file in the data directory
///
/// Uses `ArcSwap` for lock-free reads; writes go to disk first and then
/// replace the cached snapshot.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    /// Lock-free cache using ArcSwap for zero-cost reads
    cache: Arc<ArcSwap<AppConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
}

impl ConfigStore {
    /// Open (or create) the configuration file at `path`
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let config = Self::load_config(path).await?;
        let cache = Arc::new(ArcSwap::from_pointee(config));
        let (change_tx, _) = broadcast::channel(16);

        Ok(Self {
            path: path.to_path_buf(),
            cache,
            change_tx,
        })
    }

    async fn load_config(path: &Path) -> Result<AppConfig> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => serde_json::from_str(&json).map_err(|e| AppError::Config(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, writing defaults", path.display());
                let config = AppConfig::default();
                Self::save_config(path, &config).await?;
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_config(path: &Path, config: &AppConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        // Write-then-rename so a crash never leaves a truncated file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Update configuration with a closure
    ///
    /// Read-modify-write; concurrent updates are last-write-wins.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let current = self.cache.load();
        let mut config = (**current).clone();
        f(&mut config);

        Self::save_config(&self.path, &config).await?;
        self.cache.store(Arc::new(config));

        let _ = self.change_tx.send(ConfigChange {
            key: "app_config".to_string(),
        });

        Ok(())
    }

    /// Persist the last known coordination endpoint
    ///
    /// No-op when the address is unchanged.
    pub async fn remember_endpoint(&self, endpoint: &str) -> Result<()> {
        if self.cache.load().signaling.endpoint == endpoint {
            return Ok(());
        }
        debug!("Remembering signaling endpoint {}", endpoint);
        let endpoint = endpoint.to_string();
        self.update(move |c| c.signaling.endpoint = endpoint).await?;
        let _ = self.change_tx.send(ConfigChange {
            key: "signaling.endpoint".to_string(),
        });
        Ok(())
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_config_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let store = ConfigStore::new(&path).await.unwrap();

        let config = store.get();
        assert_eq!(config.signaling.role, "android");
        assert_eq!(config.stream.bitrate_kbps, 6000);

        store
            .update(|c| {
                c.stream.bitrate_kbps = 2500;
                c.session.follow_orientation = true;
            })
            .await
            .unwrap();

        let config = store.get();
        assert_eq!(config.stream.bitrate_kbps, 2500);

        // New instance reads the persisted file
        let store2 = ConfigStore::new(&path).await.unwrap();
        let config = store2.get();
        assert_eq!(config.stream.bitrate_kbps, 2500);
        assert!(config.session.follow_orientation);
    }

    #[tokio::test]
    async fn test_remember_endpoint_persists_and_notifies() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = ConfigStore::new(&path).await.unwrap();
        let mut changes = store.subscribe();

        store.remember_endpoint("ws://10.0.0.7:8080/ws").await.unwrap();

        assert_eq!(changes.recv().await.unwrap().key, "app_config");
        assert_eq!(changes.recv().await.unwrap().key, "signaling.endpoint");

        let reopened = ConfigStore::new(&path).await.unwrap();
        assert_eq!(reopened.get().signaling.endpoint, "ws://10.0.0.7:8080/ws");

        // Same address again does not write or notify
        store.remember_endpoint("ws://10.0.0.7:8080/ws").await.unwrap();
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"signaling":{"endpoint":"ws://cam-hub/ws"}}"#)
            .await
            .unwrap();

        let store = ConfigStore::new(&path).await.unwrap();
        let config = store.get();
        assert_eq!(config.signaling.endpoint, "ws://cam-hub/ws");
        assert_eq!(config.signaling.base_delay_ms, 1500);
        assert_eq!(config.session.capture_retry_pause_ms, 60);
    }

    #[tokio::test]
    async fn test_default_facing_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"capture":{"default_facing":"front"}}"#)
            .await
            .unwrap();

        let store = ConfigStore::new(&path).await.unwrap();
        assert_eq!(store.get().capture.default_facing, crate::capture::Facing::Front);
        assert_eq!(store.get().capture.device_dir, "/dev");
    }
}
