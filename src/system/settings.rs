use crate::{hotspot::Configuration, services::apply::SettingsStore};
use anyhow::{Context, Result};
use log::info;
use std::{io::ErrorKind, path::PathBuf};
use tokio::{fs, io::AsyncWriteExt};

/// Stores the applied configuration as JSON file
#[derive(Clone, Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsStore for JsonSettingsStore {
    /// Load the configuration, a missing file yields the disabled default
    async fn load(&self) -> Result<Configuration> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content)
                .context(format!("failed to parse settings {:?}", self.path)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("no settings at {:?}, using defaults", self.path);
                Ok(Configuration::default())
            }
            Err(e) => Err(e).context(format!("failed to read settings {:?}", self.path)),
        }
    }

    /// Atomically replace the stored configuration
    async fn save(&self, config: Configuration) -> Result<()> {
        let json =
            serde_json::to_vec_pretty(&config).context("failed to serialize settings")?;
        let tmp = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&tmp)
            .await
            .context(format!("failed to create {tmp:?}"))?;
        file.write_all(&json)
            .await
            .context(format!("failed to write {tmp:?}"))?;
        file.sync_all()
            .await
            .context(format!("failed to sync {tmp:?}"))?;

        fs::rename(&tmp, &self.path)
            .await
            .context(format!("failed to rename {tmp:?} to {:?}", self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotspot::{RadioConfig, SsidProfile};

    #[tokio::test]
    async fn missing_file_yields_disabled_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("settings.json"));

        let config = store.load().await.unwrap();

        assert!(!config.radio.enabled);
        assert!(config.profiles.is_empty());
    }

    #[tokio::test]
    async fn saved_configuration_is_loaded_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("settings.json"));
        let config = Configuration {
            radio: RadioConfig {
                enabled: true,
                device: "wlan0".to_string(),
                channel: 11,
            },
            profiles: vec![SsidProfile::new("Party", ""), SsidProfile::new("Lab", "lab-secret")],
        };

        store.save(config.clone()).await.unwrap();

        assert_eq!(store.load().await.unwrap(), config);
        assert!(!dir.path().join("settings.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "[]").unwrap();

        assert!(JsonSettingsStore::new(path).load().await.is_err());
    }
}
