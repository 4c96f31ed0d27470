use crate::services::devices::DeviceEnumerator;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::fs;

/// Finds wireless interfaces by inspecting sysfs
#[derive(Clone, Debug)]
pub struct SysfsDeviceEnumerator {
    class_net: PathBuf,
}

impl SysfsDeviceEnumerator {
    pub fn new(class_net: impl Into<PathBuf>) -> Self {
        Self {
            class_net: class_net.into(),
        }
    }
}

impl DeviceEnumerator for SysfsDeviceEnumerator {
    async fn list_wireless_devices(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.class_net)
            .await
            .context(format!("failed to read {:?}", self.class_net))?;
        let mut devices = vec![];

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("failed to read network interface entry")?
        {
            let path = entry.path();
            let wireless = fs::try_exists(path.join("wireless")).await.unwrap_or(false)
                || fs::try_exists(path.join("phy80211")).await.unwrap_or(false);

            if wireless {
                devices.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        devices.sort();
        Ok(devices)
    }
}
