#![cfg_attr(feature = "mock", allow(dead_code, unused_imports))]

use crate::hotspot::Configuration;
use anyhow::Result;
#[cfg(feature = "mock")]
use mockall::automock;
use serde::Serialize;
use trait_variant::make;

/// Lists the radio devices able to run the hotspot
#[make(Send)]
#[cfg_attr(feature = "mock", automock)]
pub trait DeviceEnumerator {
    async fn list_wireless_devices(&self) -> Result<Vec<String>>;
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceListing {
    pub devices: Vec<String>,
    /// Configured device is no longer present on the host
    pub device_missing: bool,
}

impl DeviceListing {
    pub fn new(devices: Vec<String>, config: &Configuration) -> Self {
        let device = &config.radio.device;
        let device_missing = !device.is_empty() && !devices.contains(device);

        Self {
            devices,
            device_missing,
        }
    }
}
