use super::{command_output, run};
use crate::services::status::StatusSource;
use anyhow::Result;
use std::collections::BTreeMap;

/// Observes the hotspot through systemd and `iw`
#[derive(Clone, Debug)]
pub struct SystemStatusSource {
    service: String,
}

impl SystemStatusSource {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl StatusSource for SystemStatusSource {
    async fn service_active(&self) -> Result<bool> {
        // non-zero exit just means inactive
        let output =
            command_output("systemctl", &["is-active", "--quiet", &self.service]).await?;
        Ok(output.status.success())
    }

    async fn radio_link(&self, device: String) -> Result<BTreeMap<String, String>> {
        let info = run("iw", &["dev", &device, "info"]).await?;
        Ok(parse_link_info(&info))
    }

    async fn associated_clients(&self, device: String) -> Result<usize> {
        let dump = run("iw", &["dev", &device, "station", "dump"]).await?;
        Ok(count_stations(&dump))
    }

    async fn broadcasting_ssids(&self) -> Result<Vec<String>> {
        let devices = run("iw", &["dev"]).await?;
        Ok(parse_ssids(&devices))
    }
}

fn parse_link_info(info: &str) -> BTreeMap<String, String> {
    let mut link = BTreeMap::new();

    for line in info.lines().map(str::trim) {
        if let Some(mode) = line.strip_prefix("type ") {
            link.insert("mode".to_string(), mode.to_string());
        } else if let Some(channel) = line.strip_prefix("channel ") {
            // "6 (2437 MHz), width: 20 MHz, center1: 2437 MHz"
            let channel = channel.split_whitespace().next().unwrap_or_default();
            link.insert("channel".to_string(), channel.to_string());
        } else if let Some(power) = line.strip_prefix("txpower ") {
            link.insert("txpower".to_string(), power.to_string());
        }
    }

    link
}

fn count_stations(dump: &str) -> usize {
    dump.lines()
        .filter(|line| line.starts_with("Station "))
        .count()
}

fn parse_ssids(devices: &str) -> Vec<String> {
    devices
        .lines()
        .filter_map(|line| line.trim().strip_prefix("ssid "))
        .map(str::to_string)
        .collect()
}
