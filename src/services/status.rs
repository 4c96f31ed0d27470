#![cfg_attr(feature = "mock", allow(dead_code, unused_imports))]

use crate::{
    error::ProbeError,
    hotspot::{Configuration, ProbeMode, StatusReport},
    services::apply::SettingsStore,
};
use anyhow::Result;
use log::{debug, warn};
#[cfg(feature = "mock")]
use mockall::automock;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use trait_variant::make;

/// Raw observations of the hotspot service and its radio
#[make(Send)]
#[cfg_attr(feature = "mock", automock)]
pub trait StatusSource {
    /// Whether the hotspot service process is active
    async fn service_active(&self) -> Result<bool>;
    /// Mode and channel of the radio as reported by the driver
    async fn radio_link(&self, device: String) -> Result<BTreeMap<String, String>>;
    async fn associated_clients(&self, device: String) -> Result<usize>;
    /// SSIDs currently on air from this host
    async fn broadcasting_ssids(&self) -> Result<Vec<String>>;
}

#[derive(Clone, Copy, Debug)]
pub struct ProbeTimeouts {
    pub fast: Duration,
    pub full: Duration,
}

impl ProbeTimeouts {
    pub fn of(&self, mode: ProbeMode) -> Duration {
        match mode {
            ProbeMode::Fast => self.fast,
            ProbeMode::Full => self.full,
        }
    }
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            fast: Duration::from_secs(2),
            full: Duration::from_secs(30),
        }
    }
}

/// Service reporting the health of the hotspot service
///
/// A fast probe only asks whether the service is active and is what the apply
/// sequence polls while waiting for recovery. A full probe additionally
/// inspects the radio and every configured profile.
pub struct StatusProber<Source, Store>
where
    Source: StatusSource,
    Store: SettingsStore,
{
    source: Arc<Source>,
    store: Arc<Store>,
    timeouts: ProbeTimeouts,
}

impl<Source, Store> Clone for StatusProber<Source, Store>
where
    Source: StatusSource,
    Store: SettingsStore,
{
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            store: self.store.clone(),
            timeouts: self.timeouts,
        }
    }
}

impl<Source, Store> StatusProber<Source, Store>
where
    Source: StatusSource + Sync,
    Store: SettingsStore + Sync,
{
    pub fn new(source: Arc<Source>, store: Arc<Store>, timeouts: ProbeTimeouts) -> Self {
        Self {
            source,
            store,
            timeouts,
        }
    }

    /// Probe the hotspot service
    ///
    /// # Arguments
    /// * `mode` - Depth of the probe
    ///
    /// # Returns
    /// A status report, or `ProbeError::Timeout` if the probe exceeded the
    /// timeout configured for `mode`. Failing observations do not fail the
    /// probe, they end up in the report detail.
    pub async fn probe(&self, mode: ProbeMode) -> Result<StatusReport, ProbeError> {
        let after = self.timeouts.of(mode);

        match tokio::time::timeout(after, self.collect(mode)).await {
            Ok(report) => {
                debug!("{mode} probe: running={}", report.running);
                Ok(report)
            }
            Err(_) => {
                warn!("{mode} probe timed out after {}ms", after.as_millis());
                Err(ProbeError::Timeout { mode, after })
            }
        }
    }

    async fn collect(&self, mode: ProbeMode) -> StatusReport {
        let mut detail = BTreeMap::new();

        let running = match self.source.service_active().await {
            Ok(active) => active,
            Err(e) => {
                detail.insert("service".to_string(), format!("error: {e:#}"));
                false
            }
        };
        detail
            .entry("service".to_string())
            .or_insert_with(|| if running { "active" } else { "inactive" }.to_string());

        if mode == ProbeMode::Full {
            match self.store.load().await {
                Ok(config) => self.inspect(&config, &mut detail).await,
                Err(e) => {
                    detail.insert("configuration".to_string(), format!("error: {e:#}"));
                }
            }
        }

        StatusReport::new(mode, running, detail)
    }

    async fn inspect(&self, config: &Configuration, detail: &mut BTreeMap<String, String>) {
        let device = config.radio.device.clone();

        detail.insert(
            "radio".to_string(),
            if config.radio.enabled { "enabled" } else { "disabled" }.to_string(),
        );

        if device.is_empty() {
            return;
        }

        let (link, clients, ssids) = tokio::join!(
            self.source.radio_link(device.clone()),
            self.source.associated_clients(device.clone()),
            self.source.broadcasting_ssids()
        );

        match link {
            Ok(link) => detail.extend(link.into_iter().map(|(k, v)| (format!("link:{k}"), v))),
            Err(e) => {
                detail.insert("link".to_string(), format!("error: {e:#}"));
            }
        }

        detail.insert(
            "clients".to_string(),
            match clients {
                Ok(count) => count.to_string(),
                Err(e) => format!("error: {e:#}"),
            },
        );

        match ssids {
            Ok(ssids) => {
                for profile in &config.profiles {
                    let on_air = ssids.iter().any(|ssid| ssid == &profile.ssid);
                    detail.insert(
                        format!("profile:{}", profile.ssid),
                        if on_air { "broadcasting" } else { "not broadcasting" }.to_string(),
                    );
                }
            }
            Err(e) => {
                detail.insert("profiles".to_string(), format!("error: {e:#}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotspot::{RadioConfig, SsidProfile};
    use anyhow::bail;
    use std::future::pending;

    #[derive(Default)]
    struct Observed {
        active: Option<bool>,
        hang: bool,
    }

    impl StatusSource for Observed {
        async fn service_active(&self) -> Result<bool> {
            if self.hang {
                pending::<()>().await;
            }
            match self.active {
                Some(active) => Ok(active),
                None => bail!("systemctl missing"),
            }
        }

        async fn radio_link(&self, device: String) -> Result<BTreeMap<String, String>> {
            Ok(BTreeMap::from([("interface".to_string(), device)]))
        }

        async fn associated_clients(&self, _device: String) -> Result<usize> {
            Ok(3)
        }

        async fn broadcasting_ssids(&self) -> Result<Vec<String>> {
            Ok(vec!["Party".to_string()])
        }
    }

    struct Stored(Configuration);

    impl SettingsStore for Stored {
        async fn load(&self) -> Result<Configuration> {
            Ok(self.0.clone())
        }

        async fn save(&self, _config: Configuration) -> Result<()> {
            Ok(())
        }
    }

    fn prober(source: Observed) -> StatusProber<Observed, Stored> {
        let config = Configuration {
            radio: RadioConfig {
                enabled: true,
                device: "wlan0".to_string(),
                channel: 6,
            },
            profiles: vec![SsidProfile::new("Party", ""), SsidProfile::new("Lab", "")],
        };

        StatusProber::new(
            Arc::new(source),
            Arc::new(Stored(config)),
            ProbeTimeouts::default(),
        )
    }

    #[tokio::test]
    async fn fast_probe_only_reports_service() {
        let report = prober(Observed {
            active: Some(true),
            ..Default::default()
        })
        .probe(ProbeMode::Fast)
        .await
        .unwrap();

        assert!(report.running);
        assert_eq!(report.mode, ProbeMode::Fast);
        assert_eq!(report.detail.len(), 1);
        assert_eq!(report.detail["service"], "active");
    }

    #[tokio::test]
    async fn full_probe_inspects_profiles() {
        let report = prober(Observed {
            active: Some(true),
            ..Default::default()
        })
        .probe(ProbeMode::Full)
        .await
        .unwrap();

        assert_eq!(report.detail["link:interface"], "wlan0");
        assert_eq!(report.detail["clients"], "3");
        assert_eq!(report.detail["profile:Party"], "broadcasting");
        assert_eq!(report.detail["profile:Lab"], "not broadcasting");
    }

    #[tokio::test]
    async fn failing_source_is_reported_not_raised() {
        let report = prober(Observed::default())
            .probe(ProbeMode::Fast)
            .await
            .unwrap();

        assert!(!report.running);
        assert!(report.detail["service"].starts_with("error:"));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_probe_times_out() {
        let result = prober(Observed {
            hang: true,
            ..Default::default()
        })
        .probe(ProbeMode::Full)
        .await;

        assert!(matches!(
            result,
            Err(ProbeError::Timeout {
                mode: ProbeMode::Full,
                after
            }) if after == Duration::from_secs(30)
        ));
    }
}
