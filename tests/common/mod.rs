#![allow(dead_code)]

use anyhow::{Result, bail};
use hotspot_ui::{
    hotspot::{Configuration, RadioConfig, SsidProfile},
    services::{
        apply::{ApplyCoordinator, NetworkApplier, RecoveryPolicy, SettingsStore},
        devices::DeviceEnumerator,
        journal::ApplyJournal,
        profile_store::ProfileStore,
        session_risk::SessionRiskDetector,
        status::{ProbeTimeouts, StatusProber, StatusSource},
    },
};
use std::{
    collections::BTreeMap,
    net::IpAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::time::sleep;

pub const HOTSPOT_CLIENT: &str = "10.0.242.23";
pub const WIRED_CLIENT: &str = "192.168.1.20";

pub fn addr(ip: &str) -> Option<IpAddr> {
    Some(ip.parse().unwrap())
}

pub fn hotspot(device: &str, channel: i64, ssids: &[&str]) -> Configuration {
    Configuration {
        radio: RadioConfig {
            enabled: true,
            device: device.to_string(),
            channel,
        },
        profiles: ssids.iter().map(|ssid| SsidProfile::new(*ssid, "")).collect(),
    }
}

/// Service state as seen by the status source
#[derive(Clone, Default)]
pub struct FakeStatus {
    running: Arc<AtomicBool>,
    /// service never comes up after an apply
    stuck: Arc<AtomicBool>,
}

impl FakeStatus {
    pub fn running(running: bool) -> Self {
        let status = Self::default();
        status.running.store(running, Ordering::SeqCst);
        status
    }

    pub fn never_recover(&self) {
        self.stuck.store(true, Ordering::SeqCst);
    }

    fn restarted(&self, running: bool) {
        let running = running && !self.stuck.load(Ordering::SeqCst);
        self.running.store(running, Ordering::SeqCst);
    }
}

impl StatusSource for FakeStatus {
    async fn service_active(&self) -> Result<bool> {
        Ok(self.running.load(Ordering::SeqCst))
    }

    async fn radio_link(&self, _device: String) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::from([("mode".to_string(), "AP".to_string())]))
    }

    async fn associated_clients(&self, _device: String) -> Result<usize> {
        Ok(1)
    }

    async fn broadcasting_ssids(&self) -> Result<Vec<String>> {
        Ok(vec![])
    }
}

/// Records applies and restarts the fake service
#[derive(Clone, Default)]
pub struct FakeApplier {
    status: FakeStatus,
    calls: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    delay: Duration,
}

impl FakeApplier {
    pub fn new(status: FakeStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl NetworkApplier for FakeApplier {
    async fn apply(&self, config: Configuration) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            bail!("hostapd: invalid configuration");
        }

        self.status.restarted(config.expects_running());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    config: Arc<Mutex<Configuration>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new(config: Configuration) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
            saves: Arc::default(),
        }
    }

    pub fn stored(&self) -> Configuration {
        self.config.lock().unwrap().clone()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SettingsStore for MemoryStore {
    async fn load(&self) -> Result<Configuration> {
        Ok(self.stored())
    }

    async fn save(&self, config: Configuration) -> Result<()> {
        *self.config.lock().unwrap() = config;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeDevices(pub Vec<String>);

impl DeviceEnumerator for FakeDevices {
    async fn list_wireless_devices(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

pub type Coordinator = ApplyCoordinator<FakeApplier, MemoryStore, FakeStatus>;

/// Coordinator wired to fakes, with handles to inspect them
pub struct Harness {
    pub coordinator: Coordinator,
    pub prober: StatusProber<FakeStatus, MemoryStore>,
    pub applier: FakeApplier,
    pub status: FakeStatus,
    pub store: MemoryStore,
    pub risk: SessionRiskDetector,
}

impl Harness {
    pub fn new(stored: Configuration) -> Self {
        Self::with(stored, RecoveryPolicy::default(), Duration::ZERO)
    }

    pub fn with(stored: Configuration, recovery: RecoveryPolicy, apply_delay: Duration) -> Self {
        let status = FakeStatus::running(stored.expects_running());
        let applier = FakeApplier::new(status.clone()).with_delay(apply_delay);
        let store = MemoryStore::new(stored);
        let risk = SessionRiskDetector::new(vec![
            "10.0.242.0/24".parse().unwrap(),
            "10.0.243.0/24".parse().unwrap(),
        ]);

        let prober = StatusProber::new(
            Arc::new(status.clone()),
            Arc::new(store.clone()),
            ProbeTimeouts::default(),
        );
        let coordinator = ApplyCoordinator::new(
            Arc::new(applier.clone()),
            Arc::new(store.clone()),
            prober.clone(),
            ProfileStore::new(2),
            risk.clone(),
            recovery,
            Arc::new(ApplyJournal::in_memory()),
        );

        Self {
            coordinator,
            prober,
            applier,
            status,
            store,
            risk,
        }
    }
}
