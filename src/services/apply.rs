#![cfg_attr(feature = "mock", allow(dead_code, unused_imports))]

use crate::{
    error::ApplyError,
    hotspot::{ApplyRequest, Configuration, ProbeMode, StatusReport},
    services::{
        journal::{ApplyJournal, ApplyRecord},
        profile_store::{ChangeSet, ProfileStore, ValidationReport},
        session_risk::SessionRiskDetector,
        status::{StatusProber, StatusSource},
    },
};
use anyhow::Result;
use log::{debug, error, info, warn};
#[cfg(feature = "mock")]
use mockall::automock;
use serde::Serialize;
use std::{
    collections::HashMap,
    fmt,
    net::IpAddr,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use tokio::{
    sync::{Mutex as AsyncMutex, OwnedMutexGuard},
    time::{sleep, timeout},
};
use trait_variant::make;
use uuid::Uuid;

/// Writes a configuration to the system and (re)starts the hotspot service
#[make(Send)]
#[cfg_attr(feature = "mock", automock)]
pub trait NetworkApplier {
    async fn apply(&self, config: Configuration) -> Result<()>;
}

/// Durable storage of the last successfully applied configuration
#[make(Send)]
#[cfg_attr(feature = "mock", automock)]
pub trait SettingsStore {
    async fn load(&self) -> Result<Configuration>;
    async fn save(&self, config: Configuration) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyState {
    Idle,
    Validating,
    Rejected,
    PendingConfirmation,
    Applying,
    Applied,
    Failed,
}

impl fmt::Display for ApplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ApplyState::Idle => "idle",
            ApplyState::Validating => "validating",
            ApplyState::Rejected => "rejected",
            ApplyState::PendingConfirmation => "pending confirmation",
            ApplyState::Applying => "applying",
            ApplyState::Applied => "applied",
            ApplyState::Failed => "failed",
        };
        f.write_str(state)
    }
}

/// Terminal result of one submission
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Nothing was touched, the report names the offending fields
    Rejected { report: ValidationReport },
    /// Disruptive change requested over the hotspot itself, resubmit confirmed
    ConfirmationRequired { change: ChangeSet },
    Applied {
        change: ChangeSet,
        status: Option<StatusReport>,
        warnings: Vec<String>,
    },
    Failed {
        error: ApplyError,
        last_status: Option<StatusReport>,
    },
}

impl ApplyOutcome {
    pub fn state(&self) -> ApplyState {
        match self {
            ApplyOutcome::Rejected { .. } => ApplyState::Rejected,
            ApplyOutcome::ConfirmationRequired { .. } => ApplyState::PendingConfirmation,
            ApplyOutcome::Applied { .. } => ApplyState::Applied,
            ApplyOutcome::Failed { .. } => ApplyState::Failed,
        }
    }
}

/// How the apply sequence waits for the hotspot service to come back
#[derive(Clone, Copy, Debug)]
pub struct RecoveryPolicy {
    /// Pause before each fast probe
    pub interval: Duration,
    /// Upper bound of the whole wait
    pub window: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            window: Duration::from_secs(60),
        }
    }
}

/// One lock per radio device, created on first use
#[derive(Default)]
struct DeviceLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Exclusive access to a set of devices, released on drop
struct DeviceGuard {
    devices: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl DeviceGuard {
    fn covers(&self, device: &str) -> bool {
        self.devices.iter().any(|locked| locked == device)
    }
}

impl DeviceLocks {
    /// Lock all `devices` in a stable order so that two sequences touching the
    /// same pair of devices cannot deadlock.
    async fn acquire(&self, devices: impl IntoIterator<Item = String>) -> DeviceGuard {
        let mut devices: Vec<String> = devices.into_iter().collect();
        devices.sort();
        devices.dedup();

        let mut guards = Vec::with_capacity(devices.len());
        for device in &devices {
            let lock = {
                let mut locks = self
                    .locks
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                locks.entry(device.clone()).or_default().clone()
            };
            guards.push(lock.lock_owned().await);
        }

        DeviceGuard {
            devices,
            _guards: guards,
        }
    }

    fn known(&self) -> Vec<String> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

struct Inner<Applier, Store, Source>
where
    Applier: NetworkApplier,
    Store: SettingsStore,
    Source: StatusSource,
{
    applier: Arc<Applier>,
    store: Arc<Store>,
    prober: StatusProber<Source, Store>,
    profiles: ProfileStore,
    risk: SessionRiskDetector,
    recovery: RecoveryPolicy,
    journal: Arc<ApplyJournal>,
    locks: DeviceLocks,
}

/// Drives a submitted configuration from validation to a terminal state
///
/// Sequences on the same radio device are serialized, a later submission
/// waits until the earlier one finished. Once a sequence started applying it
/// runs to completion even if the submitting client goes away.
pub struct ApplyCoordinator<Applier, Store, Source>
where
    Applier: NetworkApplier,
    Store: SettingsStore,
    Source: StatusSource,
{
    inner: Arc<Inner<Applier, Store, Source>>,
}

impl<Applier, Store, Source> Clone for ApplyCoordinator<Applier, Store, Source>
where
    Applier: NetworkApplier,
    Store: SettingsStore,
    Source: StatusSource,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Applier, Store, Source> ApplyCoordinator<Applier, Store, Source>
where
    Applier: NetworkApplier + Send + Sync + 'static,
    Store: SettingsStore + Send + Sync + 'static,
    Source: StatusSource + Send + Sync + 'static,
{
    pub fn new(
        applier: Arc<Applier>,
        store: Arc<Store>,
        prober: StatusProber<Source, Store>,
        profiles: ProfileStore,
        risk: SessionRiskDetector,
        recovery: RecoveryPolicy,
        journal: Arc<ApplyJournal>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                applier,
                store,
                prober,
                profiles,
                risk,
                recovery,
                journal,
                locks: DeviceLocks::default(),
            }),
        }
    }

    pub fn journal(&self) -> &ApplyJournal {
        &self.inner.journal
    }

    /// Wait until no apply sequence holds a device
    ///
    /// Used on shutdown, after the server stopped accepting submissions.
    pub async fn settle(&self) {
        let locks = &self.inner.locks;
        drop(locks.acquire(locks.known()).await);
    }

    /// Run one submission to a terminal state
    ///
    /// # Arguments
    /// * `request` - Submitted configuration and confirmation flag
    /// * `client` - Address of the submitting client, if known
    ///
    /// # Returns
    /// The terminal outcome. `Rejected` and `ConfirmationRequired` leave the
    /// system untouched.
    pub async fn submit(&self, request: ApplyRequest, client: Option<IpAddr>) -> ApplyOutcome {
        let id = Uuid::new_v4();
        let ApplyRequest {
            configuration,
            confirmed,
        } = request;

        info!("apply {id}: {} -> {}", ApplyState::Idle, ApplyState::Validating);

        let report = self.inner.profiles.validate(&configuration);
        if !report.is_valid() {
            info!(
                "apply {id}: {} -> {} ({} errors)",
                ApplyState::Validating,
                ApplyState::Rejected,
                report.errors.len()
            );
            return ApplyOutcome::Rejected { report };
        }

        let (current, guard) = match self.lock_devices(&configuration).await {
            Ok(locked) => locked,
            Err(error) => {
                error!("apply {id}: {error}");
                return ApplyOutcome::Failed {
                    error,
                    last_status: None,
                };
            }
        };

        let change = ProfileStore::diff(&current, &configuration);
        debug!("apply {id}: change {change:?}");

        // judged on the radio in effect, that is the one carrying the session now
        if change.is_disruptive()
            && !confirmed
            && self
                .inner
                .risk
                .is_possibly_self_connected(client, &current.radio)
        {
            info!(
                "apply {id}: {} -> {}",
                ApplyState::Validating,
                ApplyState::PendingConfirmation
            );
            return ApplyOutcome::ConfirmationRequired { change };
        }

        info!("apply {id}: {} -> {}", ApplyState::Validating, ApplyState::Applying);

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let outcome = inner
                .run(id, configuration, change, report.warnings)
                .await;
            drop(guard);
            outcome
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("apply {id}: task aborted: {e}");
                ApplyOutcome::Failed {
                    error: ApplyError::Aborted(e.to_string()),
                    last_status: None,
                }
            }
        }
    }

    /// Lock the device in effect and the requested one
    ///
    /// The current configuration is read again under the lock, if a concurrent
    /// sequence moved the hotspot to another device meanwhile the locks are
    /// taken anew.
    async fn lock_devices(
        &self,
        configuration: &Configuration,
    ) -> Result<(Configuration, DeviceGuard), ApplyError> {
        let mut current = self.inner.store.load().await.map_err(ApplyError::Load)?;

        loop {
            let guard = self
                .inner
                .locks
                .acquire([
                    current.radio.device.clone(),
                    configuration.radio.device.clone(),
                ])
                .await;

            let reloaded = self.inner.store.load().await.map_err(ApplyError::Load)?;
            if guard.covers(&reloaded.radio.device) {
                return Ok((reloaded, guard));
            }

            debug!(
                "device moved from {} to {} while waiting, locking again",
                current.radio.device, reloaded.radio.device
            );
            current = reloaded;
        }
    }
}

impl<Applier, Store, Source> Inner<Applier, Store, Source>
where
    Applier: NetworkApplier + Send + Sync + 'static,
    Store: SettingsStore + Send + Sync + 'static,
    Source: StatusSource + Send + Sync + 'static,
{
    async fn run(
        &self,
        id: Uuid,
        configuration: Configuration,
        change: ChangeSet,
        warnings: Vec<String>,
    ) -> ApplyOutcome {
        let device = configuration.radio.device.clone();

        let outcome = self.apply(id, configuration, change, warnings).await;

        match &outcome {
            ApplyOutcome::Applied { .. } => {
                info!("apply {id}: {} -> {}", ApplyState::Applying, ApplyState::Applied)
            }
            ApplyOutcome::Failed { error, .. } => warn!(
                "apply {id}: {} -> {}: {error}",
                ApplyState::Applying,
                ApplyState::Failed
            ),
            _ => {}
        }

        self.journal.record(ApplyRecord {
            id,
            device,
            state: outcome.state().to_string(),
            message: match &outcome {
                ApplyOutcome::Failed { error, .. } => Some(error.to_string()),
                _ => None,
            },
            finished_at: SystemTime::now(),
            last_status: match &outcome {
                ApplyOutcome::Applied { status, .. } => status.clone(),
                ApplyOutcome::Failed { last_status, .. } => last_status.clone(),
                _ => None,
            },
        });

        outcome
    }

    async fn apply(
        &self,
        id: Uuid,
        configuration: Configuration,
        change: ChangeSet,
        warnings: Vec<String>,
    ) -> ApplyOutcome {
        if change == ChangeSet::NoOp {
            debug!("apply {id}: nothing changed");
            return ApplyOutcome::Applied {
                change,
                status: self.prober.probe(ProbeMode::Fast).await.ok(),
                warnings,
            };
        }

        if let Err(e) = self.applier.apply(configuration.clone()).await {
            return ApplyOutcome::Failed {
                error: ApplyError::Applier(e),
                last_status: self.prober.probe(ProbeMode::Fast).await.ok(),
            };
        }

        let expected = configuration.expects_running();
        let mut last_status = None;

        if timeout(
            self.recovery.window,
            self.await_recovery(id, expected, &mut last_status),
        )
        .await
        .is_err()
        {
            return ApplyOutcome::Failed {
                error: ApplyError::ProbeTimeout {
                    window: self.recovery.window,
                },
                last_status,
            };
        }

        if let Err(e) = self.store.save(configuration).await {
            return ApplyOutcome::Failed {
                error: ApplyError::Persist(e),
                last_status,
            };
        }

        ApplyOutcome::Applied {
            change,
            status: last_status,
            warnings,
        }
    }

    /// Poll fast probes until the service reaches the expected state
    async fn await_recovery(
        &self,
        id: Uuid,
        expected: bool,
        last_status: &mut Option<StatusReport>,
    ) {
        loop {
            sleep(self.recovery.interval).await;

            match self.prober.probe(ProbeMode::Fast).await {
                Ok(report) => {
                    let recovered = report.running == expected;
                    *last_status = Some(report);
                    if recovered {
                        return;
                    }
                    debug!("apply {id}: service not recovered yet");
                }
                Err(e) => debug!("apply {id}: {e}"),
            }
        }
    }
}
