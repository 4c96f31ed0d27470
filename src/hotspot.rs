//! Hotspot configuration model
//!
//! Plain data shared by the profile store, the status prober and the apply
//! coordinator. Nothing in here performs I/O.

use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::{collections::BTreeMap, fmt, time::SystemTime};
use uuid::Uuid;

pub const DEFAULT_CHANNEL: i64 = 6;

/// Opaque identifier of a broadcast profile
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProfileId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RadioConfig {
    pub enabled: bool,
    #[serde(default)]
    pub device: String,
    /// Any integer is accepted here, the range is a validation rule
    #[validate(minimum = 1)]
    #[validate(maximum = 11)]
    pub channel: i64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device: String::new(),
            channel: DEFAULT_CHANNEL,
        }
    }
}

/// One broadcast network identity
///
/// An empty passphrase means an open network. `flags` carries per-profile
/// switches that are not modelled explicitly; they take part in change
/// detection and persistence. Only keys passing [`is_settable_flag`] are
/// accepted.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SsidProfile {
    #[serde(default = "ProfileId::generate")]
    pub id: ProfileId,
    #[validate(min_length = 1)]
    pub ssid: String,
    #[serde(default)]
    #[validate(max_length = 63)]
    pub passphrase: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub isolate_clients: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, bool>,
}

/// hostapd keys owned by the fields above or by the radio section
const RESERVED_FLAGS: &[&str] = &[
    "ap_isolate",
    "bss",
    "channel",
    "ctrl_interface",
    "driver",
    "hw_mode",
    "ignore_broadcast_ssid",
    "interface",
];
const RESERVED_FLAG_PREFIXES: &[&str] = &["wpa", "rsn_", "ieee8021x", "auth_algs", "ssid"];

/// Whether `key` may be set through [`SsidProfile::flags`]
///
/// Plain identifiers only, and nothing that would override the security or
/// identity settings of a profile.
pub fn is_settable_flag(key: &str) -> bool {
    !key.is_empty()
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED_FLAGS.contains(&key)
        && !RESERVED_FLAG_PREFIXES
            .iter()
            .any(|prefix| key.starts_with(prefix))
}

impl SsidProfile {
    pub fn new(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            id: ProfileId::generate(),
            ssid: ssid.into(),
            passphrase: passphrase.into(),
            hidden: false,
            isolate_clients: false,
            flags: BTreeMap::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.passphrase.is_empty()
    }
}

/// Aggregate root of the hotspot settings
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[validate]
    pub radio: RadioConfig,
    #[serde(default)]
    #[validate]
    pub profiles: Vec<SsidProfile>,
}

impl Configuration {
    pub fn profile(&self, id: &ProfileId) -> Option<&SsidProfile> {
        self.profiles.iter().find(|profile| &profile.id == id)
    }

    /// Name of the interface serving the profile at `index`
    ///
    /// The first profile runs on the device itself, further ones on
    /// `<device>_<index>`.
    pub fn interface_name(&self, index: usize) -> String {
        if index == 0 {
            self.radio.device.clone()
        } else {
            format!("{}_{index}", self.radio.device)
        }
    }

    /// Enabled but without anything to broadcast
    pub fn is_inert(&self) -> bool {
        self.radio.enabled && self.profiles.is_empty()
    }

    /// Whether the hotspot service is expected to run with this configuration
    pub fn expects_running(&self) -> bool {
        self.radio.enabled && !self.profiles.is_empty()
    }
}

/// One form submission
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    pub configuration: Configuration,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    #[default]
    Fast,
    Full,
}

impl fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeMode::Fast => write!(f, "fast"),
            ProbeMode::Full => write!(f, "full"),
        }
    }
}

/// Snapshot of the hotspot service health, never persisted as settings
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub mode: ProbeMode,
    pub running: bool,
    pub detail: BTreeMap<String, String>,
    pub timestamp: SystemTime,
}

impl StatusReport {
    pub fn new(mode: ProbeMode, running: bool, detail: BTreeMap<String, String>) -> Self {
        Self {
            mode,
            running,
            detail,
            timestamp: SystemTime::now(),
        }
    }
}
