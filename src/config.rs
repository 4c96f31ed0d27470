use anyhow::{Context, Result, ensure};
use ipnetwork::IpNetwork;
use std::{env, path::PathBuf, sync::OnceLock, time::Duration};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// UI server configuration
    pub ui: UiConfig,

    /// TLS certificate configuration, plain HTTP if absent
    pub certificate: Option<CertificateConfig>,

    /// Hotspot service and system paths
    pub hotspot: HotspotConfig,

    /// Probe timeouts and recovery polling
    pub probe: ProbeConfig,

    /// Path configuration
    pub paths: PathConfig,
}

#[derive(Clone, Debug)]
pub struct UiConfig {
    pub port: u16,
    /// Take the client address from `Forwarded`/`X-Forwarded-For`
    pub trust_proxy_headers: bool,
}

#[derive(Clone, Debug)]
pub struct CertificateConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct HotspotConfig {
    pub service: String,
    pub hostapd_conf: PathBuf,
    pub networkd_dir: PathBuf,
    pub sys_class_net: PathBuf,
    /// Networks handed to hotspot clients, profile n is served from the n-th IPv4 one
    pub served_networks: Vec<IpNetwork>,
}

#[derive(Clone, Debug)]
pub struct ProbeConfig {
    pub fast_timeout: Duration,
    pub full_timeout: Duration,
    pub recovery_interval: Duration,
    pub recovery_window: Duration,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub data_dir: PathBuf,
    pub settings_file: PathBuf,
    pub history_file: PathBuf,
}

impl AppConfig {
    /// Get or load the application configuration
    ///
    /// Returns a reference to the cached configuration. On first call, it loads
    /// and validates all configuration from environment variables. Subsequent
    /// calls return the cached instance.
    ///
    /// # Panics
    /// Panics if configuration loading fails. This is intentional as the
    /// application cannot function without valid configuration.
    pub fn get() -> &'static Self {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();
        APP_CONFIG.get_or_init(|| {
            Self::load_internal().expect("failed to load application configuration")
        })
    }

    fn load_internal() -> Result<Self> {
        Ok(Self {
            ui: UiConfig::load()?,
            certificate: CertificateConfig::load()?,
            hotspot: HotspotConfig::load()?,
            probe: ProbeConfig::load()?,
            paths: PathConfig::load()?,
        })
    }
}

impl UiConfig {
    fn load() -> Result<Self> {
        let port = env::var("UI_PORT")
            .unwrap_or_else(|_| "1977".to_string())
            .parse::<u16>()
            .context("failed to parse UI_PORT: invalid format")?;

        let trust_proxy_headers = match env::var("TRUST_PROXY_HEADERS") {
            Ok(value) => parse_bool(&value).context("failed to parse TRUST_PROXY_HEADERS")?,
            Err(_) => false,
        };

        Ok(Self {
            port,
            trust_proxy_headers,
        })
    }
}

impl CertificateConfig {
    fn load() -> Result<Option<Self>> {
        match (env::var("CERT_PATH"), env::var("KEY_PATH")) {
            (Ok(cert_path), Ok(key_path)) => Ok(Some(Self {
                cert_path: cert_path.into(),
                key_path: key_path.into(),
            })),
            (Err(_), Err(_)) => Ok(None),
            _ => anyhow::bail!("failed to load certificate: CERT_PATH and KEY_PATH must be set together"),
        }
    }
}

impl HotspotConfig {
    const DEFAULT_SERVED_NETWORKS: &str = "10.0.242.0/24,10.0.243.0/24,10.0.244.0/24,10.0.245.0/24";

    fn load() -> Result<Self> {
        let service = env::var("HOTSPOT_SERVICE").unwrap_or_else(|_| "hostapd".to_string());
        let hostapd_conf = env::var("HOSTAPD_CONF")
            .unwrap_or_else(|_| "/etc/hostapd/hostapd.conf".to_string())
            .into();
        let networkd_dir = env::var("NETWORKD_DIR")
            .unwrap_or_else(|_| "/etc/systemd/network".to_string())
            .into();
        let sys_class_net = env::var("SYS_CLASS_NET")
            .unwrap_or_else(|_| "/sys/class/net".to_string())
            .into();
        let served_networks = parse_served_networks(
            &env::var("HOTSPOT_SERVED_NETWORKS")
                .unwrap_or_else(|_| Self::DEFAULT_SERVED_NETWORKS.to_string()),
        )
        .context("failed to parse HOTSPOT_SERVED_NETWORKS")?;

        Ok(Self {
            service,
            hostapd_conf,
            networkd_dir,
            sys_class_net,
            served_networks,
        })
    }

    /// Number of profiles that can be served at once
    pub fn max_profiles(&self) -> usize {
        self.served_networks
            .iter()
            .filter(|network| network.is_ipv4())
            .count()
    }
}

impl ProbeConfig {
    fn load() -> Result<Self> {
        Self {
            fast_timeout: duration_ms("FAST_PROBE_TIMEOUT_MS", 2_000)?,
            full_timeout: duration_ms("FULL_PROBE_TIMEOUT_MS", 30_000)?,
            recovery_interval: duration_ms("RECOVERY_POLL_INTERVAL_MS", 2_000)?,
            recovery_window: duration_ms("RECOVERY_WINDOW_MS", 60_000)?,
        }
        .checked()
    }

    fn checked(self) -> Result<Self> {
        ensure!(
            self.recovery_interval < self.recovery_window,
            "RECOVERY_POLL_INTERVAL_MS must be shorter than RECOVERY_WINDOW_MS"
        );
        Ok(self)
    }
}

impl PathConfig {
    fn load() -> Result<Self> {
        let data_dir: PathBuf = env::var("DATA_DIR")
            .unwrap_or_else(|_| "/data".to_string())
            .into();

        std::fs::create_dir_all(&data_dir).context("failed to create data directory")?;

        Ok(Self {
            settings_file: data_dir.join("settings.json"),
            history_file: data_dir.join("apply_history.json"),
            data_dir,
        })
    }
}

fn duration_ms(var: &str, default: u64) -> Result<Duration> {
    match env::var(var) {
        Ok(value) => parse_duration_ms(&value).context(format!("failed to parse {var}")),
        Err(_) => Ok(Duration::from_millis(default)),
    }
}

fn parse_duration_ms(value: &str) -> Result<Duration> {
    let millis = value
        .trim()
        .parse::<u64>()
        .context(format!("invalid milliseconds '{value}'"))?;

    ensure!(millis > 0, "duration must be positive");
    Ok(Duration::from_millis(millis))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("invalid boolean '{other}'"),
    }
}

/// Parse a comma separated list of networks in CIDR notation
fn parse_served_networks(value: &str) -> Result<Vec<IpNetwork>> {
    let networks = value
        .split(',')
        .map(str::trim)
        .filter(|network| !network.is_empty())
        .map(|network| {
            network
                .parse::<IpNetwork>()
                .context(format!("invalid network '{network}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    ensure!(
        networks.iter().any(IpNetwork::is_ipv4),
        "at least one IPv4 network is required"
    );

    Ok(networks)
}
