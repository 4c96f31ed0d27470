use super::run;
use crate::{
    hotspot::{Configuration, SsidProfile, is_settable_flag},
    services::apply::NetworkApplier,
};
use anyhow::{Context, Result, ensure};
use ini::Ini;
use ipnetwork::{IpNetwork, Ipv4Network};
use log::{debug, info, warn};
use std::{
    fmt::Write as _,
    fs,
    io::{ErrorKind, Write},
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

const UNIT_PREFIX: &str = "10-hotspot-";
const UNIT_SUFFIX: &str = ".network";

/// Applies hotspot configurations with hostapd and systemd-networkd
///
/// The first profile is broadcast on the radio device itself, every further
/// profile on a virtual interface `<device>_<n>`. Each interface gets the
/// gateway address of its own served IPv4 network.
#[derive(Clone, Debug)]
pub struct HostapdApplier {
    conf_path: PathBuf,
    networkd_dir: PathBuf,
    service: String,
    networks: Vec<Ipv4Network>,
}

impl HostapdApplier {
    /// # Arguments
    /// * `conf_path` - hostapd configuration file
    /// * `networkd_dir` - Directory of the systemd-networkd units
    /// * `service` - systemd unit running hostapd
    /// * `served` - Networks handed to hotspot clients, only IPv4 ones are used
    pub fn new(
        conf_path: impl Into<PathBuf>,
        networkd_dir: impl Into<PathBuf>,
        service: impl Into<String>,
        served: &[IpNetwork],
    ) -> Self {
        Self {
            conf_path: conf_path.into(),
            networkd_dir: networkd_dir.into(),
            service: service.into(),
            networks: served
                .iter()
                .filter_map(|network| match network {
                    IpNetwork::V4(network) => Some(*network),
                    IpNetwork::V6(_) => None,
                })
                .collect(),
        }
    }

    fn unit_path(&self, interface: &str) -> PathBuf {
        self.networkd_dir
            .join(format!("{UNIT_PREFIX}{interface}{UNIT_SUFFIX}"))
    }

    /// Write hostapd configuration and network units
    ///
    /// # Returns
    /// All written files, each with a backup of its previous content next to it
    fn write_files(&self, config: &Configuration) -> Result<Vec<PathBuf>> {
        ensure!(
            config.profiles.len() <= self.networks.len(),
            "failed to assign networks: {} profiles but only {} served networks",
            config.profiles.len(),
            self.networks.len()
        );

        let mut written = vec![];

        backup(&self.conf_path)?;
        write_atomically(&self.conf_path, render_hostapd_conf(config).as_bytes())?;
        written.push(self.conf_path.clone());

        for (index, network) in self.networks.iter().take(config.profiles.len()).enumerate() {
            let interface = config.interface_name(index);
            let path = self.unit_path(&interface);
            let mut unit = vec![];

            render_network_unit(&interface, network)
                .write_to(&mut unit)
                .context(format!("failed to render network unit for {interface}"))?;

            backup(&path)?;
            write_atomically(&path, &unit)?;
            written.push(path);
        }

        let keep: Vec<_> = written.iter().collect();
        self.remove_units(|path| !keep.contains(&path))?;

        Ok(written)
    }

    /// Delete hotspot network units matching `filter`, keeping a backup
    fn remove_units(&self, filter: impl Fn(&PathBuf) -> bool) -> Result<()> {
        let entries = match fs::read_dir(&self.networkd_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e).context(format!("failed to read {:?}", self.networkd_dir));
            }
        };

        for entry in entries {
            let path = entry.context("failed to read network unit entry")?.path();
            let name = path.file_name().unwrap_or_default().to_string_lossy();

            if name.starts_with(UNIT_PREFIX) && name.ends_with(UNIT_SUFFIX) && filter(&path) {
                debug!("removing stale unit {path:?}");
                rename_if_exists(&path, &backup_path(&path))?;
            }
        }

        Ok(())
    }

    async fn reload(&self, restart: bool) -> Result<()> {
        run("networkctl", &["reload"]).await?;

        if restart {
            run("systemctl", &["restart", &self.service]).await?;
        } else {
            run("systemctl", &["stop", &self.service]).await?;
        }

        Ok(())
    }
}

impl NetworkApplier for HostapdApplier {
    async fn apply(&self, config: Configuration) -> Result<()> {
        if !config.expects_running() {
            info!("stopping {}", self.service);
            self.remove_units(|_| true)?;
            return self.reload(false).await;
        }

        let written = self.write_files(&config)?;
        debug!("written {written:?}");

        // previous files stay next to the new ones as *.old for manual recovery
        self.reload(true).await?;

        info!(
            "{} restarted with {} profiles on {}",
            self.service,
            config.profiles.len(),
            config.radio.device
        );
        Ok(())
    }
}

fn gateway(network: &Ipv4Network) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(network.network()).saturating_add(1))
}

fn render_hostapd_conf(config: &Configuration) -> String {
    let mut conf = String::new();

    let _ = writeln!(conf, "interface={}", config.radio.device);
    conf.push_str("driver=nl80211\nctrl_interface=/run/hostapd\nhw_mode=g\n");
    let _ = writeln!(conf, "channel={}", config.radio.channel);

    for (index, profile) in config.profiles.iter().enumerate() {
        if index > 0 {
            let _ = writeln!(conf, "\nbss={}", config.interface_name(index));
        }
        render_profile(&mut conf, profile);
    }

    conf
}

fn render_profile(conf: &mut String, profile: &SsidProfile) {
    // extra flags first, the fixed keys below always win
    for (flag, enabled) in &profile.flags {
        if is_settable_flag(flag) {
            let _ = writeln!(conf, "{flag}={}", u8::from(*enabled));
        } else {
            warn!("ignoring flag '{flag}' of profile {}", profile.id);
        }
    }

    let _ = writeln!(conf, "ssid={}", profile.ssid);
    let _ = writeln!(conf, "ignore_broadcast_ssid={}", u8::from(profile.hidden));
    let _ = writeln!(conf, "ap_isolate={}", u8::from(profile.isolate_clients));

    if !profile.is_open() {
        conf.push_str("wpa=2\nwpa_key_mgmt=WPA-PSK\nrsn_pairwise=CCMP\n");
        let _ = writeln!(conf, "wpa_passphrase={}", profile.passphrase);
    }
}

fn render_network_unit(interface: &str, network: &Ipv4Network) -> Ini {
    let mut ini = Ini::new();

    ini.with_section(Some("Match")).set("Name", interface);
    ini.with_section(Some("Network"))
        .set("Address", format!("{}/{}", gateway(network), network.prefix()))
        .set("ConfigureWithoutCarrier", "yes")
        .set("DHCPServer", "yes");

    ini
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".old");
    path.with_file_name(name)
}

/// Save the current content of `path`, a missing file leaves no stale backup
fn backup(path: &Path) -> Result<()> {
    if !copy_if_exists(path, &backup_path(path))? {
        remove_if_exists(&backup_path(path))?;
    }
    Ok(())
}

fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp).context(format!("failed to create {tmp:?}"))?;
    file.write_all(content)
        .context(format!("failed to write {tmp:?}"))?;
    file.sync_all().context(format!("failed to sync {tmp:?}"))?;

    fs::rename(&tmp, path).context(format!("failed to rename {tmp:?} to {path:?}"))
}

/// # Returns
/// true if the copy happened, false if `src` did not exist
fn copy_if_exists(src: &Path, dest: &Path) -> Result<bool> {
    match fs::copy(src, dest) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).context(format!("failed to copy {src:?} to {dest:?}")),
    }
}

/// # Returns
/// true if the rename happened, false if `src` did not exist
fn rename_if_exists(src: &Path, dest: &Path) -> Result<bool> {
    match fs::rename(src, dest) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).context(format!("failed to rename {src:?} to {dest:?}")),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(format!("failed to remove {path:?}")),
    }
}
