//! Host implementations of the service collaborators
//!
//! The hotspot is run by `hostapd` under systemd, addresses on the hotspot
//! interfaces are handed to systemd-networkd and radio state is read with `iw`.

pub mod devices;
pub mod hostapd;
pub mod settings;
pub mod status;

use anyhow::{Context, Result, ensure};
use log::debug;
use std::process::Output;
use tokio::process::Command;

/// Run a system command to completion
///
/// The child is killed if the returned future is dropped, e.g. when a probe
/// times out.
async fn command_output(program: &str, args: &[&str]) -> Result<Output> {
    debug!("{program} {}", args.join(" "));

    Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .context(format!("failed to execute {program}"))
}

/// Run a system command and fail unless it exits successfully
///
/// # Returns
/// Standard output of the command
async fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = command_output(program, args).await?;

    ensure!(
        output.status.success(),
        "{program} {} failed with {}: {}",
        args.join(" "),
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    );

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
