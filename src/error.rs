use crate::hotspot::ProbeMode;
use std::time::Duration;
use thiserror::Error;

/// Terminal failures of an apply sequence
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to apply configuration: {0:#}")]
    Applier(anyhow::Error),

    #[error("hotspot service did not recover within {}s", .window.as_secs())]
    ProbeTimeout { window: Duration },

    #[error("failed to persist configuration: {0:#}")]
    Persist(anyhow::Error),

    #[error("failed to load current configuration: {0:#}")]
    Load(anyhow::Error),

    #[error("apply task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{mode} status probe timed out after {}ms", .after.as_millis())]
    Timeout { mode: ProbeMode, after: Duration },
}
