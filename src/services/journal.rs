use crate::hotspot::StatusReport;
use anyhow::{Context, Result};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::RwLock,
    time::SystemTime,
};
use uuid::Uuid;

/// Outcome of one finished apply sequence
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRecord {
    pub id: Uuid,
    pub device: String,
    pub state: String,
    pub message: Option<String>,
    pub finished_at: SystemTime,
    pub last_status: Option<StatusReport>,
}

/// Bounded history of finished apply sequences, newest last
pub struct ApplyJournal {
    path: Option<PathBuf>,
    records: RwLock<VecDeque<ApplyRecord>>,
}

impl ApplyJournal {
    pub const CAPACITY: usize = 16;

    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(VecDeque::new()),
        }
    }

    /// Open a journal persisted at `path`
    ///
    /// A missing file starts an empty journal. An unreadable one is logged and
    /// replaced with the next record.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let records = match Self::read(&path) {
            Ok(records) => records,
            Err(e) => {
                warn!("discarding apply history: {e:#}");
                VecDeque::new()
            }
        };

        Self {
            path: Some(path),
            records: RwLock::new(records),
        }
    }

    pub fn record(&self, record: ApplyRecord) {
        let snapshot = {
            let Ok(mut records) = self.records.write() else {
                error!("failed to record apply: history lock poisoned");
                return;
            };

            records.push_back(record);
            while records.len() > Self::CAPACITY {
                records.pop_front();
            }
            records.clone()
        };

        if let Some(path) = &self.path {
            if let Err(e) = Self::write(path, &snapshot) {
                error!("failed to persist apply history: {e:#}");
            }
        }
    }

    /// All records, newest first
    pub fn records(&self) -> Vec<ApplyRecord> {
        self.records
            .read()
            .map(|records| records.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<ApplyRecord> {
        self.records
            .read()
            .ok()
            .and_then(|records| records.back().cloned())
    }

    fn read(path: &Path) -> Result<VecDeque<ApplyRecord>> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .context(format!("failed to parse apply history {path:?}")),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(VecDeque::new()),
            Err(e) => Err(e).context(format!("failed to read apply history {path:?}")),
        }
    }

    fn write(path: &Path, records: &VecDeque<ApplyRecord>) -> Result<()> {
        let json =
            serde_json::to_string_pretty(records).context("failed to serialize apply history")?;
        let tmp = path.with_extension("json.tmp");

        fs::write(&tmp, json).context(format!("failed to write {tmp:?}"))?;
        fs::rename(&tmp, path).context(format!("failed to rename {tmp:?} to {path:?}"))
    }
}
