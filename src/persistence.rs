//! Snapshot persistence for restart recovery.
//!
//! The orchestrator's complete job and worker state is written periodically
//! as one JSON document. On startup the latest snapshot, if any, replaces the
//! empty in-memory state; assignments held by workers that never come back
//! are reclaimed by the normal health sweep.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::scheduler::job::Job;
use crate::scheduler::worker::Worker;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub jobs: Vec<Job>,
    pub workers: Vec<Worker>,
    #[serde(default)]
    pub reclaimed_total: u64,
}

impl Snapshot {
    pub fn new(
        saved_at: DateTime<Utc>,
        jobs: Vec<Job>,
        workers: Vec<Worker>,
        reclaimed_total: u64,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            jobs,
            workers,
            reclaimed_total,
        }
    }

    pub fn check_version(&self) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(OrchestratorError::InvalidConfig(format!(
                "unsupported snapshot version {} (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }
        Ok(())
    }
}

/// Where snapshots are kept.
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &Snapshot) -> Result<()>;

    /// `Ok(None)` when there is nothing to restore.
    fn load(&self) -> Result<Option<Snapshot>>;
}

/// Single JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, snapshot)?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            jobs = snapshot.jobs.len(),
            workers = snapshot.workers.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    /// A file that fails to parse is moved aside to `.bak` and treated as
    /// absent, so a torn or hand-edited snapshot never blocks startup.
    fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let reader = BufReader::new(File::open(&self.path)?);
        match serde_json::from_reader::<_, Snapshot>(reader) {
            Ok(snapshot) => {
                snapshot.check_version()?;
                Ok(Some(snapshot))
            }
            Err(e) => {
                let bak_path = self.path.with_extension("bak");
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    bak = %bak_path.display(),
                    "Corrupt snapshot, moving aside and starting fresh"
                );
                fs::rename(&self.path, &bak_path)?;
                Ok(None)
            }
        }
    }
}
