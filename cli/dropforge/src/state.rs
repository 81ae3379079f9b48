//! Durable per-target state.
//!
//! Two files survive across process runs, both under a directory scoped to
//! the provisioning target:
//!
//! - `keyFingerprint`: the fingerprint of the transient SSH key, written
//!   right after key upload/reuse and removed only after a fully successful
//!   pass. Its existence is the sole signal that SSH reachability has not
//!   yet been verified for the current VM incarnation.
//! - `last-run.json`: the result of the previous successful run, consulted
//!   by the skip rule.
//!
//! Everything else is re-derived from the provider on every invocation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::provision::ProvisionStatus;

const FINGERPRINT_FILE: &str = "keyFingerprint";
const RUN_RECORD_FILE: &str = "last-run.json";

/// Handle on one target's state directory.
#[derive(Debug, Clone)]
pub struct TargetState {
    dir: PathBuf,
}

impl TargetState {
    /// State directory for a named target under the user data dir.
    pub fn for_target(name: &str) -> Result<Self> {
        let dirs = ProjectDirs::from("io", "dropforge", "dropforge")
            .context("could not determine state directory")?;
        Ok(Self {
            dir: dirs.data_dir().join("targets").join(name),
        })
    }

    /// State rooted at an explicit directory (tests, `--state-dir`).
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn fingerprint_path(&self) -> PathBuf {
        self.dir.join(FINGERPRINT_FILE)
    }

    fn run_record_path(&self) -> PathBuf {
        self.dir.join(RUN_RECORD_FILE)
    }

    /// Whether the cached fingerprint file exists.
    pub fn fingerprint_exists(&self) -> bool {
        self.fingerprint_path().exists()
    }

    /// Read the cached fingerprint.
    pub fn read_fingerprint(&self) -> Result<String> {
        let path = self.fingerprint_path();
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read fingerprint cache: {}", path.display()))?;
        Ok(contents.trim().to_string())
    }

    /// Persist the fingerprint. Written before any operation that could
    /// fail partway, so a crash mid-run forces re-verification.
    pub fn write_fingerprint(&self, fingerprint: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create state dir: {}", self.dir.display()))?;
        let path = self.fingerprint_path();
        std::fs::write(&path, fingerprint)
            .with_context(|| format!("failed to write fingerprint cache: {}", path.display()))
    }

    /// Remove the fingerprint cache.
    pub fn remove_fingerprint(&self) -> Result<()> {
        let path = self.fingerprint_path();
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove fingerprint cache: {}", path.display()))
    }

    /// Load the previous run's record, if any.
    pub fn load_run_record(&self) -> Result<Option<RunRecord>> {
        let path = self.run_record_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read run record: {}", path.display()))?;
        let record = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse run record: {}", path.display()))?;
        Ok(Some(record))
    }

    /// Save the run record.
    pub fn save_run_record(&self, record: &RunRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create state dir: {}", self.dir.display()))?;
        let path = self.run_record_path();
        let contents = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write run record: {}", path.display()))
    }
}

/// Outcome of the previous provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Provider id of the droplet that was provisioned.
    pub droplet_id: u64,

    pub status: ProvisionStatus,

    pub provisioned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = TargetState::at(dir.path().join("alpha"));

        assert!(!state.fingerprint_exists());
        state.write_fingerprint("3b:16:bf:e4").unwrap();
        assert!(state.fingerprint_exists());
        assert_eq!(state.read_fingerprint().unwrap(), "3b:16:bf:e4");

        state.remove_fingerprint().unwrap();
        assert!(!state.fingerprint_exists());
    }

    #[test]
    fn run_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = TargetState::at(dir.path().join("alpha"));

        assert!(state.load_run_record().unwrap().is_none());

        let record = RunRecord {
            droplet_id: 3164444,
            status: ProvisionStatus::Provisioned,
            provisioned_at: Utc::now(),
        };
        state.save_run_record(&record).unwrap();

        let loaded = state.load_run_record().unwrap().unwrap();
        assert_eq!(loaded.droplet_id, 3164444);
        assert_eq!(loaded.status, ProvisionStatus::Provisioned);
    }
}
