//! File-backed execution bus.
//!
//! Writes each applied program as JSON into an output directory for an
//! external applier to pick up: `full.json` for a rebuild, numbered
//! `patch-NNNNNN.json` files for incremental runs since the last rebuild.
//! Patch numbers only grow until the next rebuild.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use shapeplan_core::{CoreError, ExecutionBus, Patch, QueueBatch};

const FULL_FILE: &str = "full.json";
const PATCH_PREFIX: &str = "patch-";
/// Last patch number handed out since the rebuild.
const SEQUENCE_FILE: &str = ".patch-seq";

#[derive(Debug)]
pub struct FileBus {
    dir: PathBuf,
}

impl FileBus {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn ensure(&self) -> Result<(), CoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| unavailable(&self.dir, &e))
    }

    fn patch_files(&self) -> Result<Vec<PathBuf>, CoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| unavailable(&self.dir, &e))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(PATCH_PREFIX))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Highest patch number handed out, on disk or recorded. Consumed
    /// patches being deleted never makes a number come round again.
    fn last_patch_number(&self) -> Result<u64, CoreError> {
        let recorded: u64 = fs::read_to_string(self.dir.join(SEQUENCE_FILE))
            .ok()
            .and_then(|text| text.trim().parse().ok())
            .unwrap_or(0);
        let on_disk: u64 = self
            .patch_files()?
            .iter()
            .filter_map(|p| p.file_stem()?.to_str()?.strip_prefix(PATCH_PREFIX)?.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok(recorded.max(on_disk))
    }
}

impl ExecutionBus for FileBus {
    fn apply_full(&mut self, batch: &QueueBatch) -> Result<(), CoreError> {
        self.ensure()?;
        // a rebuild supersedes every earlier patch
        for stale in self.patch_files()? {
            fs::remove_file(&stale).map_err(|e| unavailable(&stale, &e))?;
        }
        let sequence = self.dir.join(SEQUENCE_FILE);
        if sequence.exists() {
            fs::remove_file(&sequence).map_err(|e| unavailable(&sequence, &e))?;
        }
        let path = self.dir.join(FULL_FILE);
        write_atomic(&path, batch)?;
        info!(path = %path.display(), operations = batch.operations.len(), "full program written");
        Ok(())
    }

    fn apply_patch(&mut self, patch: &Patch) -> Result<(), CoreError> {
        self.ensure()?;
        let sequence = self.last_patch_number()? + 1;
        let path = self.dir.join(format!("{PATCH_PREFIX}{sequence:06}.json"));
        write_atomic(&path, patch)?;
        let record = self.dir.join(SEQUENCE_FILE);
        fs::write(&record, sequence.to_string()).map_err(|e| unavailable(&record, &e))?;
        debug!(path = %path.display(), operations = patch.operations.len(), "patch written");
        Ok(())
    }
}

fn unavailable(path: &Path, err: &dyn std::fmt::Display) -> CoreError {
    CoreError::BusUnavailable {
        reason: format!("{}: {err}", path.display()),
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CoreError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| unavailable(path, &e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| unavailable(&tmp, &e))?;
    fs::rename(&tmp, path).map_err(|e| unavailable(path, &e))
}
