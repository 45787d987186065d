// ── Persisted state directory ──
//
// Planner and reload state live side by side as JSON files. Writes go
// through a temp file and a rename so a crash never leaves half a file.
// An advisory lock on a lock file serializes runs that share the directory.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use fs2::{FileExt, lock_contended_error};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::reload::ReloadState;
use crate::shard::PlannerState;

const PLANNER_FILE: &str = "planner_state.json";
const RELOAD_FILE: &str = "reload_state.json";
const LOCK_FILE: &str = "shapeplan.lock";

#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn planner_path(&self) -> PathBuf {
        self.root.join(PLANNER_FILE)
    }

    pub fn reload_path(&self) -> PathBuf {
        self.root.join(RELOAD_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    fn ensure(&self) -> Result<(), CoreError> {
        fs::create_dir_all(&self.root).map_err(|e| CoreError::io(&self.root, e))
    }

    /// Take the exclusive run lock without waiting.
    ///
    /// The lock is an advisory lock on a file that is never removed, so the
    /// kernel drops it when the holder exits, however it exits.
    pub fn lock(&self) -> Result<StateLock, CoreError> {
        self.ensure()?;
        let path = self.lock_path();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CoreError::io(&path, e))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() != lock_contended_error().kind() {
                return Err(CoreError::io(&path, e));
            }
            let mut pid = String::new();
            let _ = file.read_to_string(&mut pid);
            let pid = match pid.trim() {
                "" => String::from("unknown"),
                held => held.to_owned(),
            };
            return Err(CoreError::StateLocked { path, pid });
        }

        file.set_len(0).map_err(|e| CoreError::io(&path, e))?;
        write!(file, "{}", std::process::id()).map_err(|e| CoreError::io(&path, e))?;
        debug!(path = %path.display(), "state lock acquired");
        Ok(StateLock { path, file })
    }

    pub fn load_planner_state(&self) -> Result<Option<PlannerState>, CoreError> {
        read_json(&self.planner_path())
    }

    pub fn save_planner_state(&self, state: &PlannerState) -> Result<(), CoreError> {
        self.ensure()?;
        write_json_atomic(&self.planner_path(), state)
    }

    pub fn load_reload_state(&self) -> Result<Option<ReloadState>, CoreError> {
        read_json(&self.reload_path())
    }

    pub fn save_reload_state(&self, state: &ReloadState) -> Result<(), CoreError> {
        self.ensure()?;
        write_json_atomic(&self.reload_path(), state)
    }
}

/// Held for the duration of a run; the lock is released on drop.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    file: File,
}

impl StateLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release state lock");
        }
    }
}

/// Missing files read as `None`; unreadable JSON is logged and treated as
/// missing so a corrupt file costs one full rebuild, not a dead shaper.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CoreError::io(path, e)),
    };
    match serde_json::from_str(&text) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable state file");
            Ok(None)
        }
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CoreError> {
    let json = serde_json::to_string_pretty(value).map_err(CoreError::StateEncode)?;
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp).map_err(|e| CoreError::io(&tmp, e))?;
    file.write_all(json.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| CoreError::io(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| CoreError::io(path, e))
}
