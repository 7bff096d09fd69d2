//! JSON checkpoint files.
//!
//! Loading never fails: a missing file is created from the default and a corrupt one falls back
//! to the default. Saving goes through a temporary sibling and a rename so a reader never sees a
//! half-written checkpoint.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::Result;

/// Load a checkpoint, creating it from `default` when absent.
pub fn load_or_create<T>(path: &Path, default: T) -> T
where
    T: Serialize + DeserializeOwned,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("Could not create checkpoint directory {}: {e}", parent.display());
        }
    }

    if !path.exists() {
        if !save_checkpoint(path, &default) {
            warn!("Could not create checkpoint {}, continuing in memory", path.display());
        }
        return default;
    }

    match read_json::<T>(path) {
        Ok(value) => {
            debug!("Loaded checkpoint {}", path.display());
            value
        }
        Err(e) => {
            warn!("Couldn't parse JSON from {}, starting from default: {e}", path.display());
            default
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Atomically replace the checkpoint at `path`. Returns `false` (logged) on any failure.
pub fn save_checkpoint<T: Serialize + ?Sized>(path: &Path, data: &T) -> bool {
    match write_atomic(path, data) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to save checkpoint to {}: {e}", path.display());
            false
        }
    }
}

pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_atomic<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        serde_json::to_writer(&mut file, data)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// A checkpoint path together with its in-memory value.
#[derive(Debug)]
pub struct CheckpointFile<T> {
    path: PathBuf,
    data: T,
}

impl<T> CheckpointFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn load_or_create(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = load_or_create(&path, T::default());
        Self { path, data }
    }

    pub fn save(&self) -> bool {
        save_checkpoint(&self.path, &self.data)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }
}
