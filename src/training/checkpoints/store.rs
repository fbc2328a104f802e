//! Checkpoint storage on the local filesystem
//!
//! Layout of a run directory:
//!
//! ```text
//! <model_dir>/<num_model>/
//!     model_ckpt_<epoch>.tar   append-only history, one per save
//!     best_model.tar           canonical best, overwritten on improvement
//! ```

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::TrainingState;
use crate::error::{Error, Result};

/// File name of the canonical best record
pub const BEST_CHECKPOINT: &str = "best_model.tar";

const HISTORY_PREFIX: &str = "model_ckpt_";
const HISTORY_SUFFIX: &str = ".tar";
const MAGIC: &[u8; 8] = b"SIAMCKPT";
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct CheckpointRecord {
    format_version: u32,
    saved_at: DateTime<Utc>,
    state: TrainingState,
}

/// A history record found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Epoch tag parsed from the file name
    pub epoch: usize,
    /// Full path of the record
    pub path: PathBuf,
}

/// Parse the epoch out of a `model_ckpt_<epoch>.tar` file name
pub fn parse_history_epoch(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix(HISTORY_PREFIX)?
        .strip_suffix(HISTORY_SUFFIX)?
        .parse()
        .ok()
}

/// Persists and restores [`TrainingState`] snapshots for one run
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at `dir`; nothing is touched until the first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Run directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the canonical best record
    pub fn best_path(&self) -> PathBuf {
        self.dir.join(BEST_CHECKPOINT)
    }

    /// Path of the history record for `epoch`
    pub fn history_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{HISTORY_PREFIX}{epoch}{HISTORY_SUFFIX}"))
    }

    /// Write `state`.
    ///
    /// With `is_best` the canonical best record is replaced; otherwise a new
    /// history record tagged with `state.epoch` is added. History records are
    /// never overwritten. Either way the previous file stays readable until
    /// the new one is completely on disk.
    pub fn save(&self, state: &TrainingState, is_best: bool) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::io(format!("creating {}", self.dir.display()), e))?;

        let path = if is_best {
            self.best_path()
        } else {
            let path = self.history_path(state.epoch);
            if path.exists() {
                return Err(Error::io(
                    format!("writing {}", path.display()),
                    io::Error::new(io::ErrorKind::AlreadyExists, "history records are append-only"),
                ));
            }
            path
        };

        let record = CheckpointRecord {
            format_version: FORMAT_VERSION,
            saved_at: Utc::now(),
            state: state.clone(),
        };
        let mut bytes = MAGIC.to_vec();
        bincode::serialize_into(&mut bytes, &record)
            .map_err(|e| Error::internal(format!("failed to encode checkpoint: {e}")))?;

        write_atomic(&path, &bytes)?;
        debug!(
            "Saved checkpoint {} ({} bytes, epoch {})",
            path.display(),
            bytes.len(),
            state.epoch
        );
        Ok(path)
    }

    /// Read the canonical best record, or the most recent history record
    pub fn load(&self, best: bool) -> Result<TrainingState> {
        let path = if best {
            let path = self.best_path();
            if !path.is_file() {
                return Err(Error::not_found(path));
            }
            path
        } else {
            self.latest()?
                .map(|info| info.path)
                .ok_or_else(|| Error::not_found(&self.dir))?
        };

        let state = self.load_from(&path)?;
        if best {
            info!(
                "Loaded {} checkpoint @ epoch {} with best valid acc of {:.3}",
                BEST_CHECKPOINT, state.epoch, state.best_score
            );
        } else {
            info!(
                "Loaded {} checkpoint @ epoch {}",
                path.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
                state.epoch
            );
        }
        Ok(state)
    }

    /// Read one record by path
    pub fn load_from(&self, path: &Path) -> Result<TrainingState> {
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::not_found(path),
            _ => Error::io(format!("reading {}", path.display()), e),
        })?;

        let payload = bytes
            .strip_prefix(MAGIC.as_slice())
            .ok_or_else(|| Error::corrupt(path, "missing checkpoint header"))?;
        let record: CheckpointRecord =
            bincode::deserialize(payload).map_err(|e| Error::corrupt(path, e))?;

        if record.format_version != FORMAT_VERSION {
            return Err(Error::corrupt(
                path,
                format!("unsupported format version {}", record.format_version),
            ));
        }
        debug!("Read checkpoint {} saved at {}", path.display(), record.saved_at);
        Ok(record.state)
    }

    /// History records ordered by numeric epoch
    pub fn history(&self) -> Result<Vec<CheckpointInfo>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(format!("listing {}", self.dir.display()), e)),
        };

        let mut history = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(format!("listing {}", self.dir.display()), e))?;
            let name = entry.file_name();
            let Some(epoch) = name.to_str().and_then(parse_history_epoch) else {
                continue;
            };
            history.push(CheckpointInfo {
                epoch,
                path: entry.path(),
            });
        }

        history.sort_by_key(|info| info.epoch);
        Ok(history)
    }

    /// History record with the highest epoch tag
    pub fn latest(&self) -> Result<Option<CheckpointInfo>> {
        Ok(self.history()?.pop())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::internal(format!("invalid checkpoint path {}", path.display())))?;
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let written = File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp_path, path));

    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&tmp_path) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!("Could not remove {}: {}", tmp_path.display(), cleanup);
            }
        }
        return Err(Error::io(format!("writing {}", path.display()), e));
    }
    Ok(())
}
