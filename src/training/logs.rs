//! Append-only CSV log sinks
//!
//! `train.csv` receives `global_step,loss` rows and `valid.csv` receives
//! `epoch,accuracy` rows. No header; every row is flushed as it is written.

use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// File name of the per-batch training log
pub const TRAIN_LOG: &str = "train.csv";
/// File name of the per-epoch validation log
pub const VALID_LOG: &str = "valid.csv";

/// One append-only two-column CSV file
pub struct CsvSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl CsvSink {
    /// Open `path`, truncating unless `append` is set
    pub fn open(path: impl Into<PathBuf>, append: bool) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .map_err(|e| Error::io(format!("opening log {}", path.display()), e))?;

        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Sink location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row
    pub fn append(&mut self, key: impl Display, value: impl Display) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::internal(format!("log {} already closed", self.path.display())))?;

        writeln!(writer, "{key},{value}")
            .and_then(|()| writer.flush())
            .map_err(|e| Error::io(format!("writing log {}", self.path.display()), e))
    }

    /// Flush and release the file; later calls are no-ops
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .and_then(|()| writer.get_ref().sync_all())
                .map_err(|e| Error::io(format!("closing log {}", self.path.display()), e))?;
        }
        Ok(())
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

/// Training and validation sinks of one run
pub struct LogSinks {
    /// `(global_step, loss)` rows
    pub train: CsvSink,
    /// `(epoch, accuracy)` rows
    pub valid: CsvSink,
}

impl LogSinks {
    /// Open both sinks under `dir`, creating it if needed
    pub fn open(dir: &Path, append: bool) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::io(format!("creating {}", dir.display()), e))?;
        debug!("Opening log sinks in {} (append: {})", dir.display(), append);

        Ok(Self {
            train: CsvSink::open(dir.join(TRAIN_LOG), append)?,
            valid: CsvSink::open(dir.join(VALID_LOG), append)?,
        })
    }

    /// Close both sinks, reporting the first failure
    pub fn close(&mut self) -> Result<()> {
        let train = self.train.close();
        let valid = self.valid.close();
        train.and(valid)
    }
}
