//! Error types for Siamese one-shot training

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Phase of the training state machine an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Restoring state and opening log sinks
    Initializing,
    /// Forward/backward/update over the training batches
    Training,
    /// One-shot validation trials
    Validating,
    /// Best-score bookkeeping and checkpoint writes
    Checkpointing,
    /// Held-out test trials
    Testing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Initializing => "initializing",
            Phase::Training => "training",
            Phase::Validating => "validating",
            Phase::Checkpointing => "checkpointing",
            Phase::Testing => "testing",
        };
        f.write_str(name)
    }
}

/// Main error type for training and evaluation
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested checkpoint does not exist
    #[error("Checkpoint not found: {}", path.display())]
    NotFound {
        /// Path or directory that was searched
        path: PathBuf,
    },

    /// Checkpoint could not be deserialized
    #[error("Corrupt checkpoint {}: {reason}", path.display())]
    CorruptData {
        /// Offending record
        path: PathBuf,
        /// Decoder message
        reason: String,
    },

    /// Non-finite value produced by forward, backward or update
    #[error("Numeric failure: {0}")]
    Numeric(String),

    /// Error raised by the tensor engine
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Log or checkpoint write/read failure
    #[error("IO error while {context}: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Stored parameters do not fit the live model or optimizer
    #[error("Incompatible state: {0}")]
    IncompatibleState(String),

    /// Data provider failure
    #[error("Data error: {0}")]
    Data(String),

    /// Failure inside the epoch loop, tagged with where it happened
    #[error("epoch {epoch} ({phase}): {source}")]
    Training {
        /// Epoch being run
        epoch: usize,
        /// State machine phase
        phase: Phase,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for training operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a corrupt-data error
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::CorruptData {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a numeric failure
    pub fn numeric(msg: impl Into<String>) -> Self {
        Self::Numeric(msg.into())
    }

    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an incompatible-state error
    pub fn incompatible(msg: impl Into<String>) -> Self {
        Self::IncompatibleState(msg.into())
    }

    /// Create a data provider error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Tag an error with the epoch and phase it was raised in
    pub fn in_phase(self, epoch: usize, phase: Phase) -> Self {
        match self {
            already @ Self::Training { .. } => already,
            other => Self::Training {
                epoch,
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Strip epoch/phase tagging
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Training { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether this is a NumericFailure (including engine errors)
    pub fn is_numeric(&self) -> bool {
        matches!(self.root_cause(), Self::Numeric(_) | Self::Tensor(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::IncompatibleState(format!("state blob could not be decoded: {err}"))
    }
}
