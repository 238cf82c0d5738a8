use std::{fmt, io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForestError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("file not found: {path:?}: {source}")]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read error at {path:?}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("allocation of {requested} {what} failed")]
    AllocationFailure { what: &'static str, requested: usize },

    #[error("partition error: {0}")]
    PartitionError(String),

    #[error("forest {forestnr} outside this task's {nforests} forests")]
    InvalidMemoryAccess { forestnr: i64, nforests: i64 },

    #[error("no open file handle for forest {0}")]
    InvalidFilePointer(i64),

    #[error("backend broke its setup contract: {0}")]
    ContractViolation(String),

    #[error("identifier out of range: {0}")]
    IdentifierRange(String),

    #[error("identifier overflows 64 bits: {0}")]
    IdentifierOverflow(String),

    #[error("dangling reference: {0}")]
    Linkage(String),

    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type ForestResult<T> = Result<T, ForestError>;

impl ForestError {
    pub fn invalid_config(details: impl fmt::Display) -> Self {
        Self::InvalidConfig(details.to_string())
    }

    pub fn partition(details: impl fmt::Display) -> Self {
        Self::PartitionError(details.to_string())
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileReadError {
            path: path.into(),
            source,
        }
    }

    /// Opening an input file: a missing file is `FileNotFound`, anything else a read error.
    pub fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::FileNotFound { path, source }
        } else {
            Self::FileReadError { path, source }
        }
    }

    pub fn allocation(what: &'static str, requested: usize) -> Self {
        Self::AllocationFailure { what, requested }
    }

    /// Distinct non-zero process status for each fatal cause.
    pub fn exit_code(&self) -> i32 {
        match self {
            ForestError::InvalidConfig(_) => 2,
            ForestError::FileNotFound { .. } => 3,
            ForestError::FileReadError { .. } => 4,
            ForestError::AllocationFailure { .. } => 5,
            ForestError::PartitionError(_) => 6,
            ForestError::InvalidMemoryAccess { .. } => 7,
            ForestError::InvalidFilePointer(_) => 8,
            ForestError::ContractViolation(_) => 9,
            ForestError::IdentifierRange(_) => 10,
            ForestError::IdentifierOverflow(_) => 11,
            ForestError::Linkage(_) => 12,
            ForestError::Io { .. } => 13,
        }
    }
}

impl From<serde_json::Error> for ForestError {
    fn from(err: serde_json::Error) -> Self {
        ForestError::InvalidConfig(err.to_string())
    }
}

/// Reserve exactly `len` slots, reporting failure instead of aborting.
pub(crate) fn try_vec<T>(what: &'static str, len: usize) -> ForestResult<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| ForestError::allocation(what, len))?;
    Ok(v)
}
