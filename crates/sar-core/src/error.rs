//! Error types for sar-core

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::limit::LimitExceeded;

/// Core error types for the sar library
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[source] io::Error),

    /// Filesystem walk failed
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// The archive handle could not be set up (bad type, compressor or direction)
    #[error("Setup failed: {0}")]
    Setup(String),

    /// `close` was called on an archive that is already closed
    #[error("Archive already closed")]
    AlreadyClosed,

    /// A write would have grown the archive past its size limit
    #[error("Written data exceeds the limit set")]
    WriteLimitExceeded,

    /// Archiving a file would have read more data than allowed
    #[error("Read data exceeds the limit set")]
    ReadLimitExceeded,

    /// A file yielded fewer bytes than its header declared
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    /// Extraction destination does not exist
    #[error("Destination does not exist: {0}")]
    DestinationMissing(PathBuf),

    /// Extraction destination is not a directory
    #[error("Destination is not a directory: {0}")]
    DestinationNotDirectory(PathBuf),

    /// The operator chose to quit at a conflict prompt
    #[error("Extraction aborted by user")]
    ExtractionAborted,

    /// The archive contains an entry type this engine cannot reconstruct
    #[error("Unsupported entry type ({0}), skipping")]
    UnsupportedEntryType(String),

    /// Entry name is unusable or would escape the destination
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Error tied to one filesystem path
    #[error("{}: {source}", .path.display())]
    Entry {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// One or more metadata problems on an extracted entry
    #[error("Setting metadata failed: {}", .0.join(", "))]
    Metadata(Vec<String>),

    /// One or more layers failed to close
    #[error("Closing archive failed: {}", .0.join(", "))]
    Close(Vec<String>),

    /// Configuration-related error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap this error with the path it occurred on
    pub fn at(self, path: impl Into<PathBuf>) -> Self {
        Error::Entry {
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through `Entry` wrappers
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Entry { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether this error is caused by a read or write limit
    pub fn is_limit(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::WriteLimitExceeded | Error::ReadLimitExceeded
        )
    }
}

// Size-limit conditions raised by `LimitWriter` reach us wrapped in an
// `io::Error` by the compressor and codec layers.
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let limited = err
            .get_ref()
            .is_some_and(|inner| inner.downcast_ref::<LimitExceeded>().is_some());
        if limited {
            Error::WriteLimitExceeded
        } else {
            Error::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
