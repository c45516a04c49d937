use std::io;
use std::path::PathBuf;
use std::time::Duration;

use lapring::HeaderError;
use thiserror::Error;

/// Errors from creating or attaching a file-backed queue.
#[derive(Debug, Error)]
pub enum ShmError {
    /// A file or mapping operation failed.
    #[error("shared-memory operation failed on {path}: {source}")]
    Io {
        /// Backing file involved.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The mapped region does not hold a queue of the expected type.
    #[error("mapped region rejected: {0}")]
    Header(#[from] HeaderError),

    /// The header stayed unconfirmed for the whole retry window; the creator
    /// is gone, wedged, or was built with a different payload definition.
    #[error("queue at {path} did not confirm within {waited:?}: {last}")]
    AttachTimeout {
        /// Backing file involved.
        path: PathBuf,
        /// How long the attacher retried.
        waited: Duration,
        /// The confirmation failure observed on the final attempt.
        #[source]
        last: HeaderError,
    },
}

impl ShmError {
    /// `true` when a fresh attach attempt could plausibly succeed later.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::AttachTimeout { last, .. } => last.is_recoverable(),
            Self::Header(err) => err.is_recoverable(),
            Self::Io { .. } => false,
        }
    }
}
