//! Crate-wide error type.
//!
//! Every archive operation aborts on the first error; none of these carry
//! partial-progress information.  Diagnostics name the offending path and
//! the step that failed.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TarError {
    /// An input file could not be opened for reading.
    #[error("failed to open source file {}: {source}", .path.display())]
    SourceOpen {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
    /// `stat` or the uid/gid name lookup failed, or a value does not fit
    /// its header field.
    #[error("failed to encode metadata of {}: {reason}", .path.display())]
    Metadata {
        path:   PathBuf,
        reason: String,
    },
    /// The archive or an extracted file could not be created.
    #[error("failed to create {}: {source}", .path.display())]
    DestinationOpen {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
    /// A seek/read/write/truncate on an already open handle failed.
    #[error("{action}: {source}")]
    Io {
        action: String,
        #[source]
        source: io::Error,
    },
    /// Header or footer validation failed.
    #[error("malformed archive at offset {offset}: {reason}")]
    Format {
        offset: u64,
        reason: String,
    },
    /// An update named a file that is not a member of the archive.
    #[error("{0} is not present in the archive")]
    NotInArchive(String),
}

pub type TarResult<T> = Result<T, TarError>;

/// Attaches the failing step to a bare `io::Error`.
pub(crate) trait IoContext<T> {
    fn action<F, S>(self, f: F) -> TarResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn action<F, S>(self, f: F) -> TarResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| TarError::Io { action: f().into(), source })
    }
}
