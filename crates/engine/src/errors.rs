use thiserror::Error;

/// Result type alias using the engine's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the engine surfaces to callers.
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The user-supplied key was empty.
    #[error("the key is empty")]
    KeyIsEmpty,

    /// No live record exists for the key.
    #[error("key not found in database")]
    KeyNotFound,

    /// The index referenced a data file that is not currently open.
    #[error("data file is not found")]
    DataFileNotFound,

    /// A file in the database directory did not parse as a data file.
    #[error("the database directory maybe corrupted")]
    DataDirectoryCorrupted,

    /// Another process holds the directory lock.
    #[error("the database directory is used by another process")]
    DatabaseIsUsing,

    /// A batch staged more records than `WriteBatchOptions::max_batch_num`.
    #[error("exceed the max batch num")]
    ExceedMaxBatchNum,

    /// The index refused to remove a key it reported as present.
    #[error("failed to update index")]
    IndexUpdateFailed,

    /// A record's recomputed CRC differed from the stored one.
    #[error("invalid crc value, log record maybe corrupted")]
    InvalidCrc,

    /// The configuration failed validation.
    #[error("invalid database configuration: {0}")]
    InvalidConfig(String),

    /// A merge is already running.
    #[error("merge is in progress, try again later")]
    MergeInProgress,

    /// Reclaimable bytes have not reached `data_file_merge_ratio` yet.
    #[error("the merge ratio does not reach the option")]
    MergeRatioUnreached,
}

impl From<data::Error> for Error {
    fn from(err: data::Error) -> Error {
        match err {
            data::Error::Io(io_err) => Error::Io(io_err),
            data::Error::InvalidCrc => Error::InvalidCrc,
        }
    }
}
