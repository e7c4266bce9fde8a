use std::io::{Error as IoError, ErrorKind};

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, TarError>;

/// Errors raised while reading or writing an archive.
///
/// Every variant is fatal for the entry or archive in progress, nothing is
/// retried internally.
#[derive(Debug, thiserror::Error)]
pub enum TarError {
    /// The stream ended inside a record that had to arrive whole.
    #[error("unexpected end of archive")]
    UnexpectedEndOfArchive,

    /// Checksum mismatch or an unparseable header field.
    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    /// A GNU long name marker was not followed by the entry it names.
    #[error("long name marker is not followed by an entry")]
    MalformedLongNameSequence,

    #[error("entry declares {declared} bytes but {attempted} bytes were written")]
    SizeOverflow { declared: u64, attempted: u64 },

    #[error("entry declares {declared} bytes but only {written} bytes were written")]
    SizeUnderflow { declared: u64, written: u64 },

    #[error("name {name:?} exceeds the {limit} byte header field")]
    NameTooLong { name: String, limit: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("record must be {expected} bytes, got {actual}")]
    RecordSize { expected: usize, actual: usize },

    #[error("no entry is open")]
    NoCurrentEntry,

    #[error("archive stream is closed")]
    Closed,

    /// An earlier failure left the archive inconsistent; nothing more is
    /// written to it.
    #[error("archive write was aborted by an earlier error")]
    Aborted,

    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl From<TarError> for IoError {
    fn from(err: TarError) -> Self {
        match err {
            TarError::Io(err) => err,
            TarError::UnexpectedEndOfArchive => IoError::new(ErrorKind::UnexpectedEof, err),
            TarError::Closed | TarError::Aborted => IoError::new(ErrorKind::BrokenPipe, err),
            TarError::InvalidConfig(_)
            | TarError::RecordSize { .. }
            | TarError::NoCurrentEntry
            | TarError::SizeOverflow { .. }
            | TarError::SizeUnderflow { .. }
            | TarError::NameTooLong { .. } => IoError::new(ErrorKind::InvalidInput, err),
            TarError::CorruptHeader(_) | TarError::MalformedLongNameSequence => {
                IoError::new(ErrorKind::InvalidData, err)
            }
        }
    }
}
