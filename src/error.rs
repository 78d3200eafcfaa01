use thiserror::Error;

/// Failure conditions shared by the index and clustering kernels. All of
/// them abort the current run; none produce partial output.
#[derive(Error, Debug)]
pub enum PeakError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("unknown file type: {0}")]
    UnknownFormat(String),

    #[error("no positions indexed for chromosome {0}")]
    LookupMiss(String),

    #[error("population {0} has no reads; refusing to divide by zero")]
    ZeroReads(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PeakError>;
