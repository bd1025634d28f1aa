use std::fmt::Display;

/// Packstore errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The key is not present, or is present and tombstoned. This is part of
    /// the normal lookup protocol, not a failure.
    NotFound,
    /// Delete was called on a batch; batches only accumulate writes.
    NotSupportedOnBatch,
    /// Invalid on-disk data: bad magic, unsupported version, truncated or
    /// inconsistent sections. Fatal for the file it came from.
    Format(String),
    /// An underlying read, write, sync, or rename failure.
    IO(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "entry not found"),
            Error::NotSupportedOnBatch => write!(f, "operation not supported on a batch"),
            Error::Format(msg) => write!(f, "format error: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// Constructs an Error::Format for the given format string.
#[macro_export]
macro_rules! errformat {
    ($($args:tt)*) => { $crate::error::Error::Format(format!($($args)*)) };
}

/// A packstore Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}
