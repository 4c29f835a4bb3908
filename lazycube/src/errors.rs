use std::error;
use std::fmt;
use std::io;
use std::result;

#[derive(Debug)]
pub enum Error {
    /// A source handle could not be resolved or its header could not be read.
    SourceUnavailable { handle: String, reason: String },

    /// I/O failed while reading a region from an opened source.
    ReadError { handle: String, reason: String },

    /// A pipeline or target names dimensions that don't fit the cube.
    DimensionMismatch(String),

    /// A non-reorderable operation conflicts with a requested read strategy.
    UnsupportedReorder(String),

    /// An extent falls outside of a dimension.
    OutOfBounds(String),

    /// Configuration could not be parsed.
    Config(String),

    /// A cached value another thread was loading failed to load.
    Load,

    IO(io::Error),
}

impl Error {
    pub(crate) fn mismatch<S: Into<String>>(message: S) -> Self {
        Self::DimensionMismatch(message.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SourceUnavailable { handle, reason } => {
                write!(f, "source unavailable: {handle}: {reason}")
            }
            Error::ReadError { handle, reason } => write!(f, "read error: {handle}: {reason}"),
            Error::DimensionMismatch(message) => write!(f, "dimension mismatch: {message}"),
            Error::UnsupportedReorder(message) => write!(f, "unsupported reorder: {message}"),
            Error::OutOfBounds(message) => write!(f, "out of bounds: {message}"),
            Error::Config(message) => write!(f, "bad configuration: {message}"),
            Error::Load => write!(f, "load failed in another thread"),
            Error::IO(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::IO(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = result::Result<T, Error>;
