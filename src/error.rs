use std::fmt;

/// Crate-wide error taxonomy.
///
/// Corruption and precondition faults are fatal to the owning queue actor;
/// I/O failures are surfaced to the caller. See `SPEC_FULL.md` §7 / §10.1.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// A checksum mismatch in an SMS segment or PQI journal record.
    Corrupt(&'static str),
    /// A malformed index/terms/snapshot file, distinct from a payload checksum failure.
    CorruptMetadata(&'static str),
    /// An assertion failure indicating a bug in the caller or this crate.
    Precondition(&'static str),
    Unsupported(&'static str),
    UnsupportedVersion(u32),
    PayloadTooLarge,
    WriterAlreadyActive,
    InvalidQueueName(String),
}

impl Error {
    /// Builds a [`Error::Precondition`], logging it first per §7: precondition
    /// violations must never be silently swallowed.
    pub fn precondition(msg: &'static str) -> Self {
        log::error!("precondition violated: {msg}");
        Error::Precondition(msg)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
            Error::CorruptMetadata(msg) => write!(f, "corrupt metadata: {msg}"),
            Error::Precondition(msg) => write!(f, "precondition violated: {msg}"),
            Error::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Error::UnsupportedVersion(version) => write!(f, "unsupported version: {version}"),
            Error::PayloadTooLarge => write!(f, "payload too large"),
            Error::WriterAlreadyActive => write!(f, "writer already active"),
            Error::InvalidQueueName(name) => write!(f, "invalid queue name: {name}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
