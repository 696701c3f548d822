use std::{error::Error, fmt, io, time::Duration};

/// The store module's result type.
pub type Result<T> = std::result::Result<T, StoreErr>;

/// Failures talking to a coordination store.
#[derive(Debug)]
pub enum StoreErr {
    Io(io::Error),
    Unresolvable {
        addr: String,
        source: io::Error,
    },
    ConnectTimeout {
        addr: String,
        waited: Duration,
    },
    Timeout {
        key: String,
    },
    Remote(String),
    UnexpectedReply {
        expected: &'static str,
    },
}

impl fmt::Display for StoreErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErr::Io(e) => write!(f, "io error: {e}"),
            StoreErr::Unresolvable { addr, source } => {
                write!(f, "could not resolve store address {addr}: {source}")
            }
            StoreErr::ConnectTimeout { addr, waited } => {
                write!(f, "could not reach store at {addr} within {waited:?}")
            }
            StoreErr::Timeout { key } => write!(f, "timed out waiting for key {key}"),
            StoreErr::Remote(e) => write!(f, "store replied with an error: {e}"),
            StoreErr::UnexpectedReply { expected } => {
                write!(f, "unexpected reply from store, expected {expected}")
            }
        }
    }
}

impl Error for StoreErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreErr::Io(e) | StoreErr::Unresolvable { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<StoreErr> for io::Error {
    fn from(value: StoreErr) -> Self {
        match value {
            StoreErr::Io(e) => e,
            e @ (StoreErr::ConnectTimeout { .. } | StoreErr::Timeout { .. }) => {
                io::Error::new(io::ErrorKind::TimedOut, e)
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
