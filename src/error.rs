use std::{error::Error, fmt, io, time::Duration};

use store::StoreErr;

/// The group module's result type.
pub type Result<T> = std::result::Result<T, GroupErr>;

/// Failures forming a group or coordinating through it.
#[derive(Debug)]
pub enum GroupErr {
    InvalidConfiguration(String),
    ConnectionTimeout {
        addr: String,
        timeout: Duration,
    },
    AddressUnreachable {
        addr: String,
        source: io::Error,
    },
    AddressInUse {
        addr: String,
        source: io::Error,
    },
    StoreUnavailable(StoreErr),
    BarrierTimeout {
        round: u64,
        key: String,
    },
    RecvTimeout {
        key: String,
    },
    UnexpectedValue {
        key: String,
    },
    InvalidRank {
        rank: usize,
        world_size: usize,
    },
    NothingToBroadcast {
        rank: usize,
    },
    Codec(serde_json::Error),
}

impl fmt::Display for GroupErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupErr::InvalidConfiguration(e) => write!(f, "invalid group configuration: {e}"),
            GroupErr::ConnectionTimeout { addr, timeout } => {
                write!(f, "could not form the group at {addr} within {timeout:?}")
            }
            GroupErr::AddressUnreachable { addr, source } => {
                write!(f, "store address {addr} is unreachable: {source}")
            }
            GroupErr::AddressInUse { addr, source } => {
                write!(f, "cannot host the store at {addr}: {source}")
            }
            GroupErr::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
            GroupErr::BarrierTimeout { round, key } => {
                write!(f, "barrier round {round} timed out waiting for {key}")
            }
            GroupErr::RecvTimeout { key } => write!(f, "timed out waiting for {key}"),
            GroupErr::UnexpectedValue { key } => write!(f, "unexpected value under {key}"),
            GroupErr::InvalidRank { rank, world_size } => {
                write!(f, "rank {rank} is out of range for a group of {world_size}")
            }
            GroupErr::NothingToBroadcast { rank } => {
                write!(f, "rank {rank} is the broadcast source but has nothing to send")
            }
            GroupErr::Codec(e) => write!(f, "codec error: {e}"),
        }
    }
}

impl Error for GroupErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GroupErr::AddressUnreachable { source, .. } | GroupErr::AddressInUse { source, .. } => {
                Some(source)
            }
            GroupErr::StoreUnavailable(e) => Some(e),
            GroupErr::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreErr> for GroupErr {
    fn from(value: StoreErr) -> Self {
        match value {
            StoreErr::Unresolvable { addr, source } => Self::AddressUnreachable { addr, source },
            StoreErr::ConnectTimeout { addr, waited } => Self::ConnectionTimeout {
                addr,
                timeout: waited,
            },
            StoreErr::Timeout { key } => Self::RecvTimeout { key },
            other => Self::StoreUnavailable(other),
        }
    }
}

impl From<serde_json::Error> for GroupErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<GroupErr> for io::Error {
    fn from(value: GroupErr) -> Self {
        let kind = match &value {
            GroupErr::InvalidConfiguration(_) | GroupErr::InvalidRank { .. } => {
                io::ErrorKind::InvalidInput
            }
            GroupErr::ConnectionTimeout { .. }
            | GroupErr::BarrierTimeout { .. }
            | GroupErr::RecvTimeout { .. } => io::ErrorKind::TimedOut,
            GroupErr::AddressInUse { .. } => io::ErrorKind::AddrInUse,
            GroupErr::AddressUnreachable { .. } => io::ErrorKind::AddrNotAvailable,
            GroupErr::StoreUnavailable(StoreErr::Io(e)) => e.kind(),
            _ => io::ErrorKind::InvalidData,
        };

        io::Error::new(kind, value)
    }
}
