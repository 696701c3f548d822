use std::{borrow::Cow, io, time::Duration};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

type KeyLen = u32;
const KEY_LEN_SIZE: usize = size_of::<KeyLen>();

type TtlMillis = u64;
const TTL_SIZE: usize = size_of::<TtlMillis>();

/// A request for the store that carries no raw payload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Blocks until `key` exists, or until `timeout_ms` elapses when given.
    Get {
        key: String,
        timeout_ms: Option<u64>,
    },
    Check {
        key: String,
    },
    Delete {
        key: String,
    },
    Disconnect,
}

/// The store's answer to any request that doesn't return a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Stored,
    Exists(bool),
    Deleted(bool),
    TimedOut,
}

/// The application layer message between store clients and the store server.
#[derive(Debug)]
pub enum Msg<'a> {
    Err(Cow<'a, str>),
    Control(Command),
    /// Sets `key` to `value`, expiring after `ttl` when given.
    Entry {
        key: Cow<'a, str>,
        ttl: Option<Duration>,
        value: &'a [u8],
    },
    Value(&'a [u8]),
    Reply(Reply),
}

impl Msg<'_> {
    fn buf_is_too_small<T>(size: usize, needed: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {needed} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(byte: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind byte {byte}"),
        ))
    }

    fn invalid_utf8(err: std::str::Utf8Error) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// Encodes an optional ttl as milliseconds, zero meaning no expiration.
fn ttl_to_millis(ttl: Option<Duration>) -> TtlMillis {
    match ttl {
        Some(ttl) => ttl.as_millis().clamp(1, TtlMillis::MAX as u128) as TtlMillis,
        None => 0,
    }
}

fn ttl_from_millis(millis: TtlMillis) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                let header = (0 as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                let header = (1 as Header).to_be_bytes();
                buf.extend_from_slice(&header);

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, &cmd).unwrap();
                None
            }
            Msg::Entry { key, ttl, value } => {
                let header = (2 as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                buf.extend_from_slice(&(key.len() as KeyLen).to_be_bytes());
                buf.extend_from_slice(key.as_bytes());
                buf.extend_from_slice(&ttl_to_millis(*ttl).to_be_bytes());
                Some(*value)
            }
            Msg::Value(value) => {
                let header = (3 as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                Some(*value)
            }
            Msg::Reply(reply) => {
                let header = (4 as Header).to_be_bytes();
                buf.extend_from_slice(&header);

                // SAFETY: Same as `Command`, the impl is derived.
                serde_json::to_writer(buf, &reply).unwrap();
                None
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len(), HEADER_SIZE);
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_SIZE` just above.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap());

        match kind {
            0 => {
                let string = std::str::from_utf8(rest).map_err(Self::invalid_utf8)?;
                Ok(Self::Err(Cow::Borrowed(string)))
            }
            1 => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            2 => {
                if rest.len() < KEY_LEN_SIZE {
                    return Self::buf_is_too_small(buf.len(), HEADER_SIZE + KEY_LEN_SIZE);
                }

                let (len_buf, rest) = rest.split_at(KEY_LEN_SIZE);
                // SAFETY: Same as above, `len_buf` is exactly `KEY_LEN_SIZE` long.
                let key_len = KeyLen::from_be_bytes(len_buf.try_into().unwrap()) as usize;

                let needed = HEADER_SIZE + KEY_LEN_SIZE + key_len + TTL_SIZE;
                if buf.len() < needed {
                    return Self::buf_is_too_small(buf.len(), needed);
                }

                let (key, rest) = rest.split_at(key_len);
                let (ttl_buf, value) = rest.split_at(TTL_SIZE);
                let key = std::str::from_utf8(key).map_err(Self::invalid_utf8)?;
                // SAFETY: `ttl_buf` is exactly `TTL_SIZE` long.
                let ttl = TtlMillis::from_be_bytes(ttl_buf.try_into().unwrap());

                Ok(Self::Entry {
                    key: Cow::Borrowed(key),
                    ttl: ttl_from_millis(ttl),
                    value,
                })
            }
            3 => Ok(Self::Value(rest)),
            4 => {
                let reply = serde_json::from_slice(rest)?;
                Ok(Self::Reply(reply))
            }
            kind => Self::invalid_kind_byte(kind),
        }
    }
}
