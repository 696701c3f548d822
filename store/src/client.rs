use std::{borrow::Cow, fmt, io, net::SocketAddr, time::Duration};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Reply},
};
use log::debug;
use tokio::{
    net::{
        self, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::{self, Instant},
};

use crate::{Result, StoreErr};

/// Pause between two connection attempts while the store isn't up yet.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// A connection to a store server.
///
/// Requests are answered in order, one at a time. A request whose future is dropped
/// before its reply arrives leaves the connection out of sync, every later request
/// then fails with `BrokenPipe`.
pub struct StoreClient {
    peer: SocketAddr,
    rx: OnoReceiver<OwnedReadHalf>,
    tx: OnoSender<OwnedWriteHalf>,
    rx_buf: Vec<u8>,
    in_flight: bool,
}

impl StoreClient {
    /// Connects to the store at `host:port`, retrying until `timeout` elapses.
    ///
    /// The server may not be listening yet when this is called, refused connections
    /// are retried.
    ///
    /// # Arguments
    /// * `host` - The store's host name or ip.
    /// * `port` - The store's port.
    /// * `timeout` - Upper bound for resolution plus every connection attempt.
    ///
    /// # Returns
    /// A connected client, `Unresolvable` if `host` doesn't resolve or `ConnectTimeout`
    /// if no attempt succeeded in time.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let deadline = Instant::now() + timeout;

        let addrs: Vec<SocketAddr> =
            match time::timeout_at(deadline, net::lookup_host((host, port))).await {
                Ok(Ok(addrs)) => addrs.collect(),
                Ok(Err(source)) => return Err(StoreErr::Unresolvable { addr, source }),
                Err(_) => {
                    return Err(StoreErr::ConnectTimeout {
                        addr,
                        waited: timeout,
                    });
                }
            };

        if addrs.is_empty() {
            let source = io::Error::new(io::ErrorKind::NotFound, "no addresses found");
            return Err(StoreErr::Unresolvable { addr, source });
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            match time::timeout_at(deadline, TcpStream::connect(addrs.as_slice())).await {
                Ok(Ok(stream)) => {
                    let client = Self::from_stream(stream)?;
                    debug!(addr:% = addr, attempt = attempt; "connected to store");
                    return Ok(client);
                }
                Ok(Err(e)) => debug!(addr:% = addr, attempt = attempt; "store not reachable yet: {e}"),
                Err(_) => break,
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }

            time::sleep_until((now + RETRY_BACKOFF).min(deadline)).await;
        }

        Err(StoreErr::ConnectTimeout {
            addr,
            waited: timeout,
        })
    }

    fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);

        Ok(Self {
            peer,
            rx,
            tx,
            rx_buf: Vec::new(),
            in_flight: false,
        })
    }

    /// Returns the address of the store this client is connected to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Sends `msg` and waits for its reply.
    async fn request<'s>(&'s mut self, msg: &Msg<'_>) -> Result<Msg<'s>> {
        if self.in_flight {
            return Err(StoreErr::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "a previous store request was abandoned before its reply",
            )));
        }

        self.in_flight = true;
        self.tx.send(msg).await?;
        let reply = self.rx.recv_into(&mut self.rx_buf).await?;
        self.in_flight = false;

        match reply {
            Msg::Err(e) => Err(StoreErr::Remote(e.into_owned())),
            reply => Ok(reply),
        }
    }

    /// Sets `key` to `value` in the store.
    ///
    /// # Arguments
    /// * `key` - The key to set.
    /// * `value` - The opaque value.
    /// * `ttl` - When given, the store forgets the entry after it.
    pub async fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let msg = Msg::Entry {
            key: Cow::Borrowed(key),
            ttl,
            value,
        };

        match self.request(&msg).await? {
            Msg::Reply(Reply::Stored) => Ok(()),
            _ => Err(StoreErr::UnexpectedReply { expected: "stored" }),
        }
    }

    /// Gets the value under `key`, blocking until some participant sets it.
    ///
    /// # Arguments
    /// * `key` - The key to read.
    /// * `timeout` - When given, fail with `StoreErr::Timeout` after it.
    ///
    /// # Returns
    /// The value most recently set under `key`.
    pub async fn get(&mut self, key: &str, timeout: Option<Duration>) -> Result<Vec<u8>> {
        // Rounded up, the server must never give up earlier than asked.
        let timeout_ms = timeout.map(|timeout| {
            timeout.as_nanos().div_ceil(1_000_000).min(u64::MAX as u128) as u64
        });
        let msg = Msg::Control(Command::Get {
            key: key.to_string(),
            timeout_ms,
        });

        match self.request(&msg).await? {
            Msg::Value(value) => Ok(value.to_vec()),
            Msg::Reply(Reply::TimedOut) => Err(StoreErr::Timeout {
                key: key.to_string(),
            }),
            _ => Err(StoreErr::UnexpectedReply { expected: "value" }),
        }
    }

    /// Returns whether `key` is currently set, without blocking.
    pub async fn check(&mut self, key: &str) -> Result<bool> {
        let msg = Msg::Control(Command::Check {
            key: key.to_string(),
        });

        match self.request(&msg).await? {
            Msg::Reply(Reply::Exists(exists)) => Ok(exists),
            _ => Err(StoreErr::UnexpectedReply { expected: "exists" }),
        }
    }

    /// Removes `key` from the store.
    ///
    /// # Returns
    /// Whether the key was set.
    pub async fn delete(&mut self, key: &str) -> Result<bool> {
        let msg = Msg::Control(Command::Delete {
            key: key.to_string(),
        });

        match self.request(&msg).await? {
            Msg::Reply(Reply::Deleted(deleted)) => Ok(deleted),
            _ => Err(StoreErr::UnexpectedReply { expected: "deleted" }),
        }
    }

    /// Tells the server this client is done and closes the connection.
    ///
    /// An abandoned request is still pending on the server, so then the connection is
    /// just closed.
    pub async fn disconnect(mut self) -> Result<()> {
        if !self.in_flight {
            self.tx.send(&Msg::Control(Command::Disconnect)).await?;
        }

        self.tx.shutdown().await?;
        Ok(())
    }
}

impl fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreClient")
            .field("peer", &self.peer)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}
