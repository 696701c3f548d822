use std::{borrow::Cow, io, net::SocketAddr, sync::Arc, time::Duration};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Reply},
};
use log::{debug, error, trace, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, ToSocketAddrs},
    task::{JoinHandle, JoinSet},
    time::{self, MissedTickBehavior},
};

use crate::Store;

/// How often expired entries are dropped from memory.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A TCP server exposing a `Store` to store clients.
#[derive(Debug)]
pub struct StoreServer {
    listener: TcpListener,
    store: Store,
}

impl StoreServer {
    /// Binds a new `StoreServer` to `addr`.
    ///
    /// # Arguments
    /// * `addr` - The address to listen at.
    ///
    /// # Returns
    /// The bound server or the bind error as is, `AddrInUse` included.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            listener,
            store: Store::new(),
        })
    }

    /// Returns the address this server is listening at.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns the store served by this server.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Accepts and serves clients until the future is dropped.
    ///
    /// Every connection is served on its own task, owned by this future, so dropping
    /// it also stops every connection.
    pub async fn run(self) -> io::Result<()> {
        let Self { listener, store } = self;
        let mut connections = JoinSet::new();

        let mut sweep = time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("failed to accept store client: {e}");
                            continue;
                        }
                    };

                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(peer:% = addr; "could not disable nagle: {e}");
                    }

                    debug!(peer:% = addr; "store client connected");

                    let store = store.clone();
                    connections.spawn(async move {
                        let (rx, tx) = stream.into_split();
                        let (rx, tx) = comms::channel(rx, tx);

                        match serve(store, rx, tx).await {
                            Ok(()) => debug!(peer:% = addr; "store client disconnected"),
                            Err(e) => warn!(peer:% = addr; "store client connection failed: {e}"),
                        }
                    });
                }
                _ = sweep.tick() => {
                    let purged = store.purge_expired();
                    if purged > 0 {
                        trace!(purged = purged; "dropped expired entries");
                    }
                }
                Some(joined) = connections.join_next() => {
                    if let Err(e) = joined {
                        error!("store connection task failed: {e}");
                    }
                }
            }
        }
    }

    /// Runs the server in the background.
    ///
    /// # Returns
    /// A `ServerHandle` that stops the server when dropped.
    pub fn spawn(self) -> io::Result<ServerHandle> {
        let addr = self.local_addr()?;
        let store = self.store.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = self.run().await {
                error!("store server at {addr} stopped: {e}");
            }
        });

        debug!(addr:% = addr; "store server listening");
        Ok(ServerHandle { addr, store, task })
    }
}

/// Owns a running `StoreServer`, aborting it and all of its connections on drop.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    store: Store,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Answers the requests of a single store client until it disconnects.
///
/// # Arguments
/// * `store` - The store to operate on.
/// * `rx` - The receiving end of the client's connection.
/// * `tx` - The sending end of the client's connection.
///
/// # Returns
/// Ok when the client disconnected, either explicitly or by closing the stream.
async fn serve<R, W>(store: Store, mut rx: OnoReceiver<R>, mut tx: OnoSender<W>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut rx_buf = Vec::new();

    loop {
        let msg = match rx.recv_into(&mut rx_buf).await {
            Ok(msg) => msg,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };

        match msg {
            Msg::Entry { key, ttl, value } => {
                trace!(key:% = key; "set");
                store.set(key, value, ttl);
                tx.send(&Msg::Reply(Reply::Stored)).await?;
            }
            Msg::Control(Command::Get { key, timeout_ms }) => {
                let timeout = timeout_ms.map(Duration::from_millis);

                match wait_or_hangup(&store, &key, timeout, &mut rx).await {
                    Ok(Some(value)) => tx.send(&Msg::Value(&value)).await?,
                    Ok(None) => {
                        trace!(key:% = key; "get timed out");
                        tx.send(&Msg::Reply(Reply::TimedOut)).await?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        debug!(key:% = key; "store client left during a get");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
            Msg::Control(Command::Check { key }) => {
                let exists = store.check(&key);
                tx.send(&Msg::Reply(Reply::Exists(exists))).await?;
            }
            Msg::Control(Command::Delete { key }) => {
                let deleted = store.delete(&key);
                tx.send(&Msg::Reply(Reply::Deleted(deleted))).await?;
            }
            Msg::Control(Command::Disconnect) => return Ok(()),
            other => {
                warn!("unexpected message from store client: {other:?}");
                let msg = Msg::Err(Cow::Borrowed("expected a store request"));
                tx.send(&msg).await?;
            }
        }
    }
}

/// Waits for `key` while watching the client's connection.
///
/// Clients send nothing while a get is pending, so any incoming frame other than a
/// disconnect is a protocol violation.
///
/// # Returns
/// The value, `None` on timeout, or `UnexpectedEof` once the client is gone.
async fn wait_or_hangup<R>(
    store: &Store,
    key: &str,
    timeout: Option<Duration>,
    rx: &mut OnoReceiver<R>,
) -> io::Result<Option<Arc<[u8]>>>
where
    R: AsyncRead + Unpin,
{
    let mut rx_buf = Vec::new();

    tokio::select! {
        value = store.wait(key, timeout) => Ok(value),
        received = rx.recv_into::<Msg>(&mut rx_buf) => match received {
            Ok(Msg::Control(Command::Disconnect)) => Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "store request sent while a get was pending",
            )),
            Err(e) => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};

    use super::*;

    type Channel = (OnoReceiver<ReadHalf<DuplexStream>>, OnoSender<WriteHalf<DuplexStream>>);

    fn channel_pair() -> (Channel, Channel) {
        let (stream1, stream2) = io::duplex(4096);
        let (rx1, tx1) = io::split(stream1);
        let (rx2, tx2) = io::split(stream2);
        (comms::channel(rx1, tx1), comms::channel(rx2, tx2))
    }

    #[tokio::test]
    async fn serve_answers_every_request_kind() -> std::io::Result<()> {
        let store = Store::new();
        let ((sv_rx, sv_tx), (mut rx, mut tx)) = channel_pair();
        let server = tokio::spawn(serve(store.clone(), sv_rx, sv_tx));

        let mut buf = Vec::new();

        let set = Msg::Entry {
            key: Cow::Borrowed("a"),
            ttl: None,
            value: b"1",
        };
        tx.send(&set).await?;
        assert!(matches!(rx.recv_into(&mut buf).await?, Msg::Reply(Reply::Stored)));

        let check = Msg::Control(Command::Check { key: "a".into() });
        tx.send(&check).await?;
        assert!(matches!(
            rx.recv_into(&mut buf).await?,
            Msg::Reply(Reply::Exists(true))
        ));

        let get = Msg::Control(Command::Get {
            key: "a".into(),
            timeout_ms: None,
        });
        tx.send(&get).await?;
        let Msg::Value(value) = rx.recv_into(&mut buf).await? else {
            panic!("expected a value");
        };
        assert_eq!(value, b"1");

        let get_missing = Msg::Control(Command::Get {
            key: "b".into(),
            timeout_ms: Some(10),
        });
        tx.send(&get_missing).await?;
        assert!(matches!(
            rx.recv_into(&mut buf).await?,
            Msg::Reply(Reply::TimedOut)
        ));

        let delete = Msg::Control(Command::Delete { key: "a".into() });
        tx.send(&delete).await?;
        assert!(matches!(
            rx.recv_into(&mut buf).await?,
            Msg::Reply(Reply::Deleted(true))
        ));
        assert!(store.is_empty());

        tx.send(&Msg::Control(Command::Disconnect)).await?;
        server.await.unwrap()
    }

    #[tokio::test]
    async fn serve_rejects_replies_from_clients() -> std::io::Result<()> {
        let ((sv_rx, sv_tx), (mut rx, mut tx)) = channel_pair();
        let server = tokio::spawn(serve(Store::new(), sv_rx, sv_tx));

        tx.send(&Msg::Reply(Reply::Stored)).await?;

        let mut buf = Vec::new();
        assert!(matches!(rx.recv_into(&mut buf).await?, Msg::Err(_)));

        drop((rx, tx));
        server.await.unwrap()
    }

    #[tokio::test]
    async fn client_leaving_during_a_get_frees_its_task() -> std::io::Result<()> {
        let ((sv_rx, sv_tx), (rx, mut tx)) = channel_pair();
        let server = tokio::spawn(serve(Store::new(), sv_rx, sv_tx));

        let get = Msg::Control(Command::Get {
            key: "never".into(),
            timeout_ms: None,
        });
        tx.send(&get).await?;
        drop((rx, tx));

        let served = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("serve kept waiting for a client that left");
        served.unwrap()
    }

    #[tokio::test]
    async fn request_during_a_pending_get_is_rejected() -> std::io::Result<()> {
        let ((sv_rx, sv_tx), (_rx, mut tx)) = channel_pair();
        let server = tokio::spawn(serve(Store::new(), sv_rx, sv_tx));

        let get = Msg::Control(Command::Get {
            key: "never".into(),
            timeout_ms: None,
        });
        tx.send(&get).await?;
        tx.send(&Msg::Control(Command::Check { key: "a".into() })).await?;

        let err = server.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        Ok(())
    }
}
