use std::{io, time::Duration};

use log::{debug, info};
use store::{ServerHandle, StoreClient, StoreErr, StoreServer};
use tokio::time::Instant;

use crate::{
    GroupConfig, GroupErr, GroupHandle, Result,
    barrier::READY,
    config::{self, DEFAULT_DATA_EXPIRATION_SECONDS, DEFAULT_STORE_CONNECT_TIMEOUT_SECONDS},
};

/// Forms groups over a coordination store without touching any process-wide state.
///
/// Rank 0 hosts the store at `host:port` unless told the store is already running,
/// every rank (rank 0 included) then connects to it as a client.
#[derive(Debug, Clone)]
pub struct GroupBuilder {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) rank: usize,
    pub(crate) world_size: usize,
    pub(crate) data_expiration: Option<Duration>,
    pub(crate) store_connect_timeout: Duration,
    pub(crate) wait_timeout: Option<Duration>,
    pub(crate) namespace: Option<String>,
    pub(crate) wait_for_workers: bool,
    pub(crate) host_store: bool,
}

impl GroupBuilder {
    /// Creates a new `GroupBuilder`.
    ///
    /// # Arguments
    /// * `host` - The store's host, rank 0 listens there.
    /// * `port` - The store's port. Rank 0 may pass 0 to get an ephemeral port when it's alone.
    /// * `rank` - This participant's index in the group.
    /// * `world_size` - The amount of participants in the group.
    ///
    /// # Returns
    /// A new `GroupBuilder` instance with every optional setting at its default.
    pub fn new(host: impl Into<String>, port: u16, rank: usize, world_size: usize) -> Self {
        Self {
            host: host.into(),
            port,
            rank,
            world_size,
            data_expiration: Some(Duration::from_secs(DEFAULT_DATA_EXPIRATION_SECONDS)),
            store_connect_timeout: Duration::from_secs(DEFAULT_STORE_CONNECT_TIMEOUT_SECONDS),
            wait_timeout: None,
            namespace: None,
            wait_for_workers: true,
            host_store: true,
        }
    }

    /// Creates a new `GroupBuilder` out of a `GroupConfig`.
    pub fn from_config(config: &GroupConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            rank: config.rank,
            world_size: config.world_size,
            data_expiration: config.data_expiration(),
            store_connect_timeout: config.store_connect_timeout(),
            wait_timeout: config.wait_timeout(),
            namespace: config.namespace.clone(),
            wait_for_workers: config.wait_for_workers,
            host_store: config.host_store,
        }
    }

    /// Sets the ttl of every key written through the group, 0 keeps keys forever.
    pub fn data_expiration_seconds(mut self, seconds: u64) -> Self {
        self.data_expiration = (seconds > 0).then(|| Duration::from_secs(seconds));
        self
    }

    /// Sets how long to keep trying to reach the store, and to wait for the other members.
    pub fn store_connect_timeout(mut self, timeout: Duration) -> Self {
        self.store_connect_timeout = timeout;
        self
    }

    /// Bounds every barrier and receive of the group, they wait forever otherwise.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Prefixes every key of the group, letting several groups share one store.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Whether rank 0 waits for every member to reach the store before returning.
    pub fn wait_for_workers(mut self, wait: bool) -> Self {
        self.wait_for_workers = wait;
        self
    }

    /// Whether rank 0 hosts the store, or every member joins a store that's already running.
    ///
    /// Groups sharing a running store should each pick their own `namespace`.
    pub fn host_store(mut self, host: bool) -> Self {
        self.host_store = host;
        self
    }

    pub(crate) fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Forms the group.
    ///
    /// Validates the configuration before touching the network, hosts the store when
    /// this is rank 0, connects to it and, unless disabled, waits for every member.
    ///
    /// # Returns
    /// A `GroupHandle` with every counter at 0, or
    /// * `InvalidConfiguration` if `rank >= world_size` or `world_size < 1`.
    /// * `AddressInUse` if rank 0 cannot listen at the address.
    /// * `AddressUnreachable` if the address cannot be bound or resolved.
    /// * `ConnectionTimeout` if the store or the other members can't be reached in time.
    pub async fn create(mut self) -> Result<GroupHandle> {
        config::validate(self.rank, self.world_size)?;

        let deadline = Instant::now() + self.store_connect_timeout;

        let server = match self.rank {
            0 if self.host_store => {
                let server = self.serve_store().await?;
                self.port = server.local_addr().port();
                Some(server)
            }
            _ => None,
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        let client = StoreClient::connect(&self.host, self.port, remaining)
            .await
            .map_err(|e| match e {
                StoreErr::ConnectTimeout { addr, .. } => GroupErr::ConnectionTimeout {
                    addr,
                    timeout: self.store_connect_timeout,
                },
                e => e.into(),
            })?;
        let group = GroupHandle::new(&self, client, server);

        if self.wait_for_workers {
            self.rendezvous(&group, deadline).await?;
        }

        info!(
            rank = self.rank,
            world_size = self.world_size;
            "joined group at {}",
            group.store_addr()
        );

        Ok(group)
    }

    /// Starts serving the store at this builder's address.
    async fn serve_store(&self) -> Result<ServerHandle> {
        let to_group_err = |source: io::Error| match source.kind() {
            io::ErrorKind::AddrInUse => GroupErr::AddressInUse {
                addr: self.addr(),
                source,
            },
            _ => GroupErr::AddressUnreachable {
                addr: self.addr(),
                source,
            },
        };

        let server = StoreServer::bind((self.host.as_str(), self.port))
            .await
            .map_err(to_group_err)?;

        server.spawn().map_err(to_group_err)
    }

    /// Announces this member and, on rank 0, waits until every member announced itself.
    async fn rendezvous(&self, group: &GroupHandle, deadline: Instant) -> Result<()> {
        let mut store = group.store().await;

        let key = group.keys.rendezvous(self.rank);
        store.set(&key, READY, group.data_expiration).await?;

        if self.rank != 0 {
            return Ok(());
        }

        for rank in 0..self.world_size {
            let key = group.keys.rendezvous(rank);
            let remaining = deadline.saturating_duration_since(Instant::now());

            match store.get(&key, Some(remaining)).await {
                Ok(_) => debug!(rank = rank; "member reached the store"),
                Err(StoreErr::Timeout { .. }) => {
                    return Err(GroupErr::ConnectionTimeout {
                        addr: self.addr(),
                        timeout: self.store_connect_timeout,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}
