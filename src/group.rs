use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use store::{ServerHandle, StoreClient};
use tokio::sync::{Mutex, MutexGuard};

use crate::{GroupBuilder, GroupErr, Result, barrier::READY, keys::KeySpace};

/// A member's view of a group formed over a coordination store.
///
/// Every handle owns its own round and message counters, so a process may hold
/// handles to several overlapping groups at once. The handle can be shared across
/// tasks; store operations issued through it run one at a time.
pub struct GroupHandle {
    pub(crate) rank: usize,
    pub(crate) world_size: usize,
    pub(crate) addr: String,
    pub(crate) keys: KeySpace,
    pub(crate) data_expiration: Option<Duration>,
    pub(crate) wait_timeout: Option<Duration>,
    pub(crate) barrier_rounds: AtomicU64,
    pub(crate) sent: Box<[AtomicU64]>,
    pub(crate) received: Box<[AtomicU64]>,
    pub(crate) broadcasts_sent: AtomicU64,
    pub(crate) broadcasts_received: Box<[AtomicU64]>,
    client: Mutex<StoreClient>,
    // Dropped after `client`, so rank 0 closes its own connection before the server.
    server: Option<ServerHandle>,
}

impl GroupHandle {
    /// Forms a group with every setting at its default.
    ///
    /// Shorthand for `GroupBuilder::new(host, port, rank, world_size).create()`.
    pub async fn create(host: &str, port: u16, rank: usize, world_size: usize) -> Result<Self> {
        GroupBuilder::new(host, port, rank, world_size).create().await
    }

    pub(crate) fn new(
        builder: &GroupBuilder,
        client: StoreClient,
        server: Option<ServerHandle>,
    ) -> Self {
        let counters = || (0..builder.world_size).map(|_| AtomicU64::new(0)).collect();

        Self {
            rank: builder.rank,
            world_size: builder.world_size,
            addr: builder.addr(),
            keys: KeySpace::new(builder.namespace.as_deref()),
            data_expiration: builder.data_expiration,
            wait_timeout: builder.wait_timeout,
            barrier_rounds: AtomicU64::new(0),
            sent: counters(),
            received: counters(),
            broadcasts_sent: AtomicU64::new(0),
            broadcasts_received: counters(),
            client: Mutex::new(client),
            server,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Returns the address of the group's store.
    pub fn store_addr(&self) -> &str {
        &self.addr
    }

    /// Returns how many barrier rounds this handle has started.
    pub fn rounds(&self) -> u64 {
        self.barrier_rounds.load(Ordering::Relaxed)
    }

    /// Returns whether this handle hosts the group's store.
    pub fn is_store_host(&self) -> bool {
        self.server.is_some()
    }

    /// Locks the store connection for a sequence of requests.
    pub(crate) async fn store(&self) -> MutexGuard<'_, StoreClient> {
        self.client.lock().await
    }

    pub(crate) fn check_rank(&self, rank: usize) -> Result<()> {
        if rank < self.world_size {
            return Ok(());
        }

        Err(GroupErr::InvalidRank {
            rank,
            world_size: self.world_size,
        })
    }

    /// Leaves the group, closing the store connection.
    ///
    /// Other members are not notified. The last barrier announcement gets the data
    /// expiration here, what this handle wrote then expires on its own.
    /// Rank 0 stops serving the store, so it should leave last.
    pub async fn close(self) -> Result<()> {
        let last_round = self.rounds().checked_sub(1);
        let last_announcement = last_round.map(|id| self.announcement(id));
        let Self {
            client,
            server,
            data_expiration,
            ..
        } = self;

        let mut client = client.into_inner();
        if let (Some(ttl), Some(key)) = (data_expiration, last_announcement) {
            client.set(&key, READY, Some(ttl)).await?;
        }

        client.disconnect().await?;
        drop(server);
        Ok(())
    }
}

impl fmt::Debug for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHandle")
            .field("rank", &self.rank)
            .field("world_size", &self.world_size)
            .field("addr", &self.addr)
            .field("rounds", &self.rounds())
            .finish_non_exhaustive()
    }
}
