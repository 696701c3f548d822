use std::{sync::atomic::Ordering, time::Duration};

use log::{debug, trace};
use store::StoreErr;
use tokio::time::Instant;

use crate::{GroupErr, GroupHandle, Result};

/// The marker every member writes to announce it reached a barrier round.
pub(crate) const READY: &[u8] = b"ready";

/// Progress of one barrier round on one member, it only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum RoundState {
    NotStarted,
    Announced,
    Waiting,
    Satisfied,
}

#[derive(Debug)]
struct Round {
    id: u64,
    prefix: String,
    state: RoundState,
}

impl Round {
    fn new(id: u64, prefix: String) -> Self {
        Self {
            id,
            prefix,
            state: RoundState::NotStarted,
        }
    }

    /// The announcement key of `rank` in this round.
    fn key(&self, rank: usize) -> String {
        format!("{}/{rank}", self.prefix)
    }

    fn advance(&mut self, next: RoundState) {
        debug_assert!(next > self.state, "barrier round went from {:?} to {next:?}", self.state);
        trace!(round = self.id; "barrier {:?} -> {next:?}", self.state);
        self.state = next;
    }
}

impl GroupHandle {
    /// Blocks until every member of the group called `barrier` for the same round.
    ///
    /// Each call takes a fresh round id from this handle's counter and only looks at
    /// that round's keys, so back to back calls can't satisfy each other. Waits for
    /// as long as the handle's wait timeout allows, forever when none was set.
    ///
    /// # Returns
    /// * `StoreUnavailable` if the store connection is lost mid-wait.
    /// * `BarrierTimeout` if the wait timeout elapsed before every member arrived.
    pub async fn barrier(&self) -> Result<()> {
        self.run_barrier(self.wait_timeout).await
    }

    /// Same as `barrier`, but gives up after `timeout`.
    ///
    /// A timed out round is never resumed, calling again starts a new round.
    pub async fn barrier_within(&self, timeout: Duration) -> Result<()> {
        self.run_barrier(Some(timeout)).await
    }

    async fn run_barrier(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        // Round ids are taken under the lock so they're announced in order.
        let mut store = self.store().await;
        let id = self.barrier_rounds.fetch_add(1, Ordering::Relaxed);
        let mut round = Round::new(id, self.keys.barrier_round(id));

        // No ttl yet, a member may arrive any time later and still needs this key.
        store.set(&round.key(self.rank), READY, None).await?;
        round.advance(RoundState::Announced);

        round.advance(RoundState::Waiting);
        for rank in 0..self.world_size {
            let key = round.key(rank);
            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));

            let value = match store.get(&key, remaining).await {
                Ok(value) => value,
                Err(StoreErr::Timeout { .. }) => {
                    return Err(GroupErr::BarrierTimeout { round: id, key });
                }
                Err(e) => return Err(e.into()),
            };

            if value != READY {
                return Err(GroupErr::UnexpectedValue { key });
            }
        }

        round.advance(RoundState::Satisfied);

        // Every member announced this round, so all of them are done reading the last one.
        if let (Some(ttl), Some(finished)) = (self.data_expiration, id.checked_sub(1)) {
            store
                .set(&self.announcement(finished), READY, Some(ttl))
                .await?;
        }

        debug!(rank = self.rank, round = id; "barrier passed");
        Ok(())
    }

    /// This member's announcement key of round `id`.
    pub(crate) fn announcement(&self, id: u64) -> String {
        format!("{}/{}", self.keys.barrier_round(id), self.rank)
    }
}
