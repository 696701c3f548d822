//! Small-object exchange between group members through the store.

use std::sync::atomic::Ordering;

use log::trace;
use serde::{Serialize, de::DeserializeOwned};

use crate::{GroupErr, GroupHandle, Result};

impl GroupHandle {
    /// Sends `obj` to `dst`, without waiting for it to be received.
    ///
    /// # Arguments
    /// * `obj` - Any serializable value.
    /// * `dst` - The receiving rank.
    pub async fn send_obj<T>(&self, obj: &T, dst: usize) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.check_rank(dst)?;
        let payload = serde_json::to_vec(obj)?;

        let mut store = self.store().await;
        let seq = self.sent[dst].load(Ordering::Relaxed);
        let key = self.keys.send_to(dst, self.rank, seq);

        store.set(&key, &payload, self.data_expiration).await?;
        self.sent[dst].store(seq + 1, Ordering::Relaxed);

        trace!(dst = dst, seq = seq; "sent object");
        Ok(())
    }

    /// Receives the next object `src` sent to this member, blocking until it arrives.
    ///
    /// A receive that fails doesn't consume anything, calling it again waits for the
    /// same object.
    pub async fn recv_obj<T>(&self, src: usize) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.check_rank(src)?;

        let mut store = self.store().await;
        let seq = self.received[src].load(Ordering::Relaxed);
        let key = self.keys.send_to(self.rank, src, seq);

        let payload = store.get(&key, self.wait_timeout).await?;
        let obj = serde_json::from_slice(&payload)?;
        self.received[src].store(seq + 1, Ordering::Relaxed);

        trace!(src = src, seq = seq; "received object");
        Ok(obj)
    }

    /// Broadcasts an object from `src` to every member.
    ///
    /// # Arguments
    /// * `obj` - The value to broadcast, only read on `src`.
    /// * `src` - The broadcasting rank.
    ///
    /// # Returns
    /// The broadcast value on every member, `NothingToBroadcast` if `src` passed `None`.
    pub async fn broadcast_obj<T>(&self, obj: Option<T>, src: usize) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.check_rank(src)?;

        if src != self.rank {
            return self.recv_broadcast(src).await;
        }

        let obj = obj.ok_or(GroupErr::NothingToBroadcast { rank: self.rank })?;
        self.send_broadcast(&obj).await?;
        Ok(obj)
    }

    /// Gathers one object from every member.
    ///
    /// # Returns
    /// `world_size` objects ordered by rank, this member's own `obj` included.
    pub async fn all_gather_obj<T>(&self, obj: &T) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let mut gathered = Vec::with_capacity(self.world_size);

        for rank in 0..self.world_size {
            if rank == self.rank {
                self.send_broadcast(obj).await?;
                gathered.push(obj.clone());
            } else {
                gathered.push(self.recv_broadcast(rank).await?);
            }
        }

        Ok(gathered)
    }

    async fn send_broadcast<T>(&self, obj: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(obj)?;

        let mut store = self.store().await;
        let seq = self.broadcasts_sent.load(Ordering::Relaxed);
        let key = self.keys.broadcast_from(self.rank, seq);

        store.set(&key, &payload, self.data_expiration).await?;
        self.broadcasts_sent.store(seq + 1, Ordering::Relaxed);
        Ok(())
    }

    async fn recv_broadcast<T>(&self, src: usize) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let mut store = self.store().await;
        let seq = self.broadcasts_received[src].load(Ordering::Relaxed);
        let key = self.keys.broadcast_from(src, seq);

        let payload = store.get(&key, self.wait_timeout).await?;
        let obj = serde_json::from_slice(&payload)?;
        self.broadcasts_received[src].store(seq + 1, Ordering::Relaxed);
        Ok(obj)
    }
}
