//! Process groups over a shared [`Transport`].
//!
//! A [`Communicator`] is an ordered subset of world ranks plus a `comm_id`
//! that keeps its traffic apart from every other communicator on the same
//! transport. Communicators are created by splitting the world.

mod collectives;
pub(crate) mod hash;
mod split;

use crate::error::{CommError, Result};
use crate::transport::{Channel, Transport};
use crate::types::Rank;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Tag for point-to-point exchanges inside collectives.
pub(crate) const COLLECTIVE_TAG: u32 = u32::MAX;
/// Tag for barrier tokens.
pub(crate) const BARRIER_TAG: u32 = u32::MAX - 1;
/// Tag for broadcast and allgather traffic.
pub(crate) const BROADCAST_TAG: u32 = u32::MAX - 2;

/// An ordered process group.
pub struct Communicator {
    transport: Arc<dyn Transport>,
    comm_id: u64,
    rank: Rank,
    /// Local rank -> world rank.
    group: Arc<[Rank]>,
    split_generation: AtomicU64,
    barrier_epoch: AtomicU64,
    timeout: Option<Duration>,
}

impl Communicator {
    /// The communicator containing every process of the transport.
    pub fn world(transport: Arc<dyn Transport>) -> Self {
        let group: Arc<[Rank]> = (0..transport.world_size()).collect();
        let rank = transport.world_rank();
        Self::from_parts(transport, 0, rank, group, None)
    }

    fn from_parts(
        transport: Arc<dyn Transport>,
        comm_id: u64,
        rank: Rank,
        group: Arc<[Rank]>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            comm_id,
            rank,
            group,
            split_generation: AtomicU64::new(0),
            barrier_epoch: AtomicU64::new(0),
            timeout,
        }
    }

    /// Bound every send and receive issued by collectives on this
    /// communicator (and communicators split from it).
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> u32 {
        self.group.len() as u32
    }

    pub fn comm_id(&self) -> u64 {
        self.comm_id
    }

    /// World ranks of the members, in local rank order.
    pub fn group(&self) -> &[Rank] {
        &self.group
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Translate a local rank into its world rank.
    pub fn world_rank_of(&self, rank: Rank) -> Result<Rank> {
        self.group
            .get(rank as usize)
            .copied()
            .ok_or(CommError::InvalidRank {
                rank,
                size: self.size(),
            })
    }

    /// Translate a world rank into a local rank, if it is a member.
    pub fn local_rank_of(&self, world_rank: Rank) -> Option<Rank> {
        self.group
            .iter()
            .position(|&r| r == world_rank)
            .map(|p| p as Rank)
    }

    fn channel(&self, tag: u32) -> Channel {
        Channel::new(self.comm_id, tag)
    }

    /// Send `data` to local rank `dest`.
    pub async fn send(&self, dest: Rank, tag: u32, data: &[u8]) -> Result<()> {
        let world_dest = self.world_rank_of(dest)?;
        self.transport
            .send(world_dest, self.channel(tag), data)
            .await
    }

    /// Receive the next message from local rank `src`.
    pub async fn recv(&self, src: Rank, tag: u32) -> Result<Vec<u8>> {
        let world_src = self.world_rank_of(src)?;
        self.transport.recv(world_src, self.channel(tag)).await
    }

    /// Receive from `src` into `buf`, returning the message length.
    pub async fn recv_into(&self, src: Rank, tag: u32, buf: &mut [u8]) -> Result<usize> {
        let msg = self.recv(src, tag).await?;
        copy_message(&msg, buf)
    }

    /// Receive the next message on `tag` from any member.
    pub async fn recv_any(&self, tag: u32) -> Result<(Rank, Vec<u8>)> {
        let (world_src, msg) = self.transport.recv_any(self.channel(tag)).await?;
        let src = self
            .local_rank_of(world_src)
            .ok_or(CommError::InvalidRank {
                rank: world_src,
                size: self.size(),
            })?;
        Ok((src, msg))
    }

    /// Send to `dest` and then receive from `src`, both on the collective
    /// tag. Returns the number of bytes written into `recv_buf`.
    pub(crate) async fn sendrecv(
        &self,
        dest: Rank,
        send_buf: &[u8],
        src: Rank,
        recv_buf: &mut [u8],
        operation: &'static str,
    ) -> Result<usize> {
        self.collective_send(dest, COLLECTIVE_TAG, send_buf, operation)
            .await?;
        let msg = self.collective_recv(src, COLLECTIVE_TAG, operation).await?;
        copy_message(&msg, recv_buf)
    }

    /// Send with the configured timeout, wrapping errors as `CollectiveFailed`.
    pub(crate) async fn collective_send(
        &self,
        dest: Rank,
        tag: u32,
        data: &[u8],
        operation: &'static str,
    ) -> Result<()> {
        self.guarded(operation, dest, "send", self.send(dest, tag, data))
            .await
    }

    /// Receive with the configured timeout, wrapping errors as `CollectiveFailed`.
    pub(crate) async fn collective_recv(
        &self,
        src: Rank,
        tag: u32,
        operation: &'static str,
    ) -> Result<Vec<u8>> {
        self.guarded(operation, src, "recv", self.recv(src, tag))
            .await
    }

    async fn guarded<T>(
        &self,
        operation: &'static str,
        peer: Rank,
        what: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(r) => r,
                Err(_) => {
                    return Err(CommError::CollectiveFailed {
                        operation,
                        rank: peer,
                        reason: format!("{what} timed out after {}ms", limit.as_millis()),
                    });
                }
            },
            None => fut.await,
        };
        outcome.map_err(|e| match e {
            CommError::CollectiveFailed { .. } => e,
            other => CommError::CollectiveFailed {
                operation,
                rank: peer,
                reason: other.to_string(),
            },
        })
    }

    fn next_barrier_epoch(&self) -> u64 {
        self.barrier_epoch.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Communicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("comm_id", &self.comm_id)
            .field("rank", &self.rank)
            .field("group", &self.group)
            .finish()
    }
}

fn copy_message(msg: &[u8], buf: &mut [u8]) -> Result<usize> {
    if msg.len() > buf.len() {
        return Err(CommError::Truncated {
            capacity: buf.len(),
            actual: msg.len(),
        });
    }
    buf[..msg.len()].copy_from_slice(msg);
    Ok(msg.len())
}
