//! Message transports underneath [`Communicator`](crate::comm::Communicator).
//!
//! A transport moves opaque byte messages between world ranks. Messages are
//! matched by `(source, Channel)` and arrive in send order for each such pair.

mod local;
mod mailbox;
mod tcp;

pub use local::LocalTransport;
pub use mailbox::Mailbox;
pub use tcp::TcpTransport;

use crate::error::Result;
use crate::types::Rank;
use futures::future::BoxFuture;

/// Demultiplexing key: which communicator a message belongs to, plus a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel {
    pub comm_id: u64,
    pub tag: u32,
}

impl Channel {
    pub const fn new(comm_id: u64, tag: u32) -> Self {
        Self { comm_id, tag }
    }
}

/// Point-to-point byte transport between the processes of one job.
///
/// `send` must buffer eagerly: it completes once the payload has been handed
/// off, without waiting for the destination to post a matching receive.
/// Collectives rely on this to issue a send and then a receive in the same
/// step without deadlocking.
pub trait Transport: Send + Sync {
    /// Rank of this process in the world.
    fn world_rank(&self) -> Rank;

    /// Number of processes in the world.
    fn world_size(&self) -> u32;

    /// Name of the physical node this process runs on.
    fn processor_name(&self) -> String;

    /// Send `data` to world rank `dest` on `channel`.
    fn send<'a>(&'a self, dest: Rank, channel: Channel, data: &'a [u8])
    -> BoxFuture<'a, Result<()>>;

    /// Receive the next message from world rank `src` on `channel`.
    fn recv<'a>(&'a self, src: Rank, channel: Channel) -> BoxFuture<'a, Result<Vec<u8>>>;

    /// Receive the next message on `channel` from any source.
    fn recv_any<'a>(&'a self, channel: Channel) -> BoxFuture<'a, Result<(Rank, Vec<u8>)>>;
}
