use super::{Channel, Mailbox, Transport};
use crate::error::{CommError, Result};
use crate::types::Rank;
use futures::future::BoxFuture;
use std::sync::Arc;

/// In-process transport: every rank is a task in the same process and a send
/// is a push onto the destination's mailbox.
///
/// Hostnames can be assigned per rank, which lets a single process model
/// several physical nodes.
pub struct LocalTransport {
    rank: Rank,
    hostname: String,
    mailboxes: Arc<Vec<Arc<Mailbox>>>,
}

impl LocalTransport {
    /// Create `world_size` connected ranks that all report this host's name.
    pub fn mesh(world_size: u32) -> Vec<Self> {
        let host = gethostname::gethostname().to_string_lossy().into_owned();
        let hosts = vec![host; world_size as usize];
        Self::mesh_with_hosts(&hosts)
    }

    /// Create one connected rank per entry, reporting the given processor name.
    pub fn mesh_with_hosts<S: AsRef<str>>(hosts: &[S]) -> Vec<Self> {
        let n = hosts.len() as u32;
        let mailboxes: Arc<Vec<Arc<Mailbox>>> =
            Arc::new((0..n).map(|_| Arc::new(Mailbox::new(n))).collect());
        hosts
            .iter()
            .enumerate()
            .map(|(rank, host)| Self {
                rank: rank as Rank,
                hostname: host.as_ref().to_string(),
                mailboxes: Arc::clone(&mailboxes),
            })
            .collect()
    }

    fn mailbox(&self, rank: Rank) -> Result<&Mailbox> {
        self.mailboxes
            .get(rank as usize)
            .map(|m| m.as_ref())
            .ok_or(CommError::InvalidRank {
                rank,
                size: self.mailboxes.len() as u32,
            })
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        for (r, mb) in self.mailboxes.iter().enumerate() {
            if r as Rank != self.rank {
                mb.close_peer(self.rank);
            }
        }
    }
}

impl Transport for LocalTransport {
    fn world_rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.mailboxes.len() as u32
    }

    fn processor_name(&self) -> String {
        self.hostname.clone()
    }

    fn send<'a>(
        &'a self,
        dest: Rank,
        channel: Channel,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.mailbox(dest)?.push(self.rank, channel, data.to_vec());
            Ok(())
        })
    }

    fn recv<'a>(&'a self, src: Rank, channel: Channel) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            if src as usize >= self.mailboxes.len() {
                return Err(CommError::InvalidRank {
                    rank: src,
                    size: self.world_size(),
                });
            }
            self.mailbox(self.rank)?.recv(src, channel).await
        })
    }

    fn recv_any<'a>(&'a self, channel: Channel) -> BoxFuture<'a, Result<(Rank, Vec<u8>)>> {
        Box::pin(async move { self.mailbox(self.rank)?.recv_any(channel).await })
    }
}
