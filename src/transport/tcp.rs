use super::{Channel, Mailbox, Transport};
use crate::error::{CommError, Result};
use crate::types::Rank;
use bytes::{Buf, BufMut, BytesMut};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// Frame header: `[comm_id: u64 LE][tag: u32 LE][len: u64 LE]`.
const HEADER_LEN: usize = 8 + 4 + 8;

/// Largest payload accepted from a peer (4 GiB).
const MAX_TCP_FRAME_SIZE: usize = 4 * 1024 * 1024 * 1024;

/// How many times a connecting rank retries before giving up on a peer.
const CONNECT_RETRIES: u32 = 100;
const CONNECT_BACKOFF: Duration = Duration::from_millis(50);

/// Full-mesh transport over raw TCP, one connection per peer pair.
///
/// Each rank listens on `addrs[rank]`. Lower ranks accept, higher ranks
/// connect and introduce themselves with a 4-byte rank handshake. A
/// background task per connection reads frames into the shared mailbox.
pub struct TcpTransport {
    rank: Rank,
    world_size: u32,
    hostname: String,
    writers: HashMap<Rank, Mutex<OwnedWriteHalf>>,
    mailbox: Arc<Mailbox>,
    recv_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl TcpTransport {
    /// Bind `addrs[rank]` and connect to every other rank in `addrs`.
    pub async fn connect_mesh(rank: Rank, addrs: &[SocketAddr]) -> Result<Self> {
        let addr = *addrs.get(rank as usize).ok_or(CommError::InvalidRank {
            rank,
            size: addrs.len() as u32,
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CommError::transport_with_source(format!("tcp bind {addr}"), e))?;
        Self::from_listener(rank, listener, addrs).await
    }

    /// Build the mesh using an already-bound listener for this rank.
    ///
    /// Useful when binding to port 0 and distributing the resolved addresses
    /// out of band.
    pub async fn from_listener(
        rank: Rank,
        listener: TcpListener,
        addrs: &[SocketAddr],
    ) -> Result<Self> {
        let world_size = addrs.len() as u32;
        if rank >= world_size {
            return Err(CommError::InvalidRank {
                rank,
                size: world_size,
            });
        }

        let accept_count = (world_size - 1 - rank) as usize;
        let accepts = async {
            let mut streams = Vec::with_capacity(accept_count);
            for _ in 0..accept_count {
                let (mut stream, peer_addr) = listener
                    .accept()
                    .await
                    .map_err(|e| CommError::transport_with_source("tcp accept", e))?;
                let peer = stream.read_u32_le().await.map_err(|e| {
                    CommError::transport_with_source(format!("tcp handshake from {peer_addr}"), e)
                })?;
                if peer <= rank || peer >= world_size {
                    return Err(CommError::transport(format!(
                        "unexpected handshake rank {peer} from {peer_addr}"
                    )));
                }
                streams.push((peer, stream));
            }
            Ok::<_, CommError>(streams)
        };
        let connects = async {
            let mut streams = Vec::with_capacity(rank as usize);
            for peer in 0..rank {
                let mut stream = connect_with_retry(addrs[peer as usize]).await?;
                stream
                    .write_u32_le(rank)
                    .await
                    .map_err(|e| CommError::transport_with_source("tcp handshake", e))?;
                streams.push((peer, stream));
            }
            Ok::<_, CommError>(streams)
        };
        let (accepted, connected) = tokio::try_join!(accepts, connects)?;

        let mailbox = Arc::new(Mailbox::new(world_size));
        let mut writers = HashMap::with_capacity(world_size as usize);
        let mut recv_handles = Vec::with_capacity(world_size as usize);
        for (peer, stream) in accepted.into_iter().chain(connected) {
            stream
                .set_nodelay(true)
                .map_err(|e| CommError::transport_with_source("tcp set_nodelay", e))?;
            let (reader, writer) = stream.into_split();
            writers.insert(peer, Mutex::new(writer));
            let mb = Arc::clone(&mailbox);
            recv_handles.push(tokio::spawn(async move {
                recv_loop(peer, reader, &mb).await;
                mb.close_peer(peer);
            }));
        }

        tracing::debug!(rank, world_size, "tcp mesh established");

        Ok(Self {
            rank,
            world_size,
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            writers,
            mailbox,
            recv_handles,
        })
    }

    /// Override the reported processor name.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    async fn write_frame(&self, dest: Rank, channel: Channel, data: &[u8]) -> Result<()> {
        let writer = self.writers.get(&dest).ok_or(CommError::InvalidRank {
            rank: dest,
            size: self.world_size,
        })?;
        let mut header = BytesMut::with_capacity(HEADER_LEN);
        header.put_u64_le(channel.comm_id);
        header.put_u32_le(channel.tag);
        header.put_u64_le(data.len() as u64);

        let mut w = writer.lock().await;
        w.write_all(&header)
            .await
            .map_err(|e| CommError::transport_with_source("tcp write header", e))?;
        w.write_all(data)
            .await
            .map_err(|e| CommError::transport_with_source("tcp write payload", e))?;
        w.flush()
            .await
            .map_err(|e| CommError::transport_with_source("tcp flush", e))?;
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn world_rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
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
            if dest == self.rank {
                self.mailbox.push(self.rank, channel, data.to_vec());
                return Ok(());
            }
            self.write_frame(dest, channel, data).await
        })
    }

    fn recv<'a>(&'a self, src: Rank, channel: Channel) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            if src >= self.world_size {
                return Err(CommError::InvalidRank {
                    rank: src,
                    size: self.world_size,
                });
            }
            self.mailbox.recv(src, channel).await
        })
    }

    fn recv_any<'a>(&'a self, channel: Channel) -> BoxFuture<'a, Result<(Rank, Vec<u8>)>> {
        Box::pin(self.mailbox.recv_any(channel))
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for h in &self.recv_handles {
            h.abort();
        }
    }
}

async fn connect_with_retry(addr: SocketAddr) -> Result<TcpStream> {
    let mut attempt = 0;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt + 1 >= CONNECT_RETRIES => {
                return Err(CommError::transport_with_source(
                    format!("tcp connect {addr}"),
                    e,
                ));
            }
            Err(e) => {
                tracing::trace!(%addr, attempt, "tcp connect failed, retrying: {e}");
                attempt += 1;
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
        }
    }
}

/// Background loop: read frames from one peer into the mailbox.
async fn recv_loop(peer: Rank, mut reader: OwnedReadHalf, mailbox: &Mailbox) {
    let mut header = [0u8; HEADER_LEN];
    loop {
        if let Err(e) = reader.read_exact(&mut header).await {
            tracing::debug!(peer, "tcp recv loop ended: {e}");
            return;
        }
        let mut buf = &header[..];
        let channel = Channel {
            comm_id: buf.get_u64_le(),
            tag: buf.get_u32_le(),
        };
        let len = buf.get_u64_le() as usize;

        if len > MAX_TCP_FRAME_SIZE {
            tracing::warn!(peer, len, "tcp: frame too large, closing connection");
            return;
        }

        let mut payload = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut payload).await {
            tracing::debug!(peer, "tcp recv loop ended reading payload: {e}");
            return;
        }
        mailbox.push(peer, channel, payload);
    }
}
