use super::Channel;
use crate::error::{CommError, Result};
use crate::types::Rank;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Inbound message queues for one process, shared by every transport.
///
/// Messages that arrive before a matching receive is posted are kept here
/// in arrival order, per channel. Receives scan for the first message from
/// the requested source, so order is preserved per `(source, channel)`.
pub struct Mailbox {
    world_size: u32,
    state: Mutex<MailboxState>,
    notify: Notify,
}

#[derive(Default)]
struct MailboxState {
    queues: HashMap<Channel, VecDeque<(Rank, Vec<u8>)>>,
    closed: HashSet<Rank>,
}

impl Mailbox {
    pub fn new(world_size: u32) -> Self {
        Self {
            world_size,
            state: Mutex::new(MailboxState::default()),
            notify: Notify::new(),
        }
    }

    /// Deliver a message from `src`.
    pub fn push(&self, src: Rank, channel: Channel, payload: Vec<u8>) {
        {
            let mut st = self.lock();
            st.queues
                .entry(channel)
                .or_default()
                .push_back((src, payload));
        }
        self.notify.notify_waiters();
    }

    /// Mark `src` as gone. Pending messages from it stay receivable.
    pub fn close_peer(&self, src: Rank) {
        self.lock().closed.insert(src);
        self.notify.notify_waiters();
    }

    /// Wait for the next message from `src` on `channel`.
    pub async fn recv(&self, src: Rank, channel: Channel) -> Result<Vec<u8>> {
        self.wait_for(channel, Some(src))
            .await
            .map(|(_, payload)| payload)
    }

    /// Wait for the next message on `channel` from any source.
    pub async fn recv_any(&self, channel: Channel) -> Result<(Rank, Vec<u8>)> {
        self.wait_for(channel, None).await
    }

    async fn wait_for(&self, channel: Channel, src: Option<Rank>) -> Result<(Rank, Vec<u8>)> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await still wakes us.
            notified.as_mut().enable();

            {
                let mut st = self.lock();
                if let Some(queue) = st.queues.get_mut(&channel) {
                    let pos = match src {
                        Some(s) => queue.iter().position(|(r, _)| *r == s),
                        None => (!queue.is_empty()).then_some(0),
                    };
                    if let Some(pos) = pos {
                        if let Some(msg) = queue.remove(pos) {
                            return Ok(msg);
                        }
                    }
                }
                match src {
                    Some(s) if st.closed.contains(&s) => {
                        return Err(CommError::PeerDisconnected { rank: s });
                    }
                    None if st.closed.len() + 1 >= self.world_size as usize
                        && self.world_size > 1 =>
                    {
                        return Err(CommError::transport("all peers disconnected"));
                    }
                    _ => {}
                }
            }

            notified.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MailboxState> {
        // A panic while holding the lock cannot leave the queues half-updated,
        // so recover the guard instead of propagating the poison.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
