use super::{BARRIER_TAG, BROADCAST_TAG, Communicator};
use crate::error::{CommError, Result};
use crate::types::Rank;

impl Communicator {
    /// Ring allgather of variable-length byte blocks.
    ///
    /// Returns one block per member, indexed by local rank. In step `s` each
    /// member forwards block `(rank - s) mod n` to its right neighbour and
    /// receives block `(rank - s - 1) mod n` from its left neighbour.
    pub async fn allgather_blocks(&self, block: &[u8]) -> Result<Vec<Vec<u8>>> {
        let n = self.size();
        let rank = self.rank;
        let mut blocks: Vec<Vec<u8>> = vec![Vec::new(); n as usize];
        blocks[rank as usize] = block.to_vec();
        if n == 1 {
            return Ok(blocks);
        }

        let right = (rank + 1) % n;
        let left = (rank + n - 1) % n;
        for step in 0..n - 1 {
            let send_idx = ((rank + n - step) % n) as usize;
            let recv_idx = ((rank + n - step - 1) % n) as usize;
            self.collective_send(right, BROADCAST_TAG, &blocks[send_idx], "allgather")
                .await?;
            blocks[recv_idx] = self
                .collective_recv(left, BROADCAST_TAG, "allgather")
                .await?;
        }
        Ok(blocks)
    }

    /// Binary-tree broadcast from `root`.
    ///
    /// On the root `data` is the payload; elsewhere it is replaced with the
    /// received bytes.
    pub async fn broadcast_bytes(&self, root: Rank, data: &mut Vec<u8>) -> Result<()> {
        let n = self.size();
        if root >= n {
            return Err(CommError::InvalidRank { rank: root, size: n });
        }
        if n == 1 {
            return Ok(());
        }

        // Remap ranks so root becomes logical rank 0.
        let logical = (self.rank + n - root) % n;
        let physical = |l: Rank| (l + root) % n;

        if logical != 0 {
            let parent = physical((logical - 1) / 2);
            *data = self
                .collective_recv(parent, BROADCAST_TAG, "broadcast")
                .await?;
        }
        for child in [2 * logical + 1, 2 * logical + 2] {
            if child < n {
                self.collective_send(physical(child), BROADCAST_TAG, data, "broadcast")
                    .await?;
            }
        }
        Ok(())
    }

    /// Dissemination barrier: `ceil(log2 n)` rounds, no coordinator.
    ///
    /// In round `r` a member sends its epoch to `(rank + 2^r) mod n` and
    /// waits for the same epoch from `(rank - 2^r) mod n`.
    pub async fn barrier(&self) -> Result<()> {
        let epoch = self.next_barrier_epoch();
        let n = self.size();
        if n <= 1 {
            return Ok(());
        }
        let rank = self.rank;
        let token = epoch.to_le_bytes();

        let mut dist = 1;
        while dist < n {
            let to = (rank + dist) % n;
            let from = (rank + n - dist) % n;
            self.collective_send(to, BARRIER_TAG, &token, "barrier")
                .await?;
            let got = self.collective_recv(from, BARRIER_TAG, "barrier").await?;
            let got_epoch = <[u8; 8]>::try_from(got.as_slice())
                .map(u64::from_le_bytes)
                .map_err(|_| CommError::CollectiveFailed {
                    operation: "barrier",
                    rank: from,
                    reason: format!("malformed barrier token of {} bytes", got.len()),
                })?;
            if got_epoch != epoch {
                return Err(CommError::CollectiveFailed {
                    operation: "barrier",
                    rank: from,
                    reason: format!("expected epoch {epoch}, got {got_epoch}"),
                });
            }
            dist <<= 1;
        }
        Ok(())
    }
}
