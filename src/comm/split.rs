use super::Communicator;
use super::hash::fnv1a_comm_id;
use crate::error::{CommError, Result};
use crate::types::Rank;
use std::sync::Arc;
use std::sync::atomic::Ordering;

impl Communicator {
    /// Split this communicator into sub-groups.
    ///
    /// All members must call `split` together. Members passing the same
    /// `color` land in the same sub-communicator, ordered by `key` with ties
    /// broken by their rank here.
    ///
    /// Every member advances the split generation in lockstep, so the new
    /// `comm_id` is derived locally from (parent id, generation, color)
    /// and needs no extra agreement round.
    pub async fn split(&self, color: u32, key: u32) -> Result<Communicator> {
        // Encode as 8 bytes: [color: u32 LE][key: u32 LE].
        let mut mine = [0u8; 8];
        mine[..4].copy_from_slice(&color.to_le_bytes());
        mine[4..].copy_from_slice(&key.to_le_bytes());

        let blocks = self.allgather_blocks(&mine).await?;

        let mut members: Vec<(u32, Rank)> = Vec::new();
        for (r, block) in blocks.iter().enumerate() {
            if block.len() != 8 {
                return Err(CommError::DecodeFailed(format!(
                    "split entry from rank {r} has {} bytes",
                    block.len()
                )));
            }
            let (c, k) = block.split_at(4);
            let c = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
            let k = u32::from_le_bytes([k[0], k[1], k[2], k[3]]);
            if c == color {
                members.push((k, r as Rank));
            }
        }
        members.sort_unstable();

        let new_rank = members
            .iter()
            .position(|&(_, r)| r == self.rank)
            .ok_or_else(|| CommError::DecodeFailed("own rank missing from split group".into()))?
            as Rank;
        let group = members
            .iter()
            .map(|&(_, r)| self.world_rank_of(r))
            .collect::<Result<Arc<[Rank]>>>()?;

        let generation = self.split_generation.fetch_add(1, Ordering::Relaxed);
        let comm_id = fnv1a_comm_id([
            &self.comm_id.to_le_bytes()[..],
            &generation.to_le_bytes(),
            &color.to_le_bytes(),
        ]);

        tracing::trace!(
            parent = self.comm_id,
            comm_id,
            color,
            size = group.len(),
            rank = new_rank,
            "communicator split"
        );

        Ok(Communicator::from_parts(
            Arc::clone(&self.transport),
            comm_id,
            new_rank,
            group,
            self.timeout,
        ))
    }
}
