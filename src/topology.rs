//! Process layout: model groups, inter-model groups, and node discovery.

use crate::comm::Communicator;
use crate::comm::hash::fnv1a;
use crate::error::{CommError, Result};
use crate::types::Rank;

/// Where this process sits in the world / model / node hierarchy.
///
/// Built once when the engine starts and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTopology {
    pub world_rank: Rank,
    pub world_size: u32,
    pub procs_per_model: u32,
    pub num_models: u32,
    pub model_rank: u32,
    pub rank_in_model: Rank,
    pub rank_in_node: Rank,
    pub procs_per_node: u32,
    /// World ranks that share this process's physical node, ascending.
    pub world_ranks_on_node: Vec<Rank>,
    /// Processor name used to discover the node.
    pub hostname: String,
}

/// Model partition of the world, before node discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLayout {
    pub procs_per_model: u32,
    pub num_models: u32,
    pub model_rank: u32,
    pub rank_in_model: Rank,
}

impl ModelLayout {
    /// Partition `world_size` processes into contiguous models of
    /// `procs_per_model` each. `0` means a single model over the world.
    pub fn new(world_rank: Rank, world_size: u32, procs_per_model: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(CommError::config("world size is 0"));
        }
        let ppm = if procs_per_model == 0 {
            world_size as usize
        } else {
            procs_per_model
        };
        if ppm > world_size as usize {
            return Err(CommError::config(format!(
                "not enough processes to create one model; procs_per_model: {ppm} \
                 is larger than world_size: {world_size}"
            )));
        }
        let ppm = ppm as u32;
        if world_size % ppm != 0 {
            return Err(CommError::config(format!(
                "procs per model does not divide total number of procs; \
                 procs_per_model: {ppm} total number of procs (world size): {world_size}"
            )));
        }
        Ok(Self {
            procs_per_model: ppm,
            num_models: world_size / ppm,
            model_rank: world_rank / ppm,
            rank_in_model: world_rank % ppm,
        })
    }

    /// World rank of process `rank` in model `model`.
    pub fn world_rank(&self, model: u32, rank: Rank) -> Result<Rank> {
        if model >= self.num_models {
            return Err(CommError::InvalidModel {
                model: model as usize,
                num_models: self.num_models as usize,
            });
        }
        if rank >= self.procs_per_model {
            return Err(CommError::InvalidRank {
                rank,
                size: self.procs_per_model,
            });
        }
        Ok(model * self.procs_per_model + rank)
    }
}

impl ProcessTopology {
    pub fn new(layout: ModelLayout, world: &Communicator, node: &Communicator, hostname: String) -> Self {
        Self {
            world_rank: world.rank(),
            world_size: world.size(),
            procs_per_model: layout.procs_per_model,
            num_models: layout.num_models,
            model_rank: layout.model_rank,
            rank_in_model: layout.rank_in_model,
            rank_in_node: node.rank(),
            procs_per_node: node.size(),
            world_ranks_on_node: node.group().to_vec(),
            hostname,
        }
    }

    pub fn layout(&self) -> ModelLayout {
        ModelLayout {
            procs_per_model: self.procs_per_model,
            num_models: self.num_models,
            model_rank: self.model_rank,
            rank_in_model: self.rank_in_model,
        }
    }

    /// True if `world_rank` runs on the same physical node as this process.
    pub fn is_world_rank_node_local(&self, world_rank: Rank) -> bool {
        self.world_ranks_on_node.contains(&world_rank)
    }

    /// True if rank `rank` of `comm` runs on the same physical node.
    pub fn is_rank_node_local(&self, rank: Rank, comm: &Communicator) -> bool {
        comm.world_rank_of(rank)
            .is_ok_and(|w| self.is_world_rank_node_local(w))
    }
}

/// Non-negative 31-bit bucket for a processor name.
pub(crate) fn hostname_bucket(hostname: &str) -> u32 {
    let h = fnv1a([hostname.as_bytes()]);
    ((h >> 32) ^ h) as u32 & 0x7fff_ffff
}

/// Build the communicator of processes sharing this physical node.
///
/// The world is first split by a hash of the processor name. Inside each
/// hash bucket the names are gathered and compared exactly, so two hosts
/// whose names collide still end up in separate node groups. Members are
/// ordered by world rank.
pub async fn discover_node(world: &Communicator, hostname: &str) -> Result<Communicator> {
    let bucket = hostname_bucket(hostname);
    let hash_comm = world.split(bucket, world.rank()).await?;

    let names = hash_comm.allgather_blocks(hostname.as_bytes()).await?;
    let mut distinct: indexmap::IndexSet<&[u8]> = indexmap::IndexSet::new();
    for name in &names {
        distinct.insert(name.as_slice());
    }
    let node_num = distinct
        .get_index_of(hostname.as_bytes())
        .ok_or_else(|| CommError::Topology {
            reason: format!("own processor name {hostname:?} missing from gathered names"),
        })?;

    let node = hash_comm.split(node_num as u32, world.rank()).await?;
    if node.local_rank_of(world.world_rank_of(world.rank())?).is_none() {
        return Err(CommError::Topology {
            reason: format!("rank {} missing from its own node group", world.rank()),
        });
    }
    tracing::trace!(
        hostname,
        bucket,
        bucket_size = hash_comm.size(),
        node_size = node.size(),
        "node discovered"
    );
    Ok(node)
}
