//! The hierarchical communication engine.

use crate::buffer_pool::BufferPool;
use crate::collective::{self, Algorithm, AllreduceContext, AllreduceOptions};
use crate::comm::Communicator;
use crate::config::CommConfig;
use crate::error::{CommError, Result};
use crate::matrix::{LocalMatrix, Mat, view_bytes};
use crate::metrics::{AllreduceStats, CommStats};
use crate::topology::{ModelLayout, ProcessTopology, discover_node};
use crate::transform::{AllreduceTransform, IdentityTransform};
use crate::transport::Transport;
use crate::types::{Rank, SCALAR_BYTES, Scalar};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Tag for model-addressed point-to-point messages on the world communicator.
const P2P_TAG: u32 = 0;
/// Tag for [`HierComm::broadcast_buffer`] payloads.
const BCAST_TAG: u32 = 1;

/// Scratch space reused across allreduce calls.
#[derive(Debug, Default)]
struct Scratch {
    pool: BufferPool,
    staging: Vec<u8>,
}

/// Communication engine for a world partitioned into models.
///
/// The world is split into `num_models` contiguous model groups of
/// `procs_per_model` processes. Process `i` of every model together form an
/// inter-model group, over which model replicas reduce their gradients.
/// Independently, processes on the same physical node form a node group,
/// which lets the allreduce algorithms skip encoding for node-local peers.
///
/// Every collective method must be called by all members of the group it
/// runs on, in the same order.
///
/// # Example
///
/// ```no_run
/// use hiercomm::transport::Transport;
/// use hiercomm::{CommConfig, HierComm, IdentityTransform, Mat};
/// use std::sync::Arc;
///
/// # async fn example(transport: Arc<dyn Transport>) -> hiercomm::Result<()> {
/// let comm = HierComm::new(transport, CommConfig::from_env()).await?;
/// let mut grad = Mat::filled(8, 8, 1.0);
/// let opts = comm.allreduce_options();
/// comm.intermodel_allreduce(&mut grad, 8 * 8 * 4, &mut IdentityTransform, opts)
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct HierComm {
    config: CommConfig,
    topology: ProcessTopology,
    world: Communicator,
    model: Communicator,
    intermodel: Communicator,
    node: Communicator,
    scratch: tokio::sync::Mutex<Scratch>,
    stats: Mutex<CommStats>,
}

impl HierComm {
    /// Build the engine over `transport`. Collective: every world rank must
    /// call this concurrently.
    pub async fn new(transport: Arc<dyn Transport>, config: CommConfig) -> Result<Self> {
        let world = Communicator::world(transport).with_timeout(config.collective_timeout);
        let layout = ModelLayout::new(world.rank(), world.size(), config.procs_per_model)?;

        let model = world.split(layout.model_rank, layout.rank_in_model).await?;
        let intermodel = world.split(layout.rank_in_model, layout.model_rank).await?;

        let hostname = config
            .hostname
            .clone()
            .unwrap_or_else(|| world.transport().processor_name());
        let node = discover_node(&world, &hostname).await?;
        let topology = ProcessTopology::new(layout, &world, &node, hostname);

        tracing::info!(
            world_rank = topology.world_rank,
            world_size = topology.world_size,
            model = topology.model_rank,
            rank_in_model = topology.rank_in_model,
            num_models = topology.num_models,
            node = %topology.hostname,
            procs_per_node = topology.procs_per_node,
            "communication engine ready"
        );

        Ok(Self {
            config,
            topology,
            world,
            model,
            intermodel,
            node,
            scratch: tokio::sync::Mutex::new(Scratch::default()),
            stats: Mutex::new(CommStats::default()),
        })
    }

    // ---- Topology ----

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    pub fn topology(&self) -> &ProcessTopology {
        &self.topology
    }

    pub fn rank_in_world(&self) -> Rank {
        self.topology.world_rank
    }

    pub fn world_size(&self) -> u32 {
        self.topology.world_size
    }

    /// Index of the model this process belongs to.
    pub fn model_rank(&self) -> u32 {
        self.topology.model_rank
    }

    pub fn rank_in_model(&self) -> Rank {
        self.topology.rank_in_model
    }

    pub fn procs_per_model(&self) -> u32 {
        self.topology.procs_per_model
    }

    pub fn num_models(&self) -> u32 {
        self.topology.num_models
    }

    pub fn rank_in_node(&self) -> Rank {
        self.topology.rank_in_node
    }

    pub fn procs_per_node(&self) -> u32 {
        self.topology.procs_per_node
    }

    pub fn world_ranks_on_node(&self) -> &[Rank] {
        &self.topology.world_ranks_on_node
    }

    pub fn am_world_master(&self) -> bool {
        self.topology.world_rank == 0
    }

    pub fn am_model_master(&self) -> bool {
        self.topology.rank_in_model == 0
    }

    /// True if rank `rank` of `comm` shares this process's node.
    pub fn is_rank_node_local(&self, rank: Rank, comm: &Communicator) -> bool {
        self.topology.is_rank_node_local(rank, comm)
    }

    pub fn world_comm(&self) -> &Communicator {
        &self.world
    }

    pub fn model_comm(&self) -> &Communicator {
        &self.model
    }

    pub fn intermodel_comm(&self) -> &Communicator {
        &self.intermodel
    }

    pub fn node_comm(&self) -> &Communicator {
        &self.node
    }

    // ---- Statistics ----

    fn stats_mut(&self) -> MutexGuard<'_, CommStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the byte counters, barrier counts, and allreduce timers.
    pub fn stats(&self) -> CommStats {
        *self.stats_mut()
    }

    pub fn reset_stats(&self) {
        *self.stats_mut() = CommStats::default();
    }

    fn count_sent(&self, bytes: usize) {
        self.stats_mut().bytes_sent += bytes as u64;
    }

    fn count_received(&self, bytes: usize) {
        self.stats_mut().bytes_received += bytes as u64;
    }

    // ---- Point-to-point ----

    fn world_dest(&self, model: u32, rank: Rank) -> Result<Rank> {
        self.topology.layout().world_rank(model, rank)
    }

    /// Send `data` to process `rank` of model `model`.
    pub async fn send_buffer(&self, data: &[Scalar], model: u32, rank: Rank) -> Result<()> {
        let dest = self.world_dest(model, rank)?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.world.send(dest, P2P_TAG, bytes).await?;
        self.count_sent(bytes.len());
        Ok(())
    }

    /// Send the local shard of `mat` to process `rank` of model `model`.
    pub async fn send_matrix(&self, mat: &impl LocalMatrix, model: u32, rank: Rank) -> Result<()> {
        let dest = self.world_dest(model, rank)?;
        let mut staging = Vec::new();
        let bytes = view_bytes(mat.local().view_all(), &mut staging);
        self.world.send(dest, P2P_TAG, bytes).await?;
        self.count_sent(bytes.len());
        Ok(())
    }

    /// Receive into `buf` from process `rank` of model `model`. Returns the
    /// number of elements received.
    pub async fn recv_buffer(&self, buf: &mut [Scalar], model: u32, rank: Rank) -> Result<usize> {
        let src = self.world_dest(model, rank)?;
        let msg = self.world.recv(src, P2P_TAG).await?;
        let n = copy_scalars(&msg, buf)?;
        self.count_received(msg.len());
        Ok(n)
    }

    /// Receive the local shard of `mat` from process `rank` of model `model`.
    pub async fn recv_matrix(&self, mat: &mut impl LocalMatrix, model: u32, rank: Rank) -> Result<()> {
        let src = self.world_dest(model, rank)?;
        let msg = self.world.recv(src, P2P_TAG).await?;
        fill_local(mat.local_mut(), &msg)?;
        self.count_received(msg.len());
        Ok(())
    }

    /// Receive the local shard of `mat` from whichever process sends first.
    /// Returns the sender's world rank.
    pub async fn recv_matrix_any(&self, mat: &mut impl LocalMatrix) -> Result<Rank> {
        let (src, msg) = self.world.recv_any(P2P_TAG).await?;
        fill_local(mat.local_mut(), &msg)?;
        self.count_received(msg.len());
        self.world.world_rank_of(src)
    }

    /// Broadcast `data` from world rank `root` to the world ranks in `dests`.
    ///
    /// Only the root and the listed destinations take part. The root counts
    /// the payload once as sent; each destination counts it once as received.
    pub async fn broadcast_buffer(&self, data: &mut [Scalar], dests: &[Rank], root: Rank) -> Result<()> {
        let me = self.topology.world_rank;
        if me == root {
            let bytes: &[u8] = bytemuck::cast_slice(data);
            for &dest in dests.iter().filter(|&&d| d != root) {
                self.world.send(dest, BCAST_TAG, bytes).await?;
            }
            self.count_sent(bytes.len());
        } else if dests.contains(&me) {
            let msg = self.world.recv(root, BCAST_TAG).await?;
            if msg.len() != std::mem::size_of_val(data) {
                return Err(CommError::BufferSizeMismatch {
                    expected: std::mem::size_of_val(data),
                    actual: msg.len(),
                });
            }
            copy_scalars(&msg, data)?;
            self.count_received(msg.len());
        }
        Ok(())
    }

    /// [`broadcast_buffer`](Self::broadcast_buffer) for the local shard of a matrix.
    pub async fn broadcast_matrix(&self, mat: &mut impl LocalMatrix, dests: &[Rank], root: Rank) -> Result<()> {
        let me = self.topology.world_rank;
        if me == root {
            let mut staging = Vec::new();
            let bytes = view_bytes(mat.local().view_all(), &mut staging);
            for &dest in dests.iter().filter(|&&d| d != root) {
                self.world.send(dest, BCAST_TAG, bytes).await?;
            }
            self.count_sent(bytes.len());
        } else if dests.contains(&me) {
            let msg = self.world.recv(root, BCAST_TAG).await?;
            fill_local(mat.local_mut(), &msg)?;
            self.count_received(msg.len());
        }
        Ok(())
    }

    // ---- Inter-model collectives ----

    /// Sum the local shard of `mat` across all models.
    pub async fn intermodel_sum_matrix(&self, mat: &mut impl LocalMatrix) -> Result<()> {
        let bytes = mat.local_byte_len();
        let local = mat.local_mut();
        let algorithm = collective::select_algorithm(
            self.intermodel.size(),
            local.height(),
            local.width(),
            self.config.recursive_doubling_max_dim,
        );
        let opts = AllreduceOptions {
            id_recv: false,
            no_local_transform: false,
        };
        let mut scratch = self.scratch.lock().await;
        let Scratch { pool, staging } = &mut *scratch;
        let ctx = AllreduceContext::new(&self.intermodel, pool, staging, &self.topology.world_ranks_on_node, opts);
        collective::run_algorithm(algorithm, ctx, local, bytes, &mut IdentityTransform).await?;
        drop(scratch);
        self.count_sent(bytes);
        self.count_received(bytes);
        Ok(())
    }

    /// Overwrite the local shard of `mat` on every model with that of model `root`.
    pub async fn intermodel_broadcast_matrix(&self, mat: &mut impl LocalMatrix, root: u32) -> Result<()> {
        let mut payload = if self.intermodel.rank() == root {
            let mut staging = Vec::new();
            view_bytes(mat.local().view_all(), &mut staging).to_vec()
        } else {
            Vec::new()
        };
        self.intermodel.broadcast_bytes(root, &mut payload).await?;
        if self.intermodel.rank() == root {
            self.count_sent(payload.len());
        } else {
            fill_local(mat.local_mut(), &payload)?;
            self.count_received(payload.len());
        }
        Ok(())
    }

    /// Default options derived from the engine configuration.
    pub fn allreduce_options(&self) -> AllreduceOptions {
        AllreduceOptions {
            id_recv: false,
            no_local_transform: self.config.no_local_transform,
        }
    }

    /// Allreduce `mat` across models, picking the algorithm from the number
    /// of models and the matrix shape.
    ///
    /// `max_recv_bytes` bounds any single encoded message `transform` can
    /// produce for a region of `mat`.
    pub async fn intermodel_allreduce(
        &self,
        mat: &mut Mat,
        max_recv_bytes: usize,
        transform: &mut dyn AllreduceTransform,
        opts: AllreduceOptions,
    ) -> Result<()> {
        let algorithm = collective::select_algorithm(
            self.intermodel.size(),
            mat.height(),
            mat.width(),
            self.config.recursive_doubling_max_dim,
        );
        self.run(algorithm, &self.intermodel, mat, max_recv_bytes, transform, opts)
            .await
    }

    pub async fn recursive_doubling_allreduce(
        &self,
        comm: &Communicator,
        mat: &mut Mat,
        max_recv_bytes: usize,
        transform: &mut dyn AllreduceTransform,
        opts: AllreduceOptions,
    ) -> Result<()> {
        self.run(Algorithm::RecursiveDoubling, comm, mat, max_recv_bytes, transform, opts)
            .await
    }

    pub async fn pe_ring_allreduce(
        &self,
        comm: &Communicator,
        mat: &mut Mat,
        max_recv_bytes: usize,
        transform: &mut dyn AllreduceTransform,
        opts: AllreduceOptions,
    ) -> Result<()> {
        self.run(Algorithm::PairwiseExchangeRing, comm, mat, max_recv_bytes, transform, opts)
            .await
    }

    pub async fn ring_allreduce(
        &self,
        comm: &Communicator,
        mat: &mut Mat,
        max_recv_bytes: usize,
        transform: &mut dyn AllreduceTransform,
        opts: AllreduceOptions,
    ) -> Result<()> {
        self.run(Algorithm::Ring, comm, mat, max_recv_bytes, transform, opts)
            .await
    }

    pub async fn rabenseifner_allreduce(
        &self,
        comm: &Communicator,
        mat: &mut Mat,
        max_recv_bytes: usize,
        transform: &mut dyn AllreduceTransform,
        opts: AllreduceOptions,
    ) -> Result<()> {
        self.run(Algorithm::Rabenseifner, comm, mat, max_recv_bytes, transform, opts)
            .await
    }

    async fn run(
        &self,
        algorithm: Algorithm,
        comm: &Communicator,
        mat: &mut Mat,
        max_recv_bytes: usize,
        transform: &mut dyn AllreduceTransform,
        opts: AllreduceOptions,
    ) -> Result<()> {
        let start = Instant::now();
        let mut scratch = self.scratch.lock().await;
        let Scratch { pool, staging } = &mut *scratch;
        let ctx = AllreduceContext::new(comm, pool, staging, &self.topology.world_ranks_on_node, opts);
        let stats: AllreduceStats =
            collective::run_algorithm(algorithm, ctx, mat, max_recv_bytes, transform).await?;
        drop(scratch);

        tracing::debug!(
            %algorithm,
            nprocs = comm.size(),
            height = mat.height(),
            width = mat.width(),
            bytes_sent = stats.bytes_sent,
            elapsed_us = start.elapsed().as_micros() as u64,
            "allreduce"
        );
        self.stats_mut().merge_allreduce(stats);
        Ok(())
    }

    // ---- Barriers ----

    pub async fn model_barrier(&self) -> Result<()> {
        self.stats_mut().num_model_barriers += 1;
        self.model.barrier().await
    }

    pub async fn intermodel_barrier(&self) -> Result<()> {
        self.stats_mut().num_intermodel_barriers += 1;
        self.intermodel.barrier().await
    }

    pub async fn global_barrier(&self) -> Result<()> {
        self.stats_mut().num_global_barriers += 1;
        self.world.barrier().await
    }
}

impl std::fmt::Debug for HierComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierComm")
            .field("topology", &self.topology)
            .field("config", &self.config)
            .finish()
    }
}

/// Copy a received message into `buf`, returning the element count.
fn copy_scalars(msg: &[u8], buf: &mut [Scalar]) -> Result<usize> {
    if msg.len() % SCALAR_BYTES != 0 {
        return Err(CommError::DecodeFailed(format!(
            "message of {} bytes is not a whole number of {SCALAR_BYTES}-byte elements",
            msg.len()
        )));
    }
    let count = msg.len() / SCALAR_BYTES;
    if count > buf.len() {
        return Err(CommError::Truncated {
            capacity: std::mem::size_of_val(buf),
            actual: msg.len(),
        });
    }
    bytemuck::cast_slice_mut::<Scalar, u8>(&mut buf[..count]).copy_from_slice(msg);
    Ok(count)
}

/// Overwrite a local shard with a received message of exactly its size.
fn fill_local(local: &mut Mat, msg: &[u8]) -> Result<()> {
    let mut view = local.view_all_mut();
    if msg.len() != view.byte_len() {
        return Err(CommError::BufferSizeMismatch {
            expected: view.byte_len(),
            actual: msg.len(),
        });
    }
    view.copy_from_bytes(msg)?;
    Ok(())
}
