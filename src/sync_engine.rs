use crate::collective::AllreduceOptions;
use crate::comm::Communicator;
use crate::config::CommConfig;
use crate::engine::HierComm;
use crate::error::{CommError, Result};
use crate::matrix::{LocalMatrix, Mat};
use crate::metrics::CommStats;
use crate::transform::AllreduceTransform;
use crate::transport::{LocalTransport, Transport};
use crate::types::{Rank, Scalar};
use std::sync::Arc;

fn new_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CommError::transport_with_source("tokio runtime", e))
}

/// Blocking wrapper around [`HierComm`].
///
/// Owns a `tokio::runtime::Runtime` and calls `block_on()` for each operation,
/// so every call returns only once its communication has completed.
pub struct SyncHierComm {
    inner: HierComm,
    rt: tokio::runtime::Runtime,
}

impl SyncHierComm {
    /// Build the engine for this process. Every world rank must call this at
    /// the same time (in its own process or thread).
    pub fn new(transport: Arc<dyn Transport>, config: CommConfig) -> Result<Self> {
        let rt = new_runtime()?;
        let inner = rt.block_on(HierComm::new(transport, config))?;
        Ok(Self { inner, rt })
    }

    /// Build `world_size` engines connected in-process, one per rank.
    ///
    /// Hand each one to its own thread: collective calls block until every
    /// member of the group has made the matching call.
    pub fn bootstrap_local(world_size: u32, config: CommConfig) -> Result<Vec<Self>> {
        let rt = new_runtime()?;
        let engines = rt.block_on(async {
            let pending: Vec<_> = LocalTransport::mesh(world_size)
                .into_iter()
                .map(|t| HierComm::new(Arc::new(t), config.clone()))
                .collect();
            futures::future::try_join_all(pending).await
        })?;

        // `block_on` is exclusive, so each engine gets its own runtime.
        let mut out = Vec::with_capacity(engines.len());
        let mut iter = engines.into_iter();
        if let Some(first) = iter.next() {
            out.push(Self { inner: first, rt });
        }
        for inner in iter {
            out.push(Self {
                inner,
                rt: new_runtime()?,
            });
        }
        Ok(out)
    }

    /// Wrap an existing async engine with a new tokio runtime.
    pub fn from_async(inner: HierComm) -> Result<Self> {
        Ok(Self {
            inner,
            rt: new_runtime()?,
        })
    }

    /// The async engine, for topology queries and communicator access.
    pub fn inner(&self) -> &HierComm {
        &self.inner
    }

    pub fn rank_in_world(&self) -> Rank {
        self.inner.rank_in_world()
    }

    pub fn model_rank(&self) -> u32 {
        self.inner.model_rank()
    }

    pub fn rank_in_model(&self) -> Rank {
        self.inner.rank_in_model()
    }

    pub fn num_models(&self) -> u32 {
        self.inner.num_models()
    }

    pub fn stats(&self) -> CommStats {
        self.inner.stats()
    }

    pub fn reset_stats(&self) {
        self.inner.reset_stats()
    }

    pub fn send_buffer(&self, data: &[Scalar], model: u32, rank: Rank) -> Result<()> {
        self.rt.block_on(self.inner.send_buffer(data, model, rank))
    }

    pub fn send_matrix(&self, mat: &impl LocalMatrix, model: u32, rank: Rank) -> Result<()> {
        self.rt.block_on(self.inner.send_matrix(mat, model, rank))
    }

    pub fn recv_buffer(&self, buf: &mut [Scalar], model: u32, rank: Rank) -> Result<usize> {
        self.rt.block_on(self.inner.recv_buffer(buf, model, rank))
    }

    pub fn recv_matrix(&self, mat: &mut impl LocalMatrix, model: u32, rank: Rank) -> Result<()> {
        self.rt.block_on(self.inner.recv_matrix(mat, model, rank))
    }

    pub fn recv_matrix_any(&self, mat: &mut impl LocalMatrix) -> Result<Rank> {
        self.rt.block_on(self.inner.recv_matrix_any(mat))
    }

    pub fn broadcast_buffer(&self, data: &mut [Scalar], dests: &[Rank], root: Rank) -> Result<()> {
        self.rt.block_on(self.inner.broadcast_buffer(data, dests, root))
    }

    pub fn broadcast_matrix(&self, mat: &mut impl LocalMatrix, dests: &[Rank], root: Rank) -> Result<()> {
        self.rt.block_on(self.inner.broadcast_matrix(mat, dests, root))
    }

    pub fn intermodel_sum_matrix(&self, mat: &mut impl LocalMatrix) -> Result<()> {
        self.rt.block_on(self.inner.intermodel_sum_matrix(mat))
    }

    pub fn intermodel_broadcast_matrix(&self, mat: &mut impl LocalMatrix, root: u32) -> Result<()> {
        self.rt.block_on(self.inner.intermodel_broadcast_matrix(mat, root))
    }

    pub fn intermodel_allreduce(
        &self,
        mat: &mut Mat,
        max_recv_bytes: usize,
        transform: &mut dyn AllreduceTransform,
        opts: AllreduceOptions,
    ) -> Result<()> {
        self.rt.block_on(
            self.inner
                .intermodel_allreduce(mat, max_recv_bytes, transform, opts),
        )
    }

    pub fn recursive_doubling_allreduce(
        &self,
        comm: &Communicator,
        mat: &mut Mat,
        max_recv_bytes: usize,
        transform: &mut dyn AllreduceTransform,
        opts: AllreduceOptions,
    ) -> Result<()> {
        self.rt.block_on(
            self.inner
                .recursive_doubling_allreduce(comm, mat, max_recv_bytes, transform, opts),
        )
    }

    pub fn pe_ring_allreduce(
        &self,
        comm: &Communicator,
        mat: &mut Mat,
        max_recv_bytes: usize,
        transform: &mut dyn AllreduceTransform,
        opts: AllreduceOptions,
    ) -> Result<()> {
        self.rt.block_on(
            self.inner
                .pe_ring_allreduce(comm, mat, max_recv_bytes, transform, opts),
        )
    }

    pub fn ring_allreduce(
        &self,
        comm: &Communicator,
        mat: &mut Mat,
        max_recv_bytes: usize,
        transform: &mut dyn AllreduceTransform,
        opts: AllreduceOptions,
    ) -> Result<()> {
        self.rt.block_on(
            self.inner
                .ring_allreduce(comm, mat, max_recv_bytes, transform, opts),
        )
    }

    pub fn rabenseifner_allreduce(
        &self,
        comm: &Communicator,
        mat: &mut Mat,
        max_recv_bytes: usize,
        transform: &mut dyn AllreduceTransform,
        opts: AllreduceOptions,
    ) -> Result<()> {
        self.rt.block_on(
            self.inner
                .rabenseifner_allreduce(comm, mat, max_recv_bytes, transform, opts),
        )
    }

    pub fn model_barrier(&self) -> Result<()> {
        self.rt.block_on(self.inner.model_barrier())
    }

    pub fn intermodel_barrier(&self) -> Result<()> {
        self.rt.block_on(self.inner.intermodel_barrier())
    }

    pub fn global_barrier(&self) -> Result<()> {
        self.rt.block_on(self.inner.global_barrier())
    }
}
