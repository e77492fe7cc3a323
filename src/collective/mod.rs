//! Allreduce algorithms over a [`Communicator`].
//!
//! Each algorithm reduces a local [`Mat`] in place across the members of a
//! communicator, moving bytes produced by an [`AllreduceTransform`], and
//! returns the [`AllreduceStats`] of that call. Steps are strictly
//! sequential: one exchange completes before the next begins.

mod dispatch;
mod pe_ring;
mod rabenseifner;
mod recursive_doubling;
mod ring;
mod slices;

pub use dispatch::{Algorithm, run_algorithm, select_algorithm};
pub use pe_ring::pe_ring_allreduce;
pub use rabenseifner::rabenseifner_allreduce;
pub use recursive_doubling::recursive_doubling_allreduce;
pub use ring::ring_allreduce;
pub use slices::SliceLayout;

use crate::buffer_pool::BufferPool;
use crate::comm::{COLLECTIVE_TAG, Communicator};
use crate::error::{CommError, Result};
use crate::matrix::{Mat, MatViewMut};
use crate::metrics::{AllreduceStats, StepKind, timed};
use crate::transform::AllreduceTransform;
use crate::types::{Phase, Rank};
use std::time::{Duration, Instant};

/// Per-call switches for the allreduce algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllreduceOptions {
    /// Receive allgather data straight into the matrix. Requires a
    /// transform whose wire format is the raw scalars.
    pub id_recv: bool,
    /// Exchange raw scalars with node-local partners, skipping the transform.
    pub no_local_transform: bool,
}

impl Default for AllreduceOptions {
    fn default() -> Self {
        Self {
            id_recv: false,
            no_local_transform: true,
        }
    }
}

/// Which members of a communicator share this process's node.
#[derive(Debug, Clone, Copy)]
pub struct Locality<'a> {
    comm: &'a Communicator,
    world_ranks_on_node: &'a [Rank],
    enabled: bool,
}

impl<'a> Locality<'a> {
    pub fn new(comm: &'a Communicator, world_ranks_on_node: &'a [Rank], enabled: bool) -> Self {
        Self {
            comm,
            world_ranks_on_node,
            enabled,
        }
    }

    /// True if the raw path should be used with `peer`.
    pub fn is_local(&self, peer: Rank) -> bool {
        self.enabled
            && self
                .comm
                .world_rank_of(peer)
                .is_ok_and(|w| self.world_ranks_on_node.contains(&w))
    }
}

/// Everything an algorithm needs besides the matrix and the transform.
pub struct AllreduceContext<'a> {
    pub comm: &'a Communicator,
    pub pool: &'a mut BufferPool,
    /// Reusable buffer for encoded or packed outgoing data.
    pub staging: &'a mut Vec<u8>,
    pub locality: Locality<'a>,
    pub id_recv: bool,
}

impl<'a> AllreduceContext<'a> {
    pub fn new(
        comm: &'a Communicator,
        pool: &'a mut BufferPool,
        staging: &'a mut Vec<u8>,
        world_ranks_on_node: &'a [Rank],
        opts: AllreduceOptions,
    ) -> Self {
        Self {
            comm,
            pool,
            staging,
            locality: Locality::new(comm, world_ranks_on_node, opts.no_local_transform),
            id_recv: opts.id_recv,
        }
    }
}

pub(crate) const OP: &str = "allreduce";

/// Reject option combinations the algorithms cannot honour.
fn check_options(id_recv: bool, transform: &dyn AllreduceTransform) -> Result<()> {
    if id_recv && !transform.is_identity() {
        return Err(CommError::config(
            "id_recv requires a transform whose wire format is the raw scalars",
        ));
    }
    Ok(())
}

fn require_pow2(algorithm: &'static str, nprocs: u32) -> Result<()> {
    if !nprocs.is_power_of_two() {
        return Err(CommError::NotPowerOfTwo {
            algorithm,
            nprocs: nprocs as usize,
        });
    }
    Ok(())
}

/// Send `send` to `dest` then receive from `src` into `recv`.
async fn exchange(
    comm: &Communicator,
    dest: Rank,
    send: &[u8],
    src: Rank,
    recv: &mut [u8],
) -> Result<(usize, Duration)> {
    let start = Instant::now();
    let n = comm.sendrecv(dest, send, src, recv, OP).await?;
    Ok((n, start.elapsed()))
}

async fn send_step(comm: &Communicator, dest: Rank, send: &[u8]) -> Result<()> {
    comm.collective_send(dest, COLLECTIVE_TAG, send, OP).await
}

/// Receive raw scalars from `src` and overwrite `dst` with them.
async fn recv_raw_into(comm: &Communicator, src: Rank, mut dst: MatViewMut<'_>) -> Result<usize> {
    let msg = comm.collective_recv(src, COLLECTIVE_TAG, OP).await?;
    if msg.len() != dst.byte_len() {
        return Err(CommError::BufferSizeMismatch {
            expected: dst.byte_len(),
            actual: msg.len(),
        });
    }
    dst.copy_from_bytes(&msg)
}

/// Prepare outgoing bytes for a column range of `mat`: packed raw scalars
/// when `raw`, the transform's encoding otherwise. The result lives in
/// `staging` unless the raw region is already contiguous.
fn outgoing<'m>(
    mat: &'m Mat,
    cols: std::ops::Range<usize>,
    raw: bool,
    phase: Phase,
    transform: &mut dyn AllreduceTransform,
    staging: &'m mut Vec<u8>,
    stats: &mut AllreduceStats,
) -> Result<&'m [u8]> {
    let start = Instant::now();
    let view = mat.view_cols(cols);
    let out = if raw {
        crate::matrix::view_bytes(view, staging)
    } else {
        staging.clear();
        transform.send_transform(view, phase, staging)?;
        &staging[..]
    };
    stats.send_transform_time += start.elapsed();
    Ok(out)
}

/// Fold a received buffer into `dst` and charge the exchange.
#[allow(clippy::too_many_arguments)]
fn apply_received(
    transform: &mut dyn AllreduceTransform,
    buf: &[u8],
    dst: MatViewMut<'_>,
    is_local: bool,
    kind: StepKind,
    elapsed: Duration,
    sent: usize,
    stats: &mut AllreduceStats,
) -> Result<usize> {
    let consumed = timed(&mut stats.recv_apply_transform_time, || {
        transform.recv_apply_transform(buf, dst, is_local)
    })?;
    stats.record_exchange(kind, elapsed, sent, consumed);
    Ok(consumed)
}

/// Ring allgather shared by the pairwise-exchange and ring algorithms.
///
/// On entry this rank holds the fully reduced slice `own`. Each step sends
/// the most recently obtained slice to the right neighbour and receives the
/// next one from the left, so after `n - 1` steps every slice is present.
/// Without `id_recv`, forwarded messages are passed on exactly as received,
/// alternating between two scratch slots. With `id_recv` each step receives
/// raw scalars straight into its matrix slice and the next step re-packs
/// that slice from the matrix.
///
/// The send and receive regions of a step never alias: the two scratch slots
/// come from disjoint halves of one allocation, and consecutive matrix slices
/// differ for `n >= 2`. The debug assertions restate this.
async fn ring_allgather(
    ctx: &mut AllreduceContext<'_>,
    mat: &mut Mat,
    layout: &SliceLayout,
    own: usize,
    max_recv: usize,
    transform: &mut dyn AllreduceTransform,
    stats: &mut AllreduceStats,
) -> Result<()> {
    let comm = ctx.comm;
    let n = comm.size() as usize;
    let rank = comm.rank() as usize;
    let dst = ((rank + 1) % n) as Rank;
    let src = ((rank + n - 1) % n) as Rank;
    let recv_slice = |step: usize| (own + n - 1 - step) % n;
    let phase_start = Instant::now();

    // First step forwards our own reduced slice, encoded once.
    if ctx.id_recv {
        let mut prev = recv_slice(0);
        let send = outgoing(mat, layout.range(own), false, Phase::Allgather, transform, ctx.staging, stats)?;
        let send_len = send.len();
        let start = Instant::now();
        send_step(comm, dst, send).await?;
        let got = recv_raw_into(comm, src, mat.view_cols_mut(layout.range(prev))).await?;
        stats.record_exchange(StepKind::Allgather, start.elapsed(), send_len, got);

        for step in 1..n - 1 {
            let next = recv_slice(step);
            debug_assert_ne!(next, prev, "allgather step {step} reuses slice {prev}");
            let start = Instant::now();
            let send = crate::matrix::view_bytes(mat.view_cols(layout.range(prev)), ctx.staging);
            let sent = send.len();
            send_step(comm, dst, send).await?;
            let got = recv_raw_into(comm, src, mat.view_cols_mut(layout.range(next))).await?;
            stats.record_exchange(StepKind::Allgather, start.elapsed(), sent, got);
            prev = next;
        }
    } else {
        let send = outgoing(mat, layout.range(own), false, Phase::Allgather, transform, ctx.staging, stats)?;
        let send_len = send.len();
        let (mut a, mut b) = ctx.pool.acquire_pair(max_recv)?;
        let (got, elapsed) = exchange(comm, dst, send, src, a).await?;
        let first = layout.range(recv_slice(0));
        let mut fwd = decode_received(transform, &a[..got], mat.view_cols_mut(first), stats)?;
        stats.record_exchange(StepKind::Allgather, elapsed, send_len, fwd);

        for step in 1..n - 1 {
            debug_assert!(!overlaps(a, b), "allgather step {step} slots alias");
            let next = recv_slice(step);
            let (got, elapsed) = exchange(comm, dst, &a[..fwd], src, b).await?;
            let sent = fwd;
            fwd = decode_received(transform, &b[..got], mat.view_cols_mut(layout.range(next)), stats)?;
            stats.record_exchange(StepKind::Allgather, elapsed, sent, fwd);
            std::mem::swap(&mut a, &mut b);
        }
    }

    stats.ag_time += phase_start.elapsed();
    Ok(())
}

/// Decode a forwarded allgather message. Returns the bytes it occupied.
fn decode_received(
    transform: &mut dyn AllreduceTransform,
    buf: &[u8],
    dst: MatViewMut<'_>,
    stats: &mut AllreduceStats,
) -> Result<usize> {
    let consumed = timed(&mut stats.recv_transform_time, || transform.recv_transform(buf, dst))?;
    if consumed > buf.len() {
        return Err(CommError::DecodeFailed(format!(
            "transform consumed {consumed} bytes of a {}-byte message",
            buf.len()
        )));
    }
    Ok(consumed)
}

fn overlaps(a: &[u8], b: &[u8]) -> bool {
    let (a0, b0) = (a.as_ptr() as usize, b.as_ptr() as usize);
    !a.is_empty() && !b.is_empty() && a0 < b0 + b.len() && b0 < a0 + a.len()
}
