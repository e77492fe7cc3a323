use super::{
    AllreduceContext, SliceLayout, apply_received, check_options, decode_received, exchange,
    outgoing, recv_raw_into, require_pow2, send_step,
};
use crate::error::Result;
use crate::matrix::Mat;
use crate::metrics::{AllreduceStats, StepKind};
use crate::transform::AllreduceTransform;
use crate::types::{Phase, Rank};
use std::ops::Range;
use std::time::Instant;

/// One exchange of the halving/doubling schedule, in slice indices.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    partner: usize,
    send: Range<usize>,
    recv: Range<usize>,
}

/// Recursive-halving reduce-scatter schedule.
///
/// The active range starts as every slice. At each step the rank keeps the
/// lower half when its `mask` bit is clear, the upper half otherwise, and
/// sends the other half to `rank ^ mask`. It ends owning exactly slice `rank`.
fn halving_schedule(rank: usize, n: usize) -> Vec<Step> {
    let mut steps = Vec::new();
    let (mut lo, mut hi) = (0, n);
    let mut mask = n >> 1;
    while mask > 0 {
        let mid = lo + (hi - lo) / 2;
        let (keep, send) = if rank & mask == 0 {
            (lo..mid, mid..hi)
        } else {
            (mid..hi, lo..mid)
        };
        steps.push(Step {
            partner: rank ^ mask,
            send,
            recv: keep.clone(),
        });
        (lo, hi) = (keep.start, keep.end);
        mask >>= 1;
    }
    steps
}

/// Recursive-doubling allgather schedule, the mirror of [`halving_schedule`].
///
/// Starting from slice `rank`, each step sends everything held so far and
/// receives the partner's equally sized block on the other side.
fn doubling_schedule(rank: usize, n: usize) -> Vec<Step> {
    let mut steps = Vec::new();
    let (mut lo, mut hi) = (rank, rank + 1);
    let mut mask = 1;
    while mask < n {
        let size = hi - lo;
        let recv = if rank & mask == 0 {
            hi..hi + size
        } else {
            lo - size..lo
        };
        steps.push(Step {
            partner: rank ^ mask,
            send: lo..hi,
            recv: recv.clone(),
        });
        (lo, hi) = (lo.min(recv.start), hi.max(recv.end));
        mask <<= 1;
    }
    steps
}

/// Rabenseifner's allreduce: recursive-halving reduce-scatter followed by a
/// recursive-doubling allgather. Requires a power-of-2 number of processes.
pub async fn rabenseifner_allreduce(
    ctx: AllreduceContext<'_>,
    mat: &mut Mat,
    max_recv: usize,
    transform: &mut dyn AllreduceTransform,
) -> Result<AllreduceStats> {
    let ar_start = Instant::now();
    let mut stats = AllreduceStats {
        calls: 1,
        ..Default::default()
    };
    let comm = ctx.comm;
    let n = comm.size() as usize;
    if n == 1 {
        return Ok(stats);
    }
    require_pow2("rabenseifner allreduce", comm.size())?;
    check_options(ctx.id_recv, transform)?;
    let rank = comm.rank() as usize;
    let layout = SliceLayout::new(mat.width(), n);

    let rs_start = Instant::now();
    for (i, step) in halving_schedule(rank, n).into_iter().enumerate() {
        let is_local = ctx.locality.is_local(step.partner as Rank);
        let recv_cols = layout.span(step.recv.start, step.recv.end);
        let send = outgoing(
            mat,
            layout.span(step.send.start, step.send.end),
            is_local,
            Phase::ReduceScatter,
            transform,
            &mut *ctx.staging,
            &mut stats,
        )?;
        let sent = send.len();
        let recv_len = if is_local {
            mat.view_cols(recv_cols.clone()).byte_len()
        } else {
            max_recv
        };
        let recv_buf = ctx.pool.acquire(recv_len, 0)?;
        let partner = step.partner as Rank;
        let (got, elapsed) = exchange(comm, partner, send, partner, recv_buf).await?;
        apply_received(
            transform,
            &recv_buf[..got],
            mat.view_cols_mut(recv_cols),
            is_local,
            StepKind::ReduceScatter,
            elapsed,
            sent,
            &mut stats,
        )?;
        tracing::trace!(rank, step = i, partner, is_local, sent, got, "rabenseifner halving step");
    }
    stats.rs_time += rs_start.elapsed();

    let ag_start = Instant::now();
    for (i, step) in doubling_schedule(rank, n).into_iter().enumerate() {
        let is_local = ctx.locality.is_local(step.partner as Rank);
        let partner = step.partner as Rank;
        let recv_cols = layout.span(step.recv.start, step.recv.end);
        let send = outgoing(
            mat,
            layout.span(step.send.start, step.send.end),
            is_local,
            Phase::Allgather,
            transform,
            &mut *ctx.staging,
            &mut stats,
        )?;
        let sent = send.len();
        let start = Instant::now();
        let got = if is_local || ctx.id_recv {
            send_step(comm, partner, send).await?;
            let got = recv_raw_into(comm, partner, mat.view_cols_mut(recv_cols)).await?;
            stats.record_exchange(StepKind::Allgather, start.elapsed(), sent, got);
            got
        } else {
            let recv_buf = ctx.pool.acquire(max_recv, 0)?;
            let (got, elapsed) = exchange(comm, partner, send, partner, recv_buf).await?;
            let used = decode_received(transform, &recv_buf[..got], mat.view_cols_mut(recv_cols), &mut stats)?;
            stats.record_exchange(StepKind::Allgather, elapsed, sent, used);
            used
        };
        tracing::trace!(rank, step = i, partner, is_local, sent, got, "rabenseifner doubling step");
    }
    stats.ag_time += ag_start.elapsed();
    stats.ar_time += ar_start.elapsed();
    Ok(stats)
}
