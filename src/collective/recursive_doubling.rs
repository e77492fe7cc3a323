use super::{AllreduceContext, apply_received, check_options, exchange, outgoing, require_pow2};
use crate::error::Result;
use crate::matrix::Mat;
use crate::metrics::{AllreduceStats, StepKind};
use crate::transform::AllreduceTransform;
use crate::types::Phase;
use std::time::Instant;

/// Recursive-doubling allreduce.
///
/// For `log2(n)` steps each rank exchanges its whole matrix with
/// `rank ^ mask` and accumulates the partner's contribution. Requires a
/// power-of-2 number of processes. Best for small matrices, where latency
/// dominates bandwidth.
pub async fn recursive_doubling_allreduce(
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
    let rank = comm.rank();
    let nprocs = comm.size();
    if nprocs == 1 {
        return Ok(stats);
    }
    require_pow2("recursive doubling allreduce", nprocs)?;
    check_options(ctx.id_recv, transform)?;

    let raw_len = mat.view_all().byte_len();
    let width = mat.width();
    let mut mask = 1;
    while mask < nprocs {
        let partner = rank ^ mask;
        let is_local = ctx.locality.is_local(partner);
        let send = outgoing(
            mat,
            0..width,
            is_local,
            Phase::ReduceScatter,
            transform,
            &mut *ctx.staging,
            &mut stats,
        )?;
        let sent = send.len();
        let recv_buf = ctx.pool.acquire(if is_local { raw_len } else { max_recv }, 0)?;
        let (got, elapsed) = exchange(comm, partner, send, partner, recv_buf).await?;
        apply_received(
            transform,
            &recv_buf[..got],
            mat.view_all_mut(),
            is_local,
            StepKind::Whole,
            elapsed,
            sent,
            &mut stats,
        )?;
        tracing::trace!(rank, partner, mask, is_local, sent, got, "recursive doubling step");
        mask <<= 1;
    }

    stats.ar_time += ar_start.elapsed();
    Ok(stats)
}
