use super::{AllreduceContext, SliceLayout, apply_received, check_options, exchange, outgoing, ring_allgather};
use crate::error::Result;
use crate::matrix::Mat;
use crate::metrics::{AllreduceStats, StepKind};
use crate::transform::AllreduceTransform;
use crate::types::{Phase, Rank};
use std::time::Instant;

/// Pairwise-exchange reduce-scatter followed by a ring allgather.
///
/// Works for any number of processes. In step `s` of the reduce-scatter,
/// rank `r` sends slice `(r + s) % n` to its owner and accumulates slice `r`
/// received from `(r - s) % n`, so each rank ends up with its own slice fully
/// reduced before the allgather circulates them.
pub async fn pe_ring_allreduce(
    mut ctx: AllreduceContext<'_>,
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
    check_options(ctx.id_recv, transform)?;
    let rank = comm.rank() as usize;
    let layout = SliceLayout::new(mat.width(), n);
    let own = layout.range(rank);
    let own_raw_len = mat.view_cols(own.clone()).byte_len();

    let rs_start = Instant::now();
    for step in 1..n {
        let dst = (rank + step) % n;
        let src = (rank + n - step) % n;
        let send_local = ctx.locality.is_local(dst as Rank);
        let recv_local = ctx.locality.is_local(src as Rank);

        let send = outgoing(
            mat,
            layout.range(dst),
            send_local,
            Phase::ReduceScatter,
            transform,
            &mut *ctx.staging,
            &mut stats,
        )?;
        let sent = send.len();
        let recv_buf = ctx
            .pool
            .acquire(if recv_local { own_raw_len } else { max_recv }, 0)?;
        let (got, elapsed) = exchange(comm, dst as Rank, send, src as Rank, recv_buf).await?;
        apply_received(
            transform,
            &recv_buf[..got],
            mat.view_cols_mut(own.clone()),
            recv_local,
            StepKind::ReduceScatter,
            elapsed,
            sent,
            &mut stats,
        )?;
        tracing::trace!(rank, step, dst, src, send_local, recv_local, sent, got, "pe ring reduce-scatter step");
    }
    stats.rs_time += rs_start.elapsed();

    ring_allgather(&mut ctx, mat, &layout, rank, max_recv, transform, &mut stats).await?;
    stats.ar_time += ar_start.elapsed();
    Ok(stats)
}
