use super::{AllreduceContext, SliceLayout, apply_received, check_options, exchange, outgoing, ring_allgather};
use crate::error::Result;
use crate::matrix::Mat;
use crate::metrics::{AllreduceStats, StepKind};
use crate::transform::AllreduceTransform;
use crate::types::{Phase, Rank};
use std::time::Instant;

/// Ring reduce-scatter followed by a ring allgather.
///
/// Partial sums travel to the right neighbour only: at step `s` rank `r`
/// forwards slice `(r - s) % n` and adds its contribution to slice
/// `(r - s - 1) % n` arriving from the left. After `n - 1` steps rank `r`
/// owns the reduced slice `(r + 1) % n`.
pub async fn ring_allreduce(
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
    let dst = ((rank + 1) % n) as Rank;
    let src = ((rank + n - 1) % n) as Rank;
    let send_local = ctx.locality.is_local(dst);
    let recv_local = ctx.locality.is_local(src);

    let rs_start = Instant::now();
    for step in 0..n - 1 {
        let send_slice = (rank + n - step) % n;
        let recv_slice = (rank + 2 * n - step - 1) % n;
        let recv_range = layout.range(recv_slice);

        let send = outgoing(
            mat,
            layout.range(send_slice),
            send_local,
            Phase::ReduceScatter,
            transform,
            &mut *ctx.staging,
            &mut stats,
        )?;
        let sent = send.len();
        let recv_len = if recv_local {
            mat.view_cols(recv_range.clone()).byte_len()
        } else {
            max_recv
        };
        let recv_buf = ctx.pool.acquire(recv_len, 0)?;
        let (got, elapsed) = exchange(comm, dst, send, src, recv_buf).await?;
        apply_received(
            transform,
            &recv_buf[..got],
            mat.view_cols_mut(recv_range),
            recv_local,
            StepKind::ReduceScatter,
            elapsed,
            sent,
            &mut stats,
        )?;
        tracing::trace!(rank, step, send_slice, recv_slice, sent, got, "ring reduce-scatter step");
    }
    stats.rs_time += rs_start.elapsed();

    ring_allgather(&mut ctx, mat, &layout, (rank + 1) % n, max_recv, transform, &mut stats).await?;
    stats.ar_time += ar_start.elapsed();
    Ok(stats)
}
