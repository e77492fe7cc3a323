//! Inter-model allreduce across 4 single-process models.
//!
//! Each rank starts with a 2x4 matrix filled with its own rank. After the
//! allreduce every rank holds the element-wise sum of all inputs. The engine
//! picks the algorithm from the model count and the matrix shape.
//!
//! ```bash
//! cargo run --example allreduce
//! ```

use hiercomm::{CommConfig, HierComm, IdentityTransform, LocalTransport, Mat, SCALAR_BYTES, Scalar};
use std::sync::Arc;

#[tokio::main]
async fn main() -> hiercomm::Result<()> {
    let world_size = 4u32;
    let config = CommConfig::default().with_procs_per_model(1);
    let engines: Vec<Arc<HierComm>> = futures::future::try_join_all(
        LocalTransport::mesh(world_size)
            .into_iter()
            .map(|t| HierComm::new(Arc::new(t), config.clone())),
    )
    .await?
    .into_iter()
    .map(Arc::new)
    .collect();

    let (height, width) = (2usize, 4usize);

    let mut handles = Vec::new();
    for engine in &engines {
        let e = Arc::clone(engine);
        handles.push(tokio::spawn(async move {
            let rank = e.rank_in_world();
            let mut mat = Mat::filled(height, width, rank as Scalar);
            let opts = e.allreduce_options();
            e.intermodel_allreduce(&mut mat, height * width * SCALAR_BYTES, &mut IdentityTransform, opts)
                .await?;
            hiercomm::Result::Ok((rank, mat.to_col_major(), e.stats()))
        }));
    }

    for h in handles {
        let (rank, data, stats) = h.await.unwrap()?;
        println!(
            "rank {rank}: {data:?} (sent {} bytes, received {} bytes)",
            stats.bytes_sent, stats.bytes_received
        );
    }
    // Output (all ranks identical):
    // rank 0: [6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0] ...

    Ok(())
}
