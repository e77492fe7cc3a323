//! Point-to-point send/recv between two models.
//!
//! Spawns a 4-rank local world split into 2 models of 2 processes. Each rank
//! of model 0 sends a buffer to the same rank of model 1.
//!
//! ```bash
//! cargo run --example send_recv
//! ```

use hiercomm::{CommConfig, HierComm, LocalTransport, Scalar};
use std::sync::Arc;

#[tokio::main]
async fn main() -> hiercomm::Result<()> {
    let config = CommConfig::default().with_procs_per_model(2);
    let engines: Vec<Arc<HierComm>> = futures::future::try_join_all(
        LocalTransport::mesh(4)
            .into_iter()
            .map(|t| HierComm::new(Arc::new(t), config.clone())),
    )
    .await?
    .into_iter()
    .map(Arc::new)
    .collect();

    let mut handles = Vec::new();
    for engine in &engines {
        let e = Arc::clone(engine);
        handles.push(tokio::spawn(async move {
            let peer = e.rank_in_model();
            if e.model_rank() == 0 {
                let data: Vec<Scalar> = (1..=4).map(|i| (i * (peer + 1)) as Scalar).collect();
                e.send_buffer(&data, 1, peer).await?;
                hiercomm::Result::Ok(None)
            } else {
                // Sends are buffered, so the receive can be posted late.
                let mut buf = vec![0.0 as Scalar; 4];
                e.recv_buffer(&mut buf, 0, peer).await?;
                Ok(Some((e.rank_in_world(), buf)))
            }
        }));
    }

    for h in handles {
        if let Some((rank, buf)) = h.await.unwrap()? {
            println!("world rank {rank} received: {buf:?}");
        }
    }
    // Output:
    // world rank 2 received: [1.0, 2.0, 3.0, 4.0]
    // world rank 3 received: [2.0, 4.0, 6.0, 8.0]

    Ok(())
}
