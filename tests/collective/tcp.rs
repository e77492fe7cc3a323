use hiercomm::{CommConfig, HierComm, IdentityTransform, SCALAR_BYTES, TcpTransport, Transport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use super::helpers::{expected_sum, rank_matrix};

/// Bind one listener per rank on an ephemeral port, then build the mesh
/// on every rank concurrently.
async fn loopback_mesh(world_size: usize) -> Vec<TcpTransport> {
    let mut listeners = Vec::new();
    let mut addrs: Vec<SocketAddr> = Vec::new();
    for _ in 0..world_size {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        addrs.push(l.local_addr().unwrap());
        listeners.push(l);
    }
    let addrs = Arc::new(addrs);
    let mut handles = Vec::new();
    for (rank, listener) in listeners.into_iter().enumerate() {
        let addrs = Arc::clone(&addrs);
        handles.push(tokio::spawn(async move {
            TcpTransport::from_listener(rank as u32, listener, &addrs)
                .await
                .unwrap()
        }));
    }
    let mut out = Vec::new();
    for h in handles {
        out.push(h.await.unwrap());
    }
    out
}

#[tokio::test]
async fn test_tcp_mesh_ranks() {
    let transports = loopback_mesh(3).await;
    for (i, t) in transports.iter().enumerate() {
        assert_eq!(t.world_rank(), i as u32);
        assert_eq!(t.world_size(), 3);
    }
}

#[tokio::test]
async fn test_engine_allreduce_over_tcp() {
    let transports = loopback_mesh(3).await;
    let mut handles = Vec::new();
    for t in transports {
        handles.push(tokio::spawn(async move {
            let config = CommConfig::default().with_procs_per_model(1);
            let e = HierComm::new(Arc::new(t), config).await.unwrap();
            let mut mat = rank_matrix(e.rank_in_world(), 3, 4);
            let opts = e.allreduce_options();
            e.intermodel_allreduce(&mut mat, 12 * SCALAR_BYTES, &mut IdentityTransform, opts)
                .await
                .unwrap();
            e.global_barrier().await.unwrap();
            mat.to_col_major()
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap(), expected_sum(3, 3, 4));
    }
}
