use hiercomm::{
    Algorithm, AllreduceOptions, AllreduceTransform, CommConfig, HierComm, LocalTransport, Mat,
    Scalar,
};
use std::sync::Arc;

/// Build one engine per entry of `hosts`, all connected in-process.
/// Rank `i` reports `hosts[i]` as its processor name.
pub async fn build_engines(hosts: &[&str], config: CommConfig) -> Vec<Arc<HierComm>> {
    let mut pending = Vec::new();
    for t in LocalTransport::mesh_with_hosts(hosts) {
        let config = config.clone();
        pending.push(tokio::spawn(async move {
            HierComm::new(Arc::new(t), config).await.unwrap()
        }));
    }
    let mut engines = Vec::new();
    for p in pending {
        engines.push(Arc::new(p.await.unwrap()));
    }
    engines
}

/// Run `f` on every rank concurrently and collect the results in world-rank
/// order. Keeps all engines alive until every task completes.
pub async fn run_ranks_on_hosts<F, Fut, T>(hosts: &[&str], config: CommConfig, f: F) -> Vec<T>
where
    F: Fn(Arc<HierComm>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let engines = build_engines(hosts, config).await;
    let f = Arc::new(f);
    let mut handles = Vec::new();
    for e in &engines {
        let e = Arc::clone(e);
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move { f(e).await }));
    }
    let mut out = Vec::new();
    for h in handles {
        out.push(h.await.unwrap());
    }
    out
}

/// [`run_ranks_on_hosts`] with every rank on one host.
pub async fn run_ranks<F, Fut, T>(world_size: usize, config: CommConfig, f: F) -> Vec<T>
where
    F: Fn(Arc<HierComm>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let hosts = vec!["node0"; world_size];
    run_ranks_on_hosts(&hosts, config, f).await
}

/// One model per rank, so the inter-model communicator spans the world.
pub fn one_per_model() -> CommConfig {
    CommConfig::default().with_procs_per_model(1)
}

/// Deterministic per-rank contents: `rank * 100 + row + 10 * col`.
pub fn rank_matrix(rank: u32, height: usize, width: usize) -> Mat {
    let mut m = Mat::new(height, width);
    for j in 0..width {
        for i in 0..height {
            m.set(i, j, rank_value(rank, i, j));
        }
    }
    m
}

pub fn rank_value(rank: u32, row: usize, col: usize) -> Scalar {
    (rank as usize * 100 + row + 10 * col) as Scalar
}

/// Element-wise sum of [`rank_matrix`] over `nprocs` ranks, column-major.
pub fn expected_sum(nprocs: u32, height: usize, width: usize) -> Vec<Scalar> {
    let mut out = Vec::with_capacity(height * width);
    for j in 0..width {
        for i in 0..height {
            out.push((0..nprocs).map(|r| rank_value(r, i, j)).sum());
        }
    }
    out
}

/// Run `algorithm` over the inter-model communicator of `e`.
pub async fn allreduce_with(
    e: &HierComm,
    algorithm: Algorithm,
    mat: &mut Mat,
    max_recv: usize,
    transform: &mut dyn AllreduceTransform,
    opts: AllreduceOptions,
) -> hiercomm::Result<()> {
    let comm = e.intermodel_comm();
    match algorithm {
        Algorithm::RecursiveDoubling => {
            e.recursive_doubling_allreduce(comm, mat, max_recv, transform, opts)
                .await
        }
        Algorithm::PairwiseExchangeRing => {
            e.pe_ring_allreduce(comm, mat, max_recv, transform, opts)
                .await
        }
        Algorithm::Ring => e.ring_allreduce(comm, mat, max_recv, transform, opts).await,
        Algorithm::Rabenseifner => {
            e.rabenseifner_allreduce(comm, mat, max_recv, transform, opts)
                .await
        }
    }
}

/// Options that force every exchange through the transform.
pub fn remote_only() -> AllreduceOptions {
    AllreduceOptions {
        id_recv: false,
        no_local_transform: false,
    }
}
