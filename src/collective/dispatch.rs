use super::{
    AllreduceContext, pe_ring_allreduce, rabenseifner_allreduce, recursive_doubling_allreduce,
    ring_allreduce,
};
use crate::error::Result;
use crate::matrix::Mat;
use crate::metrics::AllreduceStats;
use crate::transform::AllreduceTransform;
use std::fmt;

/// The allreduce algorithms the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    RecursiveDoubling,
    PairwiseExchangeRing,
    Ring,
    Rabenseifner,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RecursiveDoubling => "recursive_doubling",
            Self::PairwiseExchangeRing => "pe_ring",
            Self::Ring => "ring",
            Self::Rabenseifner => "rabenseifner",
        };
        f.write_str(name)
    }
}

/// Pick the algorithm for an allreduce over `nprocs` processes of a
/// `height x width` matrix.
///
/// Small matrices on a power-of-2 group use recursive doubling; everything
/// else uses the pairwise-exchange ring, which handles any group size.
pub fn select_algorithm(nprocs: u32, height: usize, width: usize, max_dim: usize) -> Algorithm {
    if nprocs.is_power_of_two() && height <= max_dim && width <= max_dim {
        Algorithm::RecursiveDoubling
    } else {
        Algorithm::PairwiseExchangeRing
    }
}

/// Run `algorithm` with the given context.
pub async fn run_algorithm(
    algorithm: Algorithm,
    ctx: AllreduceContext<'_>,
    mat: &mut Mat,
    max_recv: usize,
    transform: &mut dyn AllreduceTransform,
) -> Result<AllreduceStats> {
    match algorithm {
        Algorithm::RecursiveDoubling => {
            recursive_doubling_allreduce(ctx, mat, max_recv, transform).await
        }
        Algorithm::PairwiseExchangeRing => pe_ring_allreduce(ctx, mat, max_recv, transform).await,
        Algorithm::Ring => ring_allreduce(ctx, mat, max_recv, transform).await,
        Algorithm::Rabenseifner => rabenseifner_allreduce(ctx, mat, max_recv, transform).await,
    }
}
