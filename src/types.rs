/// Rank of a participant in a communicator group (0-indexed).
pub type Rank = u32;

/// Element type of every matrix the engine moves.
///
/// One width is shared process-wide; enable the `f64` feature for doubles.
#[cfg(not(feature = "f64"))]
pub type Scalar = f32;

/// Element type of every matrix the engine moves.
#[cfg(feature = "f64")]
pub type Scalar = f64;

/// Size of one [`Scalar`] in bytes.
pub const SCALAR_BYTES: usize = std::mem::size_of::<Scalar>();

/// Which half of a reduce-scatter/allgather allreduce a transform is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Partial data that the receiver will accumulate.
    ReduceScatter,
    /// Fully reduced data that the receiver will copy.
    Allgather,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::ReduceScatter => f.write_str("reduce-scatter"),
            Phase::Allgather => f.write_str("allgather"),
        }
    }
}
