pub mod buffer_pool;
pub mod collective;
pub mod comm;
pub mod config;
pub mod engine;
pub mod error;
pub mod matrix;
pub mod metrics;
pub mod sync_engine;
pub mod topology;
pub mod transform;
pub mod transport;
pub mod types;

pub use buffer_pool::BufferPool;
pub use collective::{Algorithm, AllreduceOptions, SliceLayout, select_algorithm};
pub use comm::Communicator;
pub use config::CommConfig;
pub use engine::HierComm;
pub use error::{CommError, Result};
pub use matrix::{DistMat, LocalMatrix, Mat, MatView, MatViewMut};
pub use metrics::{AllreduceStats, CommStats};
pub use sync_engine::SyncHierComm;
pub use topology::{ModelLayout, ProcessTopology};
pub use transform::{AllreduceTransform, IdentityTransform, QuantizedTransform, TopKTransform};
pub use transport::{LocalTransport, TcpTransport, Transport};
pub use types::{Phase, Rank, SCALAR_BYTES, Scalar};
