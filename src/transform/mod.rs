//! Encoding strategies plugged into the allreduce algorithms.
//!
//! An algorithm only moves bytes. What those bytes mean, and how a received
//! message is folded into the local matrix, is decided by an
//! [`AllreduceTransform`].

mod identity;
mod quantized;
mod topk;

pub use identity::IdentityTransform;
pub use quantized::QuantizedTransform;
pub use topk::TopKTransform;

use crate::error::Result;
use crate::matrix::{MatView, MatViewMut};
use crate::types::Phase;

/// Serialization and reduction policy for one allreduce call.
///
/// Every method returns or produces wire bytes for exactly one matrix region.
/// The `*_transform` methods that read a buffer return how many bytes of it
/// they consumed; the ring allgather forwards exactly that many bytes.
pub trait AllreduceTransform: Send {
    /// Encode `view` into `out`. `out` is empty on entry.
    fn send_transform(&mut self, view: MatView<'_>, phase: Phase, out: &mut Vec<u8>)
    -> Result<()>;

    /// Decode `buf` into `dst`, overwriting it.
    fn recv_transform(&mut self, buf: &[u8], dst: MatViewMut<'_>) -> Result<usize>;

    /// Decode `buf` and add it element-wise into `dst`.
    ///
    /// With `is_local` set the sender skipped `send_transform` and `buf`
    /// holds raw native-endian scalars.
    fn recv_apply_transform(
        &mut self,
        buf: &[u8],
        dst: MatViewMut<'_>,
        is_local: bool,
    ) -> Result<usize>;

    /// True when the wire format is the raw scalars, so receivers may write
    /// straight into the destination matrix.
    fn is_identity(&self) -> bool {
        false
    }
}

/// Sum raw scalars from a node-local peer into `dst`.
pub(crate) fn apply_raw(buf: &[u8], mut dst: MatViewMut<'_>) -> Result<usize> {
    dst.add_from_bytes(buf)
}
