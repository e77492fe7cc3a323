use super::{AllreduceTransform, apply_raw};
use crate::error::Result;
use crate::matrix::{MatView, MatViewMut};
use crate::types::Phase;

/// Raw scalar bytes on the wire: receive copies, apply sums.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

impl AllreduceTransform for IdentityTransform {
    fn send_transform(
        &mut self,
        view: MatView<'_>,
        _phase: Phase,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        view.extend_bytes(out);
        Ok(())
    }

    fn recv_transform(&mut self, buf: &[u8], mut dst: MatViewMut<'_>) -> Result<usize> {
        dst.copy_from_bytes(buf)
    }

    fn recv_apply_transform(
        &mut self,
        buf: &[u8],
        dst: MatViewMut<'_>,
        _is_local: bool,
    ) -> Result<usize> {
        apply_raw(buf, dst)
    }

    fn is_identity(&self) -> bool {
        true
    }
}
