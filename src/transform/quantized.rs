use super::{AllreduceTransform, apply_raw};
use crate::error::{CommError, Result};
use crate::matrix::{MatView, MatViewMut};
use crate::types::{Phase, SCALAR_BYTES, Scalar};

/// Per-message 8-bit affine quantization.
///
/// Wire format: `[min: Scalar][scale: Scalar][codes: u8 * n]`, where element
/// `i` decodes to `min + codes[i] * scale` and `scale = (max - min) / 255`.
/// Each decoded element is within `scale / 2` of the original.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuantizedTransform;

const LEVELS: Scalar = 255.0;

impl QuantizedTransform {
    /// Wire size for a region of `len` elements.
    pub fn encoded_len(len: usize) -> usize {
        2 * SCALAR_BYTES + len
    }

    fn decode<'b>(buf: &'b [u8], len: usize) -> Result<(Scalar, Scalar, &'b [u8])> {
        let needed = Self::encoded_len(len);
        if buf.len() < needed {
            return Err(CommError::DecodeFailed(format!(
                "quantized message has {} bytes, need {needed} for {len} elements",
                buf.len()
            )));
        }
        let min: Scalar = bytemuck::pod_read_unaligned(&buf[..SCALAR_BYTES]);
        let scale: Scalar = bytemuck::pod_read_unaligned(&buf[SCALAR_BYTES..2 * SCALAR_BYTES]);
        Ok((min, scale, &buf[2 * SCALAR_BYTES..needed]))
    }
}

impl AllreduceTransform for QuantizedTransform {
    fn send_transform(
        &mut self,
        view: MatView<'_>,
        _phase: Phase,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let (mut min, mut max) = (Scalar::INFINITY, Scalar::NEG_INFINITY);
        for v in view.iter() {
            min = min.min(v);
            max = max.max(v);
        }
        if view.is_empty() {
            (min, max) = (0.0, 0.0);
        }
        let scale = (max - min) / LEVELS;

        out.reserve(Self::encoded_len(view.len()));
        out.extend_from_slice(bytemuck::bytes_of(&min));
        out.extend_from_slice(bytemuck::bytes_of(&scale));
        for v in view.iter() {
            let code = if scale > 0.0 {
                ((v - min) / scale).round().clamp(0.0, LEVELS) as u8
            } else {
                0
            };
            out.push(code);
        }
        Ok(())
    }

    fn recv_transform(&mut self, buf: &[u8], mut dst: MatViewMut<'_>) -> Result<usize> {
        let (min, scale, codes) = Self::decode(buf, dst.len())?;
        for (d, &c) in dst.iter_mut().zip(codes) {
            *d = min + Scalar::from(c) * scale;
        }
        Ok(Self::encoded_len(codes.len()))
    }

    fn recv_apply_transform(
        &mut self,
        buf: &[u8],
        mut dst: MatViewMut<'_>,
        is_local: bool,
    ) -> Result<usize> {
        if is_local {
            return apply_raw(buf, dst);
        }
        let (min, scale, codes) = Self::decode(buf, dst.len())?;
        for (d, &c) in dst.iter_mut().zip(codes) {
            *d += min + Scalar::from(c) * scale;
        }
        Ok(Self::encoded_len(codes.len()))
    }
}
