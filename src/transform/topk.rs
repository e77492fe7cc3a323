//! TopK sparsification: keep the largest-magnitude fraction of a region.

use super::{AllreduceTransform, apply_raw};
use crate::error::{CommError, Result};
use crate::matrix::{MatView, MatViewMut};
use crate::types::{Phase, SCALAR_BYTES, Scalar};

/// Sparse encoding of the `ceil(ratio * n)` largest-magnitude elements.
///
/// Wire format: `[k: u32 LE][indices: k * u32 LE][values: k * Scalar]`.
/// Indices are column-major positions inside the region, ascending.
/// Elements that are not sent decode as zero, so the encoding is exact
/// whenever `k` covers every nonzero element.
#[derive(Debug, Clone, Copy)]
pub struct TopKTransform {
    ratio: f64,
}

impl TopKTransform {
    /// `ratio` is the fraction of elements kept, in `(0.0, 1.0]`.
    pub fn new(ratio: f64) -> Result<Self> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(CommError::config(format!(
                "topk ratio must be in (0.0, 1.0], got {ratio}"
            )));
        }
        Ok(Self { ratio })
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Number of elements kept out of `n`.
    pub fn k_for(&self, n: usize) -> usize {
        ((n as f64 * self.ratio).ceil() as usize).clamp(n.min(1), n)
    }

    /// Wire size for `k` kept elements.
    pub fn encoded_len(k: usize) -> usize {
        4 + k * (4 + SCALAR_BYTES)
    }
}

/// Parsed sparse message: pairs of (position, value), positions ascending.
struct Sparse<'b> {
    indices: &'b [u8],
    values: &'b [u8],
    k: usize,
}

impl<'b> Sparse<'b> {
    fn parse(buf: &'b [u8], len: usize) -> Result<Self> {
        let Some(header) = buf.get(..4) else {
            return Err(CommError::DecodeFailed(format!(
                "topk message has {} bytes, need a 4-byte header",
                buf.len()
            )));
        };
        let k = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if k > len {
            return Err(CommError::DecodeFailed(format!(
                "topk message carries {k} elements for a region of {len}"
            )));
        }
        let needed = TopKTransform::encoded_len(k);
        if buf.len() < needed {
            return Err(CommError::DecodeFailed(format!(
                "topk message has {} bytes, need {needed} for k={k}",
                buf.len()
            )));
        }
        let idx_end = 4 + 4 * k;
        Ok(Self {
            indices: &buf[4..idx_end],
            values: &buf[idx_end..needed],
            k,
        })
    }

    fn consumed(&self) -> usize {
        TopKTransform::encoded_len(self.k)
    }

    fn entries(&self) -> impl Iterator<Item = (usize, Scalar)> + 'b {
        let indices = self.indices;
        let values = self.values;
        indices
            .chunks_exact(4)
            .zip(values.chunks_exact(SCALAR_BYTES))
            .map(|(i, v)| {
                (
                    u32::from_le_bytes([i[0], i[1], i[2], i[3]]) as usize,
                    bytemuck::pod_read_unaligned::<Scalar>(v),
                )
            })
    }

    /// Walk `dst` in column-major order, calling `f` with each element and
    /// the value sent for it (zero if none).
    fn merge_into(
        &self,
        dst: &mut MatViewMut<'_>,
        mut f: impl FnMut(&mut Scalar, Scalar),
    ) -> Result<()> {
        let mut entries = self.entries().peekable();
        for (pos, d) in dst.iter_mut().enumerate() {
            let mut sent = 0.0;
            while let Some(&(i, v)) = entries.peek() {
                if i != pos {
                    break;
                }
                sent += v;
                entries.next();
            }
            f(d, sent);
        }
        match entries.next() {
            Some((i, _)) => Err(CommError::DecodeFailed(format!(
                "topk index {i} out of order or beyond region of {}",
                dst.len()
            ))),
            None => Ok(()),
        }
    }
}

impl AllreduceTransform for TopKTransform {
    fn send_transform(
        &mut self,
        view: MatView<'_>,
        _phase: Phase,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let values: Vec<Scalar> = view.iter().collect();
        let k = self.k_for(values.len());

        let mut order: Vec<u32> = (0..values.len() as u32).collect();
        if k < values.len() {
            // Descending magnitude; total_cmp keeps NaN ordered.
            order.select_nth_unstable_by(k, |&a, &b| {
                values[b as usize].abs().total_cmp(&values[a as usize].abs())
            });
            order.truncate(k);
        }
        // Ascending positions for a deterministic wire order.
        order.sort_unstable();

        out.reserve(Self::encoded_len(k));
        out.extend_from_slice(&(k as u32).to_le_bytes());
        for &i in &order {
            out.extend_from_slice(&i.to_le_bytes());
        }
        for &i in &order {
            out.extend_from_slice(bytemuck::bytes_of(&values[i as usize]));
        }
        Ok(())
    }

    fn recv_transform(&mut self, buf: &[u8], mut dst: MatViewMut<'_>) -> Result<usize> {
        let sparse = Sparse::parse(buf, dst.len())?;
        sparse.merge_into(&mut dst, |d, v| *d = v)?;
        Ok(sparse.consumed())
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
        let sparse = Sparse::parse(buf, dst.len())?;
        sparse.merge_into(&mut dst, |d, v| *d += v)?;
        Ok(sparse.consumed())
    }
}
