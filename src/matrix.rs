//! Column-major matrices and the borrowed views the collectives operate on.
//!
//! A [`Mat`] stores `width` columns of `height` elements, each column starting
//! `ldim` elements after the previous one. When `ldim > height` the columns are
//! not contiguous in memory, so a view's elements cannot always be handed to the
//! transport as one byte slice; [`MatView::as_bytes`] returns `None` in that
//! case and callers pack into a staging buffer instead.

use crate::error::{CommError, Result};
use crate::types::{SCALAR_BYTES, Scalar};
use std::ops::Range;

/// Dense column-major matrix owning its storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Mat {
    height: usize,
    width: usize,
    ldim: usize,
    data: Vec<Scalar>,
}

impl Mat {
    /// Zero-filled `height x width` matrix with tightly packed columns.
    pub fn new(height: usize, width: usize) -> Self {
        let ldim = height.max(1);
        Self {
            height,
            width,
            ldim,
            data: vec![0.0; ldim * width],
        }
    }

    /// Matrix with every element set to `value`.
    pub fn filled(height: usize, width: usize, value: Scalar) -> Self {
        let mut m = Self::new(height, width);
        m.data.fill(value);
        m
    }

    /// Zero-filled matrix whose columns are `ldim` elements apart.
    pub fn with_ldim(height: usize, width: usize, ldim: usize) -> Result<Self> {
        if ldim < height.max(1) {
            return Err(CommError::config(format!(
                "leading dimension {ldim} is smaller than height {height}"
            )));
        }
        Ok(Self {
            height,
            width,
            ldim,
            data: vec![0.0; ldim * width],
        })
    }

    /// Wrap tightly packed column-major data.
    pub fn from_col_major(height: usize, width: usize, data: Vec<Scalar>) -> Result<Self> {
        if data.len() != height * width {
            return Err(CommError::BufferSizeMismatch {
                expected: height * width * SCALAR_BYTES,
                actual: data.len() * SCALAR_BYTES,
            });
        }
        if height == 0 {
            return Ok(Self::new(0, width));
        }
        Ok(Self {
            height,
            width,
            ldim: height,
            data,
        })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Distance in elements between the starts of consecutive columns.
    pub fn ldim(&self) -> usize {
        self.ldim
    }

    /// Underlying storage, including any padding rows between columns.
    pub fn buffer(&self) -> &[Scalar] {
        &self.data
    }

    pub fn buffer_mut(&mut self) -> &mut [Scalar] {
        &mut self.data
    }

    /// Element at `(row, col)`.
    ///
    /// # Panics
    /// If the index is outside the matrix.
    pub fn get(&self, row: usize, col: usize) -> Scalar {
        assert!(row < self.height && col < self.width, "index out of bounds");
        self.data[row + col * self.ldim]
    }

    /// Set the element at `(row, col)`.
    ///
    /// # Panics
    /// If the index is outside the matrix.
    pub fn set(&mut self, row: usize, col: usize, value: Scalar) {
        assert!(row < self.height && col < self.width, "index out of bounds");
        self.data[row + col * self.ldim] = value;
    }

    /// Copy the logical elements out in column-major order.
    pub fn to_col_major(&self) -> Vec<Scalar> {
        let mut out = Vec::with_capacity(self.height * self.width);
        for col in self.view_all().columns() {
            out.extend_from_slice(col);
        }
        out
    }

    /// Read-only view of the whole matrix.
    pub fn view_all(&self) -> MatView<'_> {
        self.view(0..self.height, 0..self.width)
    }

    /// Read-only view of all rows over a column range.
    pub fn view_cols(&self, cols: Range<usize>) -> MatView<'_> {
        self.view(0..self.height, cols)
    }

    /// Read-only view of a row and column range, without copying.
    ///
    /// # Panics
    /// If either range extends past the matrix.
    pub fn view(&self, rows: Range<usize>, cols: Range<usize>) -> MatView<'_> {
        let (span, height, width) = self.span(&rows, &cols);
        MatView {
            height,
            width,
            ldim: self.ldim,
            data: &self.data[span],
        }
    }

    /// Mutable view of the whole matrix.
    pub fn view_all_mut(&mut self) -> MatViewMut<'_> {
        self.view_mut(0..self.height, 0..self.width)
    }

    /// Mutable view of all rows over a column range.
    pub fn view_cols_mut(&mut self, cols: Range<usize>) -> MatViewMut<'_> {
        self.view_mut(0..self.height, cols)
    }

    /// Mutable view of a row and column range, without copying.
    ///
    /// # Panics
    /// If either range extends past the matrix.
    pub fn view_mut(&mut self, rows: Range<usize>, cols: Range<usize>) -> MatViewMut<'_> {
        let (span, height, width) = self.span(&rows, &cols);
        MatViewMut {
            height,
            width,
            ldim: self.ldim,
            data: &mut self.data[span],
        }
    }

    fn span(&self, rows: &Range<usize>, cols: &Range<usize>) -> (Range<usize>, usize, usize) {
        assert!(
            rows.start <= rows.end && rows.end <= self.height,
            "row range {rows:?} out of bounds for height {}",
            self.height
        );
        assert!(
            cols.start <= cols.end && cols.end <= self.width,
            "column range {cols:?} out of bounds for width {}",
            self.width
        );
        let height = rows.end - rows.start;
        let width = cols.end - cols.start;
        let start = (rows.start + cols.start * self.ldim).min(self.data.len());
        let len = if height == 0 || width == 0 {
            0
        } else {
            (width - 1) * self.ldim + height
        };
        (start..start + len, height, width)
    }
}

/// Borrowed read-only window onto a [`Mat`].
#[derive(Debug, Clone, Copy)]
pub struct MatView<'a> {
    height: usize,
    width: usize,
    ldim: usize,
    data: &'a [Scalar],
}

impl<'a> MatView<'a> {
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of logical elements.
    pub fn len(&self) -> usize {
        self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the logical elements in bytes.
    pub fn byte_len(&self) -> usize {
        self.len() * SCALAR_BYTES
    }

    /// True when the logical elements occupy one unbroken memory range.
    pub fn is_contiguous(&self) -> bool {
        self.height == self.ldim || self.width <= 1
    }

    pub fn get(&self, row: usize, col: usize) -> Scalar {
        assert!(row < self.height && col < self.width, "index out of bounds");
        self.data[row + col * self.ldim]
    }

    /// Column slices, left to right.
    pub fn columns(&self) -> impl Iterator<Item = &'a [Scalar]> + 'a {
        let (height, ldim) = (self.height, self.ldim);
        let data: &'a [Scalar] = self.data;
        data.chunks(ldim).take(self.width).map(move |c| &c[..height])
    }

    /// Elements in column-major order.
    pub fn iter(&self) -> impl Iterator<Item = Scalar> + 'a {
        self.columns().flat_map(|c| c.iter().copied())
    }

    /// The elements as native-endian bytes, if they are contiguous.
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        if self.is_contiguous() {
            let data: &'a [Scalar] = self.data;
            Some(bytemuck::cast_slice(&data[..self.len()]))
        } else {
            None
        }
    }

    /// Append the elements as native-endian bytes.
    pub fn extend_bytes(&self, out: &mut Vec<u8>) {
        out.reserve(self.byte_len());
        for col in self.columns() {
            out.extend_from_slice(bytemuck::cast_slice(col));
        }
    }
}

/// Borrowed mutable window onto a [`Mat`].
#[derive(Debug)]
pub struct MatViewMut<'a> {
    height: usize,
    width: usize,
    ldim: usize,
    data: &'a mut [Scalar],
}

impl<'a> MatViewMut<'a> {
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * SCALAR_BYTES
    }

    pub fn is_contiguous(&self) -> bool {
        self.height == self.ldim || self.width <= 1
    }

    /// Reborrow as a read-only view.
    pub fn as_view(&self) -> MatView<'_> {
        MatView {
            height: self.height,
            width: self.width,
            ldim: self.ldim,
            data: &*self.data,
        }
    }

    /// Reborrow for a shorter lifetime.
    pub fn reborrow(&mut self) -> MatViewMut<'_> {
        MatViewMut {
            height: self.height,
            width: self.width,
            ldim: self.ldim,
            data: &mut *self.data,
        }
    }

    pub fn columns_mut(&mut self) -> impl Iterator<Item = &mut [Scalar]> + '_ {
        let height = self.height;
        self.data
            .chunks_mut(self.ldim)
            .take(self.width)
            .map(move |c| &mut c[..height])
    }

    /// Elements in column-major order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Scalar> + '_ {
        self.columns_mut().flat_map(|c| c.iter_mut())
    }

    pub fn fill(&mut self, value: Scalar) {
        self.iter_mut().for_each(|v| *v = value);
    }

    /// The elements as mutable native-endian bytes, if they are contiguous.
    pub fn as_bytes_mut(&mut self) -> Option<&mut [u8]> {
        if self.is_contiguous() {
            let len = self.len();
            Some(bytemuck::cast_slice_mut(&mut self.data[..len]))
        } else {
            None
        }
    }

    /// Overwrite the elements from native-endian bytes. Returns bytes consumed.
    pub fn copy_from_bytes(&mut self, src: &[u8]) -> Result<usize> {
        let needed = self.byte_len();
        if src.len() < needed {
            return Err(CommError::BufferSizeMismatch {
                expected: needed,
                actual: src.len(),
            });
        }
        for (dst, chunk) in self.iter_mut().zip(src.chunks_exact(SCALAR_BYTES)) {
            *dst = bytemuck::pod_read_unaligned(chunk);
        }
        Ok(needed)
    }

    /// Accumulate native-endian bytes into the elements. Returns bytes consumed.
    pub fn add_from_bytes(&mut self, src: &[u8]) -> Result<usize> {
        let needed = self.byte_len();
        if src.len() < needed {
            return Err(CommError::BufferSizeMismatch {
                expected: needed,
                actual: src.len(),
            });
        }
        for (dst, chunk) in self.iter_mut().zip(src.chunks_exact(SCALAR_BYTES)) {
            *dst += bytemuck::pod_read_unaligned::<Scalar>(chunk);
        }
        Ok(needed)
    }
}

/// A matrix whose process-local shard is a [`Mat`].
///
/// Point-to-point transfers move only the local shard, so byte counts come
/// from the local dimensions rather than the global ones.
pub trait LocalMatrix {
    /// Global height.
    fn height(&self) -> usize;
    /// Global width.
    fn width(&self) -> usize;
    fn local(&self) -> &Mat;
    fn local_mut(&mut self) -> &mut Mat;

    fn local_height(&self) -> usize {
        self.local().height()
    }

    fn local_width(&self) -> usize {
        self.local().width()
    }

    fn local_byte_len(&self) -> usize {
        self.local_height() * self.local_width() * SCALAR_BYTES
    }
}

impl LocalMatrix for Mat {
    fn height(&self) -> usize {
        self.height
    }

    fn width(&self) -> usize {
        self.width
    }

    fn local(&self) -> &Mat {
        self
    }

    fn local_mut(&mut self) -> &mut Mat {
        self
    }
}

/// Distributed matrix: global dimensions plus this process's shard.
#[derive(Debug, Clone, PartialEq)]
pub struct DistMat {
    global_height: usize,
    global_width: usize,
    local: Mat,
}

impl DistMat {
    pub fn new(global_height: usize, global_width: usize, local: Mat) -> Result<Self> {
        if local.height() > global_height || local.width() > global_width {
            return Err(CommError::config(format!(
                "local shard {}x{} exceeds global shape {global_height}x{global_width}",
                local.height(),
                local.width()
            )));
        }
        Ok(Self {
            global_height,
            global_width,
            local,
        })
    }

    pub fn into_local(self) -> Mat {
        self.local
    }
}

impl LocalMatrix for DistMat {
    fn height(&self) -> usize {
        self.global_height
    }

    fn width(&self) -> usize {
        self.global_width
    }

    fn local(&self) -> &Mat {
        &self.local
    }

    fn local_mut(&mut self) -> &mut Mat {
        &mut self.local
    }
}

/// Bytes of a view, borrowed when contiguous and packed into `staging` otherwise.
pub(crate) fn view_bytes<'a>(view: MatView<'a>, staging: &'a mut Vec<u8>) -> &'a [u8] {
    match view.as_bytes() {
        Some(bytes) => bytes,
        None => {
            staging.clear();
            view.extend_bytes(staging);
            staging
        }
    }
}
