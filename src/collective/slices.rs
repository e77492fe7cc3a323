use std::ops::Range;

/// Partition of a matrix's columns into one contiguous slice per process.
///
/// Every slice gets `cols / nprocs` columns and the first `cols % nprocs`
/// slices get one extra.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceLayout {
    lengths: Vec<usize>,
    /// Prefix sums of `lengths`.
    ends: Vec<usize>,
}

impl SliceLayout {
    pub fn new(cols: usize, nprocs: usize) -> Self {
        if nprocs == 0 {
            return Self {
                lengths: Vec::new(),
                ends: Vec::new(),
            };
        }
        let per = cols / nprocs;
        let rem = cols % nprocs;
        let lengths: Vec<usize> = (0..nprocs).map(|i| per + usize::from(i < rem)).collect();
        let ends = lengths
            .iter()
            .scan(0, |acc, &len| {
                *acc += len;
                Some(*acc)
            })
            .collect();
        Self { lengths, ends }
    }

    pub fn nprocs(&self) -> usize {
        self.lengths.len()
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn ends(&self) -> &[usize] {
        &self.ends
    }

    /// Number of columns covered by all slices.
    pub fn total(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    pub fn len(&self, slice: usize) -> usize {
        self.lengths[slice]
    }

    pub fn start(&self, slice: usize) -> usize {
        self.ends[slice] - self.lengths[slice]
    }

    /// Column range of one slice.
    pub fn range(&self, slice: usize) -> Range<usize> {
        self.start(slice)..self.ends[slice]
    }

    /// Column range covering slices `first..last` (exclusive).
    pub fn span(&self, first: usize, last: usize) -> Range<usize> {
        if first >= last {
            let at = if first < self.nprocs() {
                self.start(first)
            } else {
                self.total()
            };
            return at..at;
        }
        self.start(first)..self.ends[last - 1]
    }
}
