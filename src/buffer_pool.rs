use crate::error::{CommError, Result};
use std::collections::HashMap;

/// Size-keyed cache of scratch byte buffers used by the allreduce algorithms.
///
/// A buffer is identified by `(size, slot)`. The same pair always yields the
/// same storage for the life of the pool, and storage is zeroed only when it
/// is first allocated. Slots for a size are created in order: asking for
/// slot `k` requires slots `0..k` to exist already.
///
/// Nothing is ever evicted. The number of distinct sizes is driven by matrix
/// shapes, not by the number of calls.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: HashMap<usize, Vec<Box<[u8]>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the scratch buffer `(size, slot)`, allocating it if `slot` is the
    /// next one for this size.
    pub fn acquire(&mut self, size: usize, slot: usize) -> Result<&mut [u8]> {
        let slots = self.slots_for(size, slot)?;
        Ok(&mut slots[slot])
    }

    /// Get slots 0 and 1 of `size` at once, for double buffering.
    pub fn acquire_pair(&mut self, size: usize) -> Result<(&mut [u8], &mut [u8])> {
        // Slot 1 may only be created once slot 0 exists.
        self.slots_for(size, 0)?;
        let slots = self.slots_for(size, 1)?;
        let (first, rest) = slots.split_at_mut(1);
        Ok((&mut first[0], &mut rest[0]))
    }

    /// Number of slots that exist for `size`.
    pub fn slot_count(&self, size: usize) -> usize {
        self.buffers.get(&size).map_or(0, Vec::len)
    }

    /// Total bytes held across every size and slot.
    pub fn allocated_bytes(&self) -> usize {
        self.buffers
            .iter()
            .map(|(size, slots)| size * slots.len())
            .sum()
    }

    fn slots_for(&mut self, size: usize, slot: usize) -> Result<&mut Vec<Box<[u8]>>> {
        let slots = self.buffers.entry(size).or_default();
        if slot > slots.len() {
            return Err(CommError::BufferSlotOutOfOrder {
                size,
                slot,
                available: slots.len(),
            });
        }
        if slot == slots.len() {
            slots.push(vec![0u8; size].into_boxed_slice());
        }
        Ok(slots)
    }
}
