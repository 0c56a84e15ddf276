//! The fixed pool of coherent transfer buffers backing the ring.

use crate::hal::{AllocError, CallerHandle, CallerMapper, DmaAllocator, DmaRegion, MapError};

/// Capacity of each transfer buffer in bytes.
pub const BUFFER_CAPACITY_BYTES: u32 = 124 * 1024;

/// One of the pool's fixed transport units.
///
/// Exclusively owned by the producer while being filled, then by the
/// device while in flight; ownership returns to the producer implicitly by
/// slot reuse once the matching completion has drained the slot.
#[derive(Debug)]
pub struct TransferBuffer {
    slot: usize,
    region: DmaRegion,
    pending_bytes: u32,
}

impl TransferBuffer {
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Hardware-visible identity; stable for the pool's lifetime.
    pub fn bus_addr(&self) -> u32 {
        self.region.bus_addr
    }

    pub fn capacity(&self) -> u32 {
        self.region.len
    }

    /// Valid payload length for the pending transfer.
    pub fn pending_bytes(&self) -> u32 {
        self.pending_bytes
    }

    pub fn set_pending_bytes(&mut self, bytes: u32) {
        debug_assert!(bytes <= self.region.len);
        self.pending_bytes = bytes;
    }
}

/// Batch of N coherent buffers, allocated at bind time and freed as a
/// batch at unbind. Freeing must happen only after the completion handler
/// has been deregistered; `KiriGpuDriver` enforces that order.
#[derive(Debug)]
pub struct TransferPool {
    buffers: Vec<TransferBuffer>,
    handles: Vec<CallerHandle>,
}

impl TransferPool {
    /// Allocate `n` coherent regions of `bytes_per_buffer` each. On a
    /// partial failure every region already obtained is released before
    /// the error is returned.
    pub fn allocate(
        allocator: &dyn DmaAllocator,
        n: usize,
        bytes_per_buffer: u32,
    ) -> Result<Self, AllocError> {
        let mut buffers = Vec::with_capacity(n);
        for slot in 0..n {
            match allocator.alloc_coherent(bytes_per_buffer) {
                Ok(region) => buffers.push(TransferBuffer {
                    slot,
                    region,
                    pending_bytes: 0,
                }),
                Err(err) => {
                    for buf in buffers {
                        allocator.free_coherent(buf.region);
                    }
                    return Err(err);
                }
            }
        }
        Ok(Self {
            buffers,
            handles: Vec::new(),
        })
    }

    /// Map every buffer into the caller's address space, recording the
    /// handle the caller will use to name each slot.
    pub fn map_to_caller(&mut self, mapper: &dyn CallerMapper) -> Result<(), MapError> {
        let mut handles = Vec::with_capacity(self.buffers.len());
        for buf in &self.buffers {
            handles.push(mapper.map_dma(&buf.region)?);
        }
        self.handles = handles;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffer(&self, slot: usize) -> &TransferBuffer {
        &self.buffers[slot]
    }

    pub fn buffer_mut(&mut self, slot: usize) -> &mut TransferBuffer {
        &mut self.buffers[slot]
    }

    /// Caller handle for a slot. Only valid once [`Self::map_to_caller`]
    /// has succeeded (it always has for a bound pool).
    pub fn handle(&self, slot: usize) -> CallerHandle {
        self.handles[slot]
    }

    /// Release all regions. Consumes the pool so a double free cannot
    /// compile.
    pub fn free(self, allocator: &dyn DmaAllocator) {
        for buf in self.buffers {
            allocator.free_coherent(buf.region);
        }
    }
}
