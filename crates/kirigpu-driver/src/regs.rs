//! Bounds-checked typed access to the control-register window.

use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use kirigpu_protocol::REGISTER_SPAN_BYTES;

use crate::error::RegisterError;
use crate::hal::MmioSpace;

/// Typed view over one device's mapped control registers.
///
/// Construction validates the mapped length against the register map span,
/// so accesses through the fixed offsets in
/// [`kirigpu_protocol::mmio`] cannot go out of range afterwards; raw
/// offsets from callers are still checked per access.
pub struct RegisterFile {
    mmio: Arc<dyn MmioSpace>,
    mapped: u64,
}

impl std::fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterFile")
            .field("mapped", &self.mapped)
            .finish_non_exhaustive()
    }
}

impl RegisterFile {
    pub fn new(mmio: Arc<dyn MmioSpace>) -> Result<Self, RegisterError> {
        let mapped = mmio.len();
        if mapped < REGISTER_SPAN_BYTES {
            return Err(RegisterError::RegionTooSmall {
                mapped,
                required: REGISTER_SPAN_BYTES,
            });
        }
        Ok(Self { mmio, mapped })
    }

    fn check(&self, offset: u64) -> Result<(), RegisterError> {
        if offset % 4 != 0 {
            return Err(RegisterError::Misaligned { offset });
        }
        if offset.checked_add(4).map_or(true, |end| end > self.mapped) {
            return Err(RegisterError::InvalidOffset {
                offset,
                mapped: self.mapped,
            });
        }
        Ok(())
    }

    /// Read a register. A read barrier is issued before the load so the
    /// value cannot be satisfied by a reordered earlier read.
    pub fn read(&self, offset: u64) -> Result<u32, RegisterError> {
        self.check(offset)?;
        fence(Ordering::Acquire);
        Ok(self.mmio.read_u32(offset))
    }

    /// Write a register. Every write is an immediate hardware state change;
    /// nothing is buffered.
    pub fn write(&self, offset: u64, value: u32) -> Result<(), RegisterError> {
        self.check(offset)?;
        self.mmio.write_u32(offset, value);
        Ok(())
    }

    /// Write an IEEE-754 float's raw bit pattern. No numeric conversion.
    pub fn write_f32(&self, offset: u64, value: f32) -> Result<(), RegisterError> {
        self.write(offset, value.to_bits())
    }

    pub fn mapped_len(&self) -> u64 {
        self.mapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct VecMmio {
        words: Mutex<Vec<u32>>,
    }

    impl VecMmio {
        fn new(len_bytes: u64) -> Arc<Self> {
            Arc::new(Self {
                words: Mutex::new(vec![0; (len_bytes / 4) as usize]),
            })
        }
    }

    impl MmioSpace for VecMmio {
        fn len(&self) -> u64 {
            (self.words.lock().unwrap().len() * 4) as u64
        }

        fn read_u32(&self, offset: u64) -> u32 {
            self.words.lock().unwrap()[(offset / 4) as usize]
        }

        fn write_u32(&self, offset: u64, value: u32) {
            self.words.lock().unwrap()[(offset / 4) as usize] = value;
        }
    }

    #[test]
    fn construction_rejects_short_regions() {
        let err = RegisterFile::new(VecMmio::new(0x1000)).unwrap_err();
        assert!(matches!(err, RegisterError::RegionTooSmall { .. }));
    }

    #[test]
    fn read_write_round_trip() {
        let regs = RegisterFile::new(VecMmio::new(REGISTER_SPAN_BYTES)).unwrap();
        regs.write(0x1000, 0xDEAD_BEEF).unwrap();
        assert_eq!(regs.read(0x1000).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn float_writes_store_raw_bits() {
        let regs = RegisterFile::new(VecMmio::new(REGISTER_SPAN_BYTES)).unwrap();
        regs.write_f32(0x5100, 0.5).unwrap();
        assert_eq!(regs.read(0x5100).unwrap(), 0.5f32.to_bits());
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let regs = RegisterFile::new(VecMmio::new(REGISTER_SPAN_BYTES)).unwrap();
        let err = regs.read(REGISTER_SPAN_BYTES).unwrap_err();
        assert!(matches!(err, RegisterError::InvalidOffset { .. }));

        let err = regs.read(u64::MAX - 3).unwrap_err();
        assert!(matches!(err, RegisterError::InvalidOffset { .. }));
    }

    #[test]
    fn misaligned_offset_is_rejected() {
        let regs = RegisterFile::new(VecMmio::new(REGISTER_SPAN_BYTES)).unwrap();
        let err = regs.write(0x1001, 0).unwrap_err();
        assert_eq!(err, RegisterError::Misaligned { offset: 0x1001 });
    }
}
