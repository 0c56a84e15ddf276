//! KiriGPU driver core.
//!
//! Implements the host-side driver for the KiriGPU device: a bounded
//! circular ring of coherent DMA transfer buffers with blocking
//! backpressure, an interrupt-driven completion path suitable for a shared
//! line, bounds-checked control-register access, and the mode-set sequence
//! for the scanout/encoder path.
//!
//! Platform concerns (bus discovery, real address-space mapping, interrupt
//! wiring) live behind the seam traits in [`hal`]; [`sim`] provides a
//! software device model implementing all of them for tests.
#![forbid(unsafe_code)]

pub mod device;
pub mod error;
pub mod hal;
pub mod irq;
pub mod pool;
pub mod regs;
pub mod ring;
pub mod session;
pub mod sim;

pub use device::{HardwareEnv, KiriGpuDriver};
pub use error::{DriverError, RegisterError, Result};
pub use hal::{
    AllocError, BusMemory, CallerHandle, CallerMapper, DmaAllocator, DmaRegion, InterruptLine,
    IrqDecision, IrqHandler, IrqRegistration, MapError, MmioSpace,
};
pub use irq::CompletionHandler;
pub use pool::{TransferBuffer, TransferPool, BUFFER_CAPACITY_BYTES};
pub use regs::RegisterFile;
pub use ring::{DeviceContext, RingIndices, RingOccupancy, TransferStats, RING_SLOTS};
pub use session::{DisplayMode, SessionController};
pub use sim::{SimKiriGpu, StartedTransfer};
