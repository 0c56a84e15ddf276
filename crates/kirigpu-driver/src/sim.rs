//! Software model of the KiriGPU device for tests and bring-up.
//!
//! The model implements every hardware seam the driver core programs
//! through, keeps an ordered register write log for scenario assertions,
//! and lets tests drive the interrupt line as the device would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kirigpu_protocol::{mmio, InfoStatus, CONTROL_REGION_BYTES};

use crate::device::HardwareEnv;
use crate::hal::{
    AllocError, BusMemory, CallerHandle, CallerMapper, DmaAllocator, DmaRegion, InterruptLine,
    IrqDecision, MmioSpace,
};

/// First bus address handed out for coherent allocations.
const DMA_BASE: u32 = 0x1000_0000;

/// Bus-visible RAM backing coherent allocations.
const BUS_RAM_BYTES: u32 = 16 * 1024 * 1024;

const CONTROL_HANDLE: CallerHandle = CallerHandle(0xC000_0000);
const VRAM_HANDLE: CallerHandle = CallerHandle(0xD000_0000);

/// One `BUFFER_ADDRESS`/`BUFFER_CONFIG` pair latched by the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StartedTransfer {
    pub bus_addr: u32,
    pub byte_count: u32,
}

struct SimState {
    regs: Vec<u32>,
    write_log: Vec<(u64, u32)>,
    read_log: Vec<u64>,
    started: Vec<StartedTransfer>,
    fifo_depth: u32,
    latched_addr: u32,
    bus_ram: Vec<u8>,
    next_bus_addr: u32,
    live_regions: u32,
    dma_limit: Option<u32>,
}

/// The simulated device.
pub struct SimKiriGpu {
    state: Mutex<SimState>,
    privileged: AtomicBool,
    line: InterruptLine,
}

impl SimKiriGpu {
    pub fn new() -> Arc<Self> {
        let mut regs = vec![0u32; (CONTROL_REGION_BYTES / 4) as usize];
        regs[(mmio::DEVICE_VRAM / 4) as usize] = 64;
        regs[(mmio::DEVICE_FIFO_SIZE / 4) as usize] = 256;
        Arc::new(Self {
            state: Mutex::new(SimState {
                regs,
                write_log: Vec::new(),
                read_log: Vec::new(),
                started: Vec::new(),
                fifo_depth: 0,
                latched_addr: 0,
                bus_ram: vec![0; BUS_RAM_BYTES as usize],
                next_bus_addr: DMA_BASE,
                live_regions: 0,
                dma_limit: None,
            }),
            privileged: AtomicBool::new(true),
            line: InterruptLine::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cap the number of live coherent regions; further allocations fail.
    pub fn set_dma_limit(&self, limit: Option<u32>) {
        self.lock().dma_limit = limit;
    }

    pub fn set_privileged(&self, privileged: bool) {
        self.privileged.store(privileged, Ordering::Relaxed);
    }

    pub fn irq_line(&self) -> InterruptLine {
        self.line.clone()
    }

    /// Collaborator bundle for opening a driver against this model.
    pub fn hardware_env(self: &Arc<Self>) -> HardwareEnv {
        HardwareEnv {
            mmio: Arc::clone(self) as Arc<dyn MmioSpace>,
            dma: Arc::clone(self) as Arc<dyn DmaAllocator>,
            mapper: Arc::clone(self) as Arc<dyn CallerMapper>,
            irq_line: self.line.clone(),
        }
    }

    /// Drain the ordered register write log.
    pub fn take_write_log(&self) -> Vec<(u64, u32)> {
        std::mem::take(&mut self.lock().write_log)
    }

    /// Drain the ordered register read log (offsets only).
    pub fn take_read_log(&self) -> Vec<u64> {
        std::mem::take(&mut self.lock().read_log)
    }

    pub fn started_transfers(&self) -> Vec<StartedTransfer> {
        self.lock().started.clone()
    }

    pub fn status(&self) -> InfoStatus {
        let raw = self.lock().regs[(mmio::INFO_STATUS / 4) as usize];
        InfoStatus::from_bits_truncate(raw)
    }

    pub fn fifo_depth(&self) -> u32 {
        self.lock().fifo_depth
    }

    pub fn set_fifo_depth(&self, depth: u32) {
        self.lock().fifo_depth = depth;
    }

    /// Latch a DMA completion and raise the interrupt line.
    pub fn complete_transfer(&self) -> IrqDecision {
        {
            let mut st = self.lock();
            let slot = (mmio::INFO_STATUS / 4) as usize;
            st.regs[slot] |= InfoStatus::DMA_COMPLETE.bits();
        }
        self.line.raise()
    }

    /// Raise the line without latching any condition, as another device on
    /// the shared line would.
    pub fn raise_spurious(&self) -> IrqDecision {
        self.line.raise()
    }
}

impl MmioSpace for SimKiriGpu {
    fn len(&self) -> u64 {
        CONTROL_REGION_BYTES
    }

    fn read_u32(&self, offset: u64) -> u32 {
        let mut st = self.lock();
        st.read_log.push(offset);
        if offset == mmio::FIFO_DEPTH {
            // Self-draining model: report the depth, then consume one
            // entry, so idle polls always terminate while still observing
            // every intermediate depth.
            let depth = st.fifo_depth;
            st.fifo_depth = st.fifo_depth.saturating_sub(1);
            return depth;
        }
        st.regs[(offset / 4) as usize]
    }

    fn write_u32(&self, offset: u64, value: u32) {
        let mut st = self.lock();
        st.write_log.push((offset, value));
        match offset {
            mmio::INFO_STATUS => {
                // Write-one-to-clear.
                let slot = (offset / 4) as usize;
                st.regs[slot] &= !value;
            }
            mmio::FIFO_DEPTH => {}
            mmio::BUFFER_ADDRESS => {
                st.latched_addr = value;
                st.regs[(offset / 4) as usize] = value;
                st.fifo_depth += 1;
            }
            mmio::BUFFER_CONFIG => {
                st.regs[(offset / 4) as usize] = value;
                st.fifo_depth += 1;
                let bus_addr = st.latched_addr;
                st.started.push(StartedTransfer {
                    bus_addr,
                    byte_count: value,
                });
            }
            _ => {
                st.regs[(offset / 4) as usize] = value;
                st.fifo_depth += 1;
            }
        }
    }
}

impl BusMemory for SimKiriGpu {
    fn read_bus(&self, bus_addr: u64, buf: &mut [u8]) {
        let st = self.lock();
        let start = (bus_addr - u64::from(DMA_BASE)) as usize;
        buf.copy_from_slice(&st.bus_ram[start..start + buf.len()]);
    }

    fn write_bus(&self, bus_addr: u64, buf: &[u8]) {
        let mut st = self.lock();
        let start = (bus_addr - u64::from(DMA_BASE)) as usize;
        st.bus_ram[start..start + buf.len()].copy_from_slice(buf);
    }
}

impl DmaAllocator for SimKiriGpu {
    fn alloc_coherent(&self, len: u32) -> Result<DmaRegion, AllocError> {
        let mut st = self.lock();
        if st.dma_limit.is_some_and(|limit| st.live_regions >= limit) {
            return Err(AllocError { requested: len });
        }
        let bus_addr = st.next_bus_addr;
        st.next_bus_addr += len.next_multiple_of(4096);
        st.live_regions += 1;
        Ok(DmaRegion { bus_addr, len })
    }

    fn free_coherent(&self, _region: DmaRegion) {
        let mut st = self.lock();
        st.live_regions = st.live_regions.saturating_sub(1);
    }
}

impl CallerMapper for SimKiriGpu {
    fn map_dma(&self, region: &DmaRegion) -> Result<CallerHandle, crate::hal::MapError> {
        Ok(CallerHandle(u64::from(region.bus_addr)))
    }

    fn map_control(&self) -> Result<CallerHandle, crate::hal::MapError> {
        if !self.privileged.load(Ordering::Relaxed) {
            return Err(crate::hal::MapError::PermissionDenied("control window"));
        }
        Ok(CONTROL_HANDLE)
    }

    fn map_vram(&self) -> Result<CallerHandle, crate::hal::MapError> {
        if !self.privileged.load(Ordering::Relaxed) {
            return Err(crate::hal::MapError::PermissionDenied("vram window"));
        }
        Ok(VRAM_HANDLE)
    }
}
