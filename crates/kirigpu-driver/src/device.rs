//! Caller-facing driver facade.

use std::sync::{Arc, Mutex, PoisonError};

use kirigpu_protocol::{mmio, InfoStatus, IRQ_DISABLE_ALL, IRQ_ENABLE_DMA};

use crate::error::{DriverError, Result};
use crate::hal::{CallerHandle, CallerMapper, DmaAllocator, InterruptLine, IrqRegistration, MmioSpace};
use crate::irq::CompletionHandler;
use crate::pool::{TransferPool, BUFFER_CAPACITY_BYTES};
use crate::regs::RegisterFile;
use crate::ring::{DeviceContext, RingIndices, TransferStats, RING_SLOTS};
use crate::session::{DisplayMode, SessionController};

/// Platform collaborators handed to the driver at open time.
pub struct HardwareEnv {
    pub mmio: Arc<dyn MmioSpace>,
    pub dma: Arc<dyn DmaAllocator>,
    pub mapper: Arc<dyn CallerMapper>,
    pub irq_line: InterruptLine,
}

/// One opened KiriGPU device.
///
/// All operations take `&self`; submissions from multiple threads and the
/// interrupt domain are serialized on the device lock inside
/// [`DeviceContext`].
pub struct KiriGpuDriver {
    ctx: Arc<DeviceContext>,
    session: SessionController,
    dma: Arc<dyn DmaAllocator>,
    mapper: Arc<dyn CallerMapper>,
    irq_line: InterruptLine,
    registration: Mutex<Option<IrqRegistration>>,
}

impl KiriGpuDriver {
    /// Validate the mapped register window and build the device context.
    pub fn open(env: HardwareEnv) -> Result<Self> {
        let regs = RegisterFile::new(env.mmio)?;
        let vram_mib = regs.read(mmio::DEVICE_VRAM)?;
        let fifo_words = regs.read(mmio::DEVICE_FIFO_SIZE)?;
        let ctx = Arc::new(DeviceContext::new(regs));
        tracing::info!(vram_mib, fifo_words, "kirigpu device opened");
        Ok(Self {
            session: SessionController::new(Arc::clone(&ctx)),
            ctx,
            dma: env.dma,
            mapper: env.mapper,
            irq_line: env.irq_line,
            registration: Mutex::new(None),
        })
    }

    /// Enable the graphics session with `mode`, or disable it with `None`.
    pub fn set_mode(&self, mode: Option<&DisplayMode>) -> Result<()> {
        match mode {
            Some(mode) => self.session.enable_graphics(mode)?,
            None => self.session.disable_graphics()?,
        }
        Ok(())
    }

    /// Block until the device's command FIFO is empty.
    pub fn sync(&self) -> Result<()> {
        self.session.sync()?;
        Ok(())
    }

    /// Kick queued raster commands; returns immediately.
    pub fn flush(&self) -> Result<()> {
        self.session.flush()?;
        Ok(())
    }

    /// Allocate and map the transfer-buffer pool and arm completion
    /// interrupts. Returns the caller handle of the first buffer to fill.
    pub fn bind_transfer_buffers(&self) -> Result<CallerHandle> {
        let first = {
            let mut st = self.ctx.lock_state();
            if st.pool.is_some() {
                return Err(DriverError::AlreadyBound);
            }
            let mut pool =
                TransferPool::allocate(&*self.dma, RING_SLOTS, BUFFER_CAPACITY_BYTES)?;
            if let Err(err) = pool.map_to_caller(&*self.mapper) {
                pool.free(&*self.dma);
                return Err(err.into());
            }
            let first = pool.handle(0);
            st.ring = RingIndices::default();
            st.interrupt_pending = false;
            st.pool = Some(pool);
            first
        };

        // Arm interrupts only once the pool is in place: the handler
        // observes a fully-bound device or nothing. Conditions latched
        // before this point are stale and dropped wholesale.
        let handler = Arc::new(CompletionHandler::new(Arc::clone(&self.ctx)));
        let registration = self.irq_line.register(handler);
        *self.lock_registration() = Some(registration);

        self.ctx.regs().write(mmio::INFO_STATUS, InfoStatus::ACK_STALE)?;
        self.ctx.regs().write(mmio::CONFIG_INTERRUPT, IRQ_ENABLE_DMA)?;
        tracing::info!(buffers = RING_SLOTS, "transfer buffers bound");
        Ok(first)
    }

    /// Submit the payload written into the buffer at `fill` and return the
    /// handle of the next buffer to fill.
    ///
    /// Blocks while the ring is full, both before the submission (waiting
    /// for ring space) and before returning the handle: when the
    /// submission itself fills the ring, the slot at `fill` is still in
    /// flight to hardware, and the handle is withheld until a completion
    /// frees it. A blocked call interrupted through
    /// [`KiriGpuDriver::signal_interrupt`] or [`KiriGpuDriver::release`]
    /// returns [`DriverError::Interrupted`].
    pub fn start_transfer(&self, byte_count: u32) -> Result<CallerHandle> {
        if byte_count > BUFFER_CAPACITY_BYTES {
            return Err(DriverError::PayloadTooLarge {
                len: byte_count,
                capacity: BUFFER_CAPACITY_BYTES,
            });
        }
        self.ctx.submit(byte_count)?;
        self.ctx.next_fill_handle()
    }

    /// Tear down the transfer path: interrupt any blocked submitter, mask
    /// and deregister the completion interrupt, then free the pool. The
    /// ordering guarantees the handler cannot run against freed buffers.
    pub fn unbind_transfer_buffers(&self) -> Result<()> {
        if self.ctx.lock_state().pool.is_none() {
            return Err(DriverError::NotBound);
        }
        self.ctx.signal_interrupt();

        let stats = self.ctx.transfer_stats();
        let status = self.ctx.regs().read(mmio::INFO_STATUS)?;
        tracing::info!(
            completed = stats.completed,
            launched = stats.launched,
            status = format_args!("{status:#x}"),
            "transfer path closing"
        );

        self.ctx.regs().write(mmio::CONFIG_INTERRUPT, IRQ_DISABLE_ALL)?;
        if let Some(registration) = self.lock_registration().take() {
            registration.deregister();
        }

        let pool = self.ctx.lock_state().pool.take();
        if let Some(pool) = pool {
            pool.free(&*self.dma);
        }
        self.ctx.clear_interrupt();
        Ok(())
    }

    /// Release the device: tear down the transfer path if bound, then
    /// disable the graphics session if enabled.
    pub fn release(&self) -> Result<()> {
        match self.unbind_transfer_buffers() {
            Ok(()) | Err(DriverError::NotBound) => {}
            Err(err) => return Err(err),
        }
        if self.ctx.graphics_on() {
            self.session.disable_graphics()?;
        }
        Ok(())
    }

    /// Interrupt any submit currently blocked on a full ring.
    pub fn signal_interrupt(&self) {
        self.ctx.signal_interrupt();
    }

    pub fn ring_state(&self) -> RingIndices {
        self.ctx.ring_state()
    }

    pub fn transfer_stats(&self) -> TransferStats {
        self.ctx.transfer_stats()
    }

    pub fn vram_size_mib(&self) -> Result<u32> {
        Ok(self.ctx.regs().read(mmio::DEVICE_VRAM)?)
    }

    pub fn fifo_size_words(&self) -> Result<u32> {
        Ok(self.ctx.regs().read(mmio::DEVICE_FIFO_SIZE)?)
    }

    /// Map the control-register window into the caller's space
    /// (privileged).
    pub fn map_control(&self) -> Result<CallerHandle> {
        Ok(self.mapper.map_control()?)
    }

    /// Map the device RAM window into the caller's space (privileged).
    pub fn map_vram(&self) -> Result<CallerHandle> {
        Ok(self.mapper.map_vram()?)
    }

    fn lock_registration(&self) -> std::sync::MutexGuard<'_, Option<IrqRegistration>> {
        self.registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for KiriGpuDriver {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(%err, "best-effort release on drop failed");
        }
    }
}
