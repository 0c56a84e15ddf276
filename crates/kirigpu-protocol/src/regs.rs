//! KiriGPU MMIO register map.
//!
//! Offsets are a fixed hardware contract and must never be renumbered. All
//! registers are 32 bits wide and accessed at 4-byte-aligned offsets within
//! the control BAR.

use bitflags::bitflags;

/// Byte length of the control-register BAR.
pub const CONTROL_REGION_BYTES: u64 = 0x1_0000;

/// One past the highest mapped register; the minimum MMIO length the driver
/// accepts at register-file construction time.
pub const REGISTER_SPAN_BYTES: u64 = mmio::ENCODER_FRAME + 4;

/// Control-register offsets within the MMIO BAR.
pub mod mmio {
    /// Installed device RAM, in MiB (read-only).
    pub const DEVICE_VRAM: u64 = 0x0020;
    /// Command FIFO capacity, in entries (read-only).
    pub const DEVICE_FIFO_SIZE: u64 = 0x002c;

    /// Writing any value resets the device.
    pub const CONFIG_REBOOT: u64 = 0x1000;
    /// Latches the frame/encoder geometry programmed so far.
    pub const CONFIG_MODESET: u64 = 0x1008;
    /// Interrupt delivery enable mask (see [`super::InfoStatus`]).
    pub const CONFIG_INTERRUPT: u64 = 0x100c;
    /// Acceleration subsystem control; write [`super::ACCEL_ENABLE`].
    pub const CONFIG_ACCEL: u64 = 0x1010;

    /// Bus address of the next DMA command buffer.
    pub const BUFFER_ADDRESS: u64 = 0x2000;
    /// Byte count of the pending transfer; writing starts the DMA.
    pub const BUFFER_CONFIG: u64 = 0x2008;

    pub const RASTER_PRIM: u64 = 0x3000;
    /// Emits the vertex currently latched in the `VERTEX_*` registers.
    pub const RASTER_EMIT: u64 = 0x3004;
    /// Clears the framebuffer to the `CLEAR_*` color.
    pub const RASTER_CLEAR: u64 = 0x3008;
    /// Commits queued rasterizer commands; returns immediately.
    pub const RASTER_FLUSH: u64 = 0x3ffc;

    /// Current command-queue occupancy; zero means the device is idle.
    pub const FIFO_DEPTH: u64 = 0x4004;
    /// Interrupt status; write-one-to-clear.
    pub const INFO_STATUS: u64 = 0x4008;

    pub const VERTEX_X: u64 = 0x5000;
    pub const VERTEX_Y: u64 = 0x5004;
    pub const VERTEX_Z: u64 = 0x5008;
    pub const VERTEX_W: u64 = 0x500c;
    pub const VERTEX_R: u64 = 0x5010;
    pub const VERTEX_G: u64 = 0x5014;
    pub const VERTEX_B: u64 = 0x5018;
    pub const VERTEX_A: u64 = 0x501c;

    pub const CLEAR_R: u64 = 0x5100;
    pub const CLEAR_G: u64 = 0x5104;
    pub const CLEAR_B: u64 = 0x5108;

    pub const FRAME_WIDTH: u64 = 0x8000;
    pub const FRAME_HEIGHT: u64 = 0x8004;
    pub const FRAME_PITCH: u64 = 0x8008;
    pub const FRAME_PIXEL: u64 = 0x800c;
    pub const FRAME_START: u64 = 0x8010;

    pub const ENCODER_WIDTH: u64 = 0x9000;
    pub const ENCODER_HEIGHT: u64 = 0x9004;
    pub const ENCODER_OFF_X: u64 = 0x9008;
    pub const ENCODER_OFF_Y: u64 = 0x900c;
    pub const ENCODER_FRAME: u64 = 0x9010;
}

/// Value written to `CONFIG_ACCEL` to enable the acceleration subsystem.
pub const ACCEL_ENABLE: u32 = 0x4000_0000;

/// `CONFIG_INTERRUPT` value enabling the DMA-completion interrupt.
pub const IRQ_ENABLE_DMA: u32 = InfoStatus::DMA_COMPLETE.bits();

/// `CONFIG_INTERRUPT` value masking all interrupt delivery.
pub const IRQ_DISABLE_ALL: u32 = 0;

/// Default `FRAME_PIXEL` encoding (XRGB, 32bpp).
pub const PIXEL_FORMAT_DEFAULT: u32 = 0xF888;

bitflags! {
    /// `INFO_STATUS` register bits. Bit 1 is the sole basis for claiming a
    /// shared interrupt line.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct InfoStatus: u32 {
        const FIFO_EVENT = 1 << 0;
        const DMA_COMPLETE = 1 << 1;
        const VSYNC = 1 << 2;
        const ERROR = 1 << 3;
    }
}

impl InfoStatus {
    /// Acknowledge-all value for the conditions the driver handles.
    pub const ACK_ALL: u32 = 0xF;

    /// Reset value clearing any condition latched before interrupt
    /// configuration, including bits this driver revision does not know.
    pub const ACK_STALE: u32 = 0xFFFF_FFFF;
}
