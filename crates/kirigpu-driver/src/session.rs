//! Mode-set sequencing for the scanout/encoder path.

use std::sync::Arc;

use kirigpu_protocol::{mmio, ACCEL_ENABLE, PIXEL_FORMAT_DEFAULT};

use crate::error::RegisterError;
use crate::ring::DeviceContext;

/// One display configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    /// Scanline pitch in bytes.
    pub pitch: u32,
    pub pixel_format: u32,
    pub clear_color: [f32; 3],
}

impl Default for DisplayMode {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            pitch: 4096,
            pixel_format: PIXEL_FORMAT_DEFAULT,
            clear_color: [0.5, 0.5, 0.4],
        }
    }
}

/// Drives the graphics session on and off.
///
/// The enable sequence programs geometry before flipping the mode-set
/// switch, and synchronizes against the command FIFO at the two points
/// where the device must have consumed everything prior: before the
/// mode-set write and before the clear trigger.
pub struct SessionController {
    ctx: Arc<DeviceContext>,
}

impl SessionController {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self { ctx }
    }

    pub fn enable_graphics(&self, mode: &DisplayMode) -> Result<(), RegisterError> {
        let regs = self.ctx.regs();

        regs.write(mmio::FRAME_WIDTH, mode.width)?;
        regs.write(mmio::FRAME_HEIGHT, mode.height)?;
        regs.write(mmio::FRAME_PITCH, mode.pitch)?;
        regs.write(mmio::FRAME_PIXEL, mode.pixel_format)?;
        regs.write(mmio::FRAME_START, 0)?;

        regs.write(mmio::ENCODER_WIDTH, mode.width)?;
        regs.write(mmio::ENCODER_HEIGHT, mode.height)?;
        regs.write(mmio::ENCODER_OFF_X, 0)?;
        regs.write(mmio::ENCODER_OFF_Y, 0)?;
        regs.write(mmio::ENCODER_FRAME, 0)?;

        regs.write(mmio::CONFIG_ACCEL, ACCEL_ENABLE)?;
        self.sync()?;
        regs.write(mmio::CONFIG_MODESET, 0)?;

        let [r, g, b] = mode.clear_color;
        regs.write_f32(mmio::CLEAR_R, r)?;
        regs.write_f32(mmio::CLEAR_G, g)?;
        regs.write_f32(mmio::CLEAR_B, b)?;
        self.flush()?;
        self.sync()?;
        regs.write(mmio::RASTER_CLEAR, 1)?;

        self.ctx.lock_state().graphics_on = true;
        tracing::info!(
            width = mode.width,
            height = mode.height,
            pitch = mode.pitch,
            "graphics session enabled"
        );
        Ok(())
    }

    pub fn disable_graphics(&self) -> Result<(), RegisterError> {
        self.ctx.lock_state().graphics_on = false;
        self.sync()?;
        self.ctx.regs().write(mmio::CONFIG_REBOOT, 0)?;
        tracing::info!("graphics session disabled");
        Ok(())
    }

    /// Block until the device's command FIFO drains to depth zero. No
    /// timeout: hardware that never drains wedges the caller here.
    pub fn sync(&self) -> Result<(), RegisterError> {
        self.ctx.sync_fifo()
    }

    /// Kick the device into processing buffered raster commands. Returns
    /// immediately; pair with [`SessionController::sync`] to wait.
    pub fn flush(&self) -> Result<(), RegisterError> {
        self.ctx.regs().write(mmio::RASTER_FLUSH, 0)
    }
}
