//! KiriGPU guest-visible hardware contract.
//!
//! This crate is the single source of truth for everything the driver and
//! the device agree on over the wire:
//! - the fixed MMIO register map ([`regs`]), and
//! - the 32-bit-word command-buffer framing format ([`cmd`]).
//!
//! It intentionally contains no driver logic; the driver core lives in
//! `kirigpu-driver` and programs the device purely through these constants
//! and layouts.
#![forbid(unsafe_code)]

pub mod cmd;
pub mod regs;

pub use cmd::{
    opcode, prim, HeaderFieldOverflow, VertexStreamHeader, VertexStreamWriter,
};
pub use regs::{
    mmio, InfoStatus, ACCEL_ENABLE, CONTROL_REGION_BYTES, IRQ_DISABLE_ALL, IRQ_ENABLE_DMA,
    PIXEL_FORMAT_DEFAULT, REGISTER_SPAN_BYTES,
};
