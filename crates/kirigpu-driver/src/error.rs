use thiserror::Error;

use crate::hal::{AllocError, MapError};

pub type Result<T> = std::result::Result<T, DriverError>;

/// Register-file access failures.
///
/// The register map is validated against the mapped region length when the
/// register file is constructed, so these only surface for raw offsets
/// supplied by callers.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("register offset {offset:#x} outside mapped region of {mapped:#x} bytes")]
    InvalidOffset { offset: u64, mapped: u64 },

    #[error("register offset {offset:#x} is not 4-byte aligned")]
    Misaligned { offset: u64 },

    #[error("mapped region of {mapped:#x} bytes does not cover the {required:#x}-byte register map")]
    RegionTooSmall { mapped: u64, required: u64 },
}

/// Unified error type for KiriGPU driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Unprivileged access to a protected mapped region; the policy lives
    /// behind the [`crate::hal::CallerMapper`] seam, not in the core.
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),

    /// The platform could not satisfy a coherent-buffer allocation at bind
    /// time.
    #[error("dma buffer allocation failed ({requested} bytes)")]
    AllocationFailed { requested: u32 },

    #[error(transparent)]
    Register(#[from] RegisterError),

    /// A blocked submit wait was interrupted externally. Never retried
    /// automatically; the caller decides.
    #[error("blocked submit was interrupted")]
    Interrupted,

    #[error("transfer buffers are not bound")]
    NotBound,

    #[error("transfer buffers are already bound")]
    AlreadyBound,

    #[error("payload of {len} bytes exceeds buffer capacity of {capacity} bytes")]
    PayloadTooLarge { len: u32, capacity: u32 },
}

impl From<AllocError> for DriverError {
    fn from(err: AllocError) -> Self {
        DriverError::AllocationFailed {
            requested: err.requested,
        }
    }
}

impl From<MapError> for DriverError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::PermissionDenied(what) => DriverError::PermissionDenied(what),
        }
    }
}
