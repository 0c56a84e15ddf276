//! Hardware seams.
//!
//! Device/bus discovery, address-space mapping, and interrupt wiring are
//! external collaborators of the driver core; this module pins down the
//! interface the core programs them through. The traits take `&self`
//! (interior mutability) because the driver has two live concurrency
//! domains — producer threads and interrupt context — that share the same
//! hardware handles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

/// Memory-mapped control-register window of one device.
pub trait MmioSpace: Send + Sync {
    /// Mapped length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_u32(&self, offset: u64) -> u32;

    fn write_u32(&self, offset: u64, value: u32);
}

/// Hardware-addressable (bus-visible) memory.
///
/// Producers fill DMA payloads through this view using the bus address
/// recorded in a [`DmaRegion`]; the device consumes transfers from the same
/// addresses.
pub trait BusMemory: Send + Sync {
    fn read_bus(&self, bus_addr: u64, buf: &mut [u8]);

    fn write_bus(&self, bus_addr: u64, buf: &[u8]);
}

/// One physically-contiguous, coherent allocation.
///
/// The bus address is the hardware-visible identity of the region and is
/// stable for its whole lifetime. The device addresses buffers with a
/// 32-bit register, so bus addresses are 32-bit by contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaRegion {
    pub bus_addr: u32,
    pub len: u32,
}

/// The platform could not satisfy a coherent allocation.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("coherent allocation of {requested} bytes failed")]
pub struct AllocError {
    pub requested: u32,
}

/// Allocator for coherent, hardware-addressable buffers.
pub trait DmaAllocator: Send + Sync {
    fn alloc_coherent(&self, len: u32) -> Result<DmaRegion, AllocError>;

    /// Release a region returned by [`DmaAllocator::alloc_coherent`]. Must
    /// be called exactly once per successful allocation.
    fn free_coherent(&self, region: DmaRegion);
}

/// Opaque address under which a mapped region appears in the calling
/// process's view. The caller hands it back (implicitly, by reusing the
/// buffer it names) when filling payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallerHandle(pub u64);

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum MapError {
    /// The mapping policy rejected the caller; which regions are protected
    /// is a platform decision, not core logic.
    #[error("permission denied mapping {0}")]
    PermissionDenied(&'static str),
}

/// Maps device-visible memory into the calling process's address space.
pub trait CallerMapper: Send + Sync {
    /// Map one coherent buffer; never privileged.
    fn map_dma(&self, region: &DmaRegion) -> Result<CallerHandle, MapError>;

    /// Map the control-register window (privileged).
    fn map_control(&self) -> Result<CallerHandle, MapError>;

    /// Map the device RAM window (privileged).
    fn map_vram(&self) -> Result<CallerHandle, MapError>;
}

/// Outcome of offering an interrupt to one handler on a shared line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqDecision {
    /// The handler owned the condition and consumed it.
    Handled,
    /// Not this device's interrupt; no state was changed and the line
    /// should be offered to the next handler.
    NotMine,
}

/// Handler invoked in interrupt context. Must never block indefinitely and
/// must decide ownership before mutating any state.
pub trait IrqHandler: Send + Sync {
    fn handle_irq(&self) -> IrqDecision;
}

struct LineInner {
    handlers: Mutex<Vec<(u64, Arc<dyn IrqHandler>)>>,
    next_id: AtomicU64,
}

/// A shared interrupt line.
///
/// The platform raises it; registered handlers are offered the interrupt in
/// registration order until one returns [`IrqDecision::Handled`]. Dispatch
/// holds the handler list lock, so once [`IrqRegistration::deregister`] (or
/// drop) returns, the removed handler can no longer be invoked — the
/// structural guarantee the driver's teardown ordering relies on.
#[derive(Clone)]
pub struct InterruptLine {
    inner: Arc<LineInner>,
}

impl InterruptLine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LineInner {
                handlers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn register(&self, handler: Arc<dyn IrqHandler>) -> IrqRegistration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        IrqRegistration {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Raise the line, offering the interrupt to each handler in turn.
    pub fn raise(&self) -> IrqDecision {
        let handlers = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, handler) in handlers.iter() {
            if let IrqDecision::Handled = handler.handle_irq() {
                return IrqDecision::Handled;
            }
        }
        IrqDecision::NotMine
    }

    pub fn handler_count(&self) -> usize {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for InterruptLine {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for one handler registration; removing it is synchronized with
/// dispatch (see [`InterruptLine`]).
pub struct IrqRegistration {
    inner: Arc<LineInner>,
    id: u64,
}

impl IrqRegistration {
    pub fn deregister(self) {
        // Removal happens in Drop.
    }

    fn remove(&self) {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| *id != self.id);
    }
}

impl Drop for IrqRegistration {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        calls: AtomicUsize,
        decision: IrqDecision,
    }

    impl CountingHandler {
        fn new(decision: IrqDecision) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                decision,
            })
        }
    }

    impl IrqHandler for CountingHandler {
        fn handle_irq(&self) -> IrqDecision {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.decision
        }
    }

    #[test]
    fn raise_with_no_handlers_is_not_mine() {
        let line = InterruptLine::new();
        assert_eq!(line.raise(), IrqDecision::NotMine);
    }

    #[test]
    fn dispatch_stops_at_first_handled() {
        let line = InterruptLine::new();
        let first = CountingHandler::new(IrqDecision::Handled);
        let second = CountingHandler::new(IrqDecision::Handled);
        let _a = line.register(first.clone());
        let _b = line.register(second.clone());

        assert_eq!(line.raise(), IrqDecision::Handled);
        assert_eq!(first.calls.load(Ordering::Relaxed), 1);
        assert_eq!(second.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn not_mine_falls_through_to_next_handler() {
        let line = InterruptLine::new();
        let first = CountingHandler::new(IrqDecision::NotMine);
        let second = CountingHandler::new(IrqDecision::Handled);
        let _a = line.register(first.clone());
        let _b = line.register(second.clone());

        assert_eq!(line.raise(), IrqDecision::Handled);
        assert_eq!(first.calls.load(Ordering::Relaxed), 1);
        assert_eq!(second.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn deregistered_handler_is_never_invoked() {
        let line = InterruptLine::new();
        let handler = CountingHandler::new(IrqDecision::Handled);
        let registration = line.register(handler.clone());
        assert_eq!(line.handler_count(), 1);

        registration.deregister();
        assert_eq!(line.handler_count(), 0);
        assert_eq!(line.raise(), IrqDecision::NotMine);
        assert_eq!(handler.calls.load(Ordering::Relaxed), 0);
    }
}
