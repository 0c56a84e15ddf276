//! The bounded circular transfer ring and its producer-side submit
//! protocol.
//!
//! A fixed pool of [`RING_SLOTS`] coherent buffers is shared between a
//! software producer and the interrupt-driven hardware consumer. `fill` is
//! the next slot reserved for an upcoming submission; `drain` is the slot
//! in flight to (or just completed by) hardware. `full` disambiguates the
//! two meanings of `fill == drain`.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use kirigpu_protocol::mmio;

use crate::error::{DriverError, RegisterError, Result};
use crate::hal::CallerHandle;
use crate::pool::TransferPool;
use crate::regs::RegisterFile;

/// Number of slots in the transfer ring (and buffers in the pool).
pub const RING_SLOTS: usize = 8;

/// Tagged ring state, computed from the index pair and the full flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingOccupancy {
    /// No outstanding transfers.
    Empty,
    /// `1..RING_SLOTS` outstanding transfers.
    Partial(usize),
    /// Exactly [`RING_SLOTS`] outstanding transfers.
    Full,
}

/// The fill/drain index pair plus the full flag.
///
/// Invariant: `full` is true iff exactly [`RING_SLOTS`] transfers have been
/// submitted since the last empty state without a matching completion.
/// Mutated only while holding the exclusive device lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingIndices {
    fill: usize,
    drain: usize,
    full: bool,
}

impl RingIndices {
    pub fn fill(&self) -> usize {
        self.fill
    }

    pub fn drain(&self) -> usize {
        self.drain
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Outstanding transfer count: `(fill - drain) mod RING_SLOTS`, with
    /// the full flag resolving the ambiguous `fill == drain` case.
    pub fn outstanding(&self) -> usize {
        if self.full {
            RING_SLOTS
        } else {
            (self.fill + RING_SLOTS - self.drain) % RING_SLOTS
        }
    }

    pub fn occupancy(&self) -> RingOccupancy {
        match self.outstanding() {
            0 => RingOccupancy::Empty,
            RING_SLOTS => RingOccupancy::Full,
            k => RingOccupancy::Partial(k),
        }
    }

    /// Advance `fill` by one slot. The single advance site: called exactly
    /// once per submitted transfer, never on a full ring.
    fn reserve_fill(&mut self) {
        debug_assert!(!self.full, "reserving a slot on a full ring");
        self.fill = (self.fill + 1) % RING_SLOTS;
        if self.fill == self.drain {
            self.full = true;
        }
        self.assert_consistent();
    }

    /// Advance `drain` by one slot. A completion always frees a slot, so
    /// this also clears `full`.
    fn complete_drain(&mut self) {
        self.drain = (self.drain + 1) % RING_SLOTS;
        self.full = false;
        self.assert_consistent();
    }

    fn assert_consistent(&self) {
        debug_assert!(self.fill < RING_SLOTS && self.drain < RING_SLOTS);
        debug_assert!(!self.full || self.fill == self.drain);
    }
}

/// Launched/drained transfer counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Transfers programmed into hardware (fast-path submits plus
    /// completion-handler relaunches).
    pub launched: u64,
    /// Completions drained by the interrupt handler.
    pub completed: u64,
}

/// Everything the exclusive device lock guards.
#[derive(Debug, Default)]
pub struct DeviceState {
    pub(crate) ring: RingIndices,
    pub(crate) pool: Option<TransferPool>,
    pub(crate) stats: TransferStats,
    pub(crate) graphics_on: bool,
    /// Pending external interruption of blocked submit waits; sticky until
    /// cleared so a wait that races the signal still observes it.
    pub(crate) interrupt_pending: bool,
}

/// Per-device driver state: the register file plus the lock/condvar pair
/// coordinating producer threads with the interrupt domain.
pub struct DeviceContext {
    regs: RegisterFile,
    state: Mutex<DeviceState>,
    slot_freed: Condvar,
}

impl DeviceContext {
    pub fn new(regs: RegisterFile) -> Self {
        Self {
            regs,
            state: Mutex::new(DeviceState::default()),
            slot_freed: Condvar::new(),
        }
    }

    pub fn regs(&self) -> &RegisterFile {
        &self.regs
    }

    /// Acquire the exclusive device lock. Poisoning is absorbed: a panic
    /// in one domain must not wedge the other.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit the payload currently written into the buffer at `fill`.
    ///
    /// Fast path: if the ring is empty the device is idle, so the buffer is
    /// programmed into hardware immediately and the call never blocks.
    /// Otherwise the slot is reserved behind the outstanding transfers; if
    /// that makes the ring full, the *next* submit blocks until the
    /// completion handler frees a slot. Blocking is interruptible via
    /// [`DeviceContext::signal_interrupt`] and surfaces as
    /// [`DriverError::Interrupted`], never a silent retry.
    ///
    /// Buffers reach hardware strictly in submission order; the transfer
    /// programmed is always the one at `drain`, never at `fill`.
    pub fn submit(&self, byte_count: u32) -> Result<()> {
        let mut st = self.lock_state();
        if st.pool.is_none() {
            return Err(DriverError::NotBound);
        }

        while st.ring.is_full() {
            if st.interrupt_pending {
                return Err(DriverError::Interrupted);
            }
            tracing::trace!("transfer ring full; waiting for a freed slot");
            st = self
                .slot_freed
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
            if st.interrupt_pending {
                return Err(DriverError::Interrupted);
            }
            // The pool can be unbound while we slept; the interrupt flag
            // may already have been cleared for the next bind by then.
            if st.pool.is_none() {
                return Err(DriverError::Interrupted);
            }
        }

        let was_empty = st.ring.occupancy() == RingOccupancy::Empty;
        let slot = st.ring.fill();
        if let Some(pool) = st.pool.as_mut() {
            pool.buffer_mut(slot).set_pending_bytes(byte_count);
        }
        st.ring.reserve_fill();

        if was_empty {
            // Device idle: the slot just submitted is also `drain`, so it
            // becomes the in-flight transfer right away.
            self.launch_locked(&mut st, slot)?;
        }
        tracing::trace!(slot, byte_count, outstanding = st.ring.outstanding(), "transfer submitted");
        Ok(())
    }

    /// Program hardware with the buffer at `slot`. Caller holds the device
    /// lock; register writes affecting ring progression stay inside the
    /// critical section.
    pub(crate) fn launch_locked(
        &self,
        st: &mut DeviceState,
        slot: usize,
    ) -> std::result::Result<(), RegisterError> {
        let Some(pool) = st.pool.as_ref() else {
            return Ok(());
        };
        let buf = pool.buffer(slot);
        let (bus_addr, byte_count) = (buf.bus_addr(), buf.pending_bytes());
        self.regs.write(mmio::BUFFER_ADDRESS, bus_addr)?;
        self.regs.write(mmio::BUFFER_CONFIG, byte_count)?;
        st.stats.launched += 1;
        Ok(())
    }

    /// Caller handle of the next buffer to fill.
    ///
    /// While the ring is full the slot at `fill` is the in-flight
    /// transfer, owned by hardware; handing its mapping out would let the
    /// producer scribble over a buffer mid-DMA. Blocks until a completion
    /// frees the slot, interruptibly like a blocked submit.
    pub(crate) fn next_fill_handle(&self) -> Result<CallerHandle> {
        let mut st = self.lock_state();
        loop {
            if st.interrupt_pending {
                return Err(DriverError::Interrupted);
            }
            let Some(pool) = st.pool.as_ref() else {
                return Err(DriverError::NotBound);
            };
            if !st.ring.is_full() {
                return Ok(pool.handle(st.ring.fill()));
            }
            tracing::trace!("fill slot in flight; waiting for a freed slot");
            st = self
                .slot_freed
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Busy-poll the FIFO depth register until the device reports idle.
    ///
    /// This is the defined meaning of "device idle". The wait is blocking,
    /// non-yielding, and has no upper bound: if hardware never drains to
    /// depth zero this never returns.
    pub fn sync_fifo(&self) -> std::result::Result<(), RegisterError> {
        while self.regs.read(mmio::FIFO_DEPTH)? != 0 {
            std::hint::spin_loop();
        }
        Ok(())
    }

    /// Interrupt any blocked submit waits; they return
    /// [`DriverError::Interrupted`]. The signal stays pending until
    /// [`DeviceContext::clear_interrupt`].
    pub fn signal_interrupt(&self) {
        {
            let mut st = self.lock_state();
            st.interrupt_pending = true;
        }
        self.slot_freed.notify_all();
    }

    pub fn clear_interrupt(&self) {
        self.lock_state().interrupt_pending = false;
    }

    /// Wake everyone blocked on a freed slot. Two kinds of waiter share
    /// the condvar (submitters waiting for ring space and callers waiting
    /// for the fill slot to leave flight), so a single wakeup could land
    /// on one that cannot make progress yet. Called by the completion
    /// handler after releasing the device lock.
    pub(crate) fn notify_slot_freed(&self) {
        self.slot_freed.notify_all();
    }

    pub(crate) fn complete_drain_locked(&self, st: &mut DeviceState) {
        st.ring.complete_drain();
        st.stats.completed += 1;
    }

    pub fn ring_state(&self) -> RingIndices {
        self.lock_state().ring
    }

    pub fn transfer_stats(&self) -> TransferStats {
        self.lock_state().stats
    }

    pub fn graphics_on(&self) -> bool {
        self.lock_state().graphics_on
    }
}
