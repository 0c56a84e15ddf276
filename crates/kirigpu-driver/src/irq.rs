//! Interrupt-driven completion handling.

use std::sync::Arc;

use kirigpu_protocol::{mmio, InfoStatus};

use crate::hal::{IrqDecision, IrqHandler};
use crate::ring::{DeviceContext, RingOccupancy};

/// Consumer side of the transfer ring, run in interrupt context on a
/// shared line.
///
/// Ownership of the interrupt is decided first: the status register is
/// read, and if the transfer-complete bit is clear the handler returns
/// [`IrqDecision::NotMine`] without acknowledging or touching any state,
/// leaving the condition intact for the next handler on the line.
pub struct CompletionHandler {
    ctx: Arc<DeviceContext>,
}

impl CompletionHandler {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self { ctx }
    }
}

impl IrqHandler for CompletionHandler {
    fn handle_irq(&self) -> IrqDecision {
        let status = match self.ctx.regs().read(mmio::INFO_STATUS) {
            Ok(raw) => InfoStatus::from_bits_truncate(raw),
            Err(err) => {
                tracing::error!(%err, "status register read failed in interrupt context");
                return IrqDecision::NotMine;
            }
        };
        if !status.contains(InfoStatus::DMA_COMPLETE) {
            return IrqDecision::NotMine;
        }

        // Ours. Acknowledge every latched condition in one write.
        if let Err(err) = self
            .ctx
            .regs()
            .write(mmio::INFO_STATUS, InfoStatus::ACK_ALL)
        {
            tracing::error!(%err, "interrupt acknowledge write failed");
            return IrqDecision::Handled;
        }

        let was_full;
        {
            let mut st = self.ctx.lock_state();
            if st.ring.occupancy() == RingOccupancy::Empty {
                // Nothing outstanding: a stale or duplicated completion.
                // Draining here would relaunch a buffer the producer owns.
                tracing::warn!("completion interrupt with no outstanding transfer");
                return IrqDecision::Handled;
            }
            was_full = st.ring.is_full();
            self.ctx.complete_drain_locked(&mut st);

            if st.ring.occupancy() != RingOccupancy::Empty {
                // More submissions queued behind the completed one. Wait
                // for the command FIFO to drain, then hand hardware the
                // buffer now at `drain`.
                let next = st.ring.drain();
                if let Err(err) = self.ctx.sync_fifo() {
                    tracing::error!(%err, "fifo poll failed before relaunch");
                } else if let Err(err) = self.ctx.launch_locked(&mut st, next) {
                    tracing::error!(%err, slot = next, "transfer relaunch failed");
                }
            }
            tracing::trace!(
                drain = st.ring.drain(),
                outstanding = st.ring.outstanding(),
                "transfer completion drained"
            );
        }

        // The freed slot is only interesting to a producer blocked on a
        // full ring; wake one after dropping the device lock.
        if was_full {
            self.ctx.notify_slot_freed();
        }
        IrqDecision::Handled
    }
}
