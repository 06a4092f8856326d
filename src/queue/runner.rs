use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::packet::{PacketRef, PacketType, SendState, StateSignal};
use crate::queue::packet_queue::{PacketQueue, QueueInner};

/// what a tick decided to do with a single packet
enum TickAction {
    Send {
        signal: StateSignal,
        /// no response will ever arrive for the packet, so it is complete once it is sent
        fire_and_forget: bool,
    },
    Abort,
    Keep,
}

/// Resets the 'ticking' flag if a run is cancelled halfway, i.e. its future is dropped.
struct TickGuard<'a> {
    inner: &'a QueueInner,
    armed: bool,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut state) = self.inner.state.lock() {
                state.ticking = false;
                state.rerun_requested = false;
            }
        }
    }
}

impl PacketQueue {
    /// Runs the scheduler now and re-arms the timer.
    ///
    /// Only one tick runs at any time. A run requested while a tick is in progress (e.g. by an
    ///  immediate `send` from inside a hook) is coalesced into the running one, which then
    ///  loops once more before returning.
    pub(crate) async fn run(&self) {
        {
            let mut state = self.inner.lock_state();
            state.next_tick = Instant::now() + self.inner.config.interval;
            if state.ticking {
                trace!("tick in progress - requesting a rerun");
                state.rerun_requested = true;
                return;
            }
            state.ticking = true;
        }

        let mut guard = TickGuard { inner: &self.inner, armed: true };
        loop {
            self.tick().await;

            let mut state = self.inner.lock_state();
            state.next_tick = Instant::now() + self.inner.config.interval;
            if !state.rerun_requested {
                state.ticking = false;
                break;
            }
            state.rerun_requested = false;
        }
        guard.armed = false;
    }

    /// A single pass over the queue's packets: send what can be sent, time out what has been
    ///  underway for too long, drop what is finished, and report changes in the aggregate flags.
    ///
    /// The tick iterates over a snapshot, so packets enqueued by hooks during the tick are
    ///  kept but only looked at in the next tick.
    #[tracing::instrument(level = "trace", skip_all, fields(origin = %self.inner.config.origin))]
    async fn tick(&self) {
        let snapshot = {
            let state = self.inner.lock_state();
            if state.flags.suspended {
                trace!("suspended - skipping tick");
                return;
            }
            state.store.snapshot()
        };

        let events = &self.inner.events;
        let mut signal = StateSignal::UNCHANGED;

        for packet in &snapshot {
            match self.evaluate(packet) {
                Ok(TickAction::Send { signal: sent, fire_and_forget }) => {
                    signal.merge(sent);
                    events.on_send(packet).await;
                    if fire_and_forget {
                        let completed = packet.lock().transition(SendState::Completed);
                        match completed {
                            Ok(completed) => signal.merge(completed),
                            Err(e) => debug!("completing fire-and-forget packet: {}", e),
                        }
                    }
                }
                Ok(TickAction::Abort) => {
                    events.on_abort(packet).await;
                    let timed_out = packet.lock().transition(SendState::TimedOut);
                    match timed_out {
                        Ok(timed_out) => {
                            signal.merge(timed_out);
                            if timed_out.is_failed() {
                                events.on_fail(packet).await;
                            }
                        }
                        Err(e) => debug!("timing out packet: {}", e),
                    }
                }
                Ok(TickAction::Keep) => {}
                Err(e) => warn!("error scheduling packet {:?}: {}", packet, e),
            }
        }

        // decided under the lock: hooks may have re-queued packets that were finished when evaluated
        let edges = {
            let mut state = self.inner.lock_state();
            let num_retained = state.store.compact(snapshot.len());
            if num_retained < snapshot.len() {
                trace!("removed {} finished packets", snapshot.len() - num_retained);
            }

            let mut any_active = false;
            let mut should_block_ui = false;
            for packet in state.store.iter().take(num_retained) {
                let p = packet.lock();
                any_active |= p.is_active();
                should_block_ui |= p.should_block_ui();
            }
            state.flags.apply_tick(signal, any_active, should_block_ui)
        };
        self.fire_flag_edges(edges).await;
    }

    fn evaluate(&self, packet: &PacketRef) -> anyhow::Result<TickAction> {
        let mut p = packet.lock();
        if p.can_be_sent() {
            let signal = p.transition(SendState::Sending)?;
            let fire_and_forget = p.is_ack() || (
                !self.inner.config.is_socket
                    && p.options.packet_type == PacketType::Reply
                    && !p.requires_reply()
            );
            return Ok(TickAction::Send { signal, fire_and_forget });
        }
        if p.is_timed_out() {
            return Ok(TickAction::Abort);
        }
        Ok(TickAction::Keep)
    }
}
