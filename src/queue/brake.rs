use tracing::{debug, info, warn};

use crate::queue::packet_queue::PacketQueue;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BrakeMode {
    /// pause packets in place
    Soft,
    /// pause packets in place, aborting those that are underway
    Hard,
    /// abort and fail everything, for good
    Park,
    /// resume paused packets
    Release,
}

impl PacketQueue {
    /// Suspends or resumes the queue. Suspending applies a soft or hard brake depending on the
    ///  configuration; resuming releases the brake and runs the scheduler right away.
    ///
    /// Calls that do not change the suspended state are no-ops.
    pub async fn suspend(&self, suspended: bool) {
        let mode = {
            let mut state = self.inner.lock_state();
            if state.shut_down && !suspended {
                warn!("queue {} is shut down, ignoring request to resume", self.inner.config.origin);
                return;
            }
            if state.flags.suspended == suspended {
                debug!("queue {} is already {}", self.inner.config.origin, if suspended { "suspended" } else { "running" });
                return;
            }
            state.flags.suspended = suspended;

            match (suspended, self.inner.config.soft_brake) {
                (false, _) => BrakeMode::Release,
                (true, true) => BrakeMode::Soft,
                (true, false) => BrakeMode::Hard,
            }
        };

        self.brake(mode).await;
        if mode == BrakeMode::Release {
            self.run().await;
        }
    }

    /// Stops the queue for good: every packet that is not finished yet is failed, and those
    ///  underway are aborted first. There is no coming back from this.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.shut_down {
                warn!("queue {} is already shut down", self.inner.config.origin);
                return;
            }
            state.shut_down = true;
            state.flags.suspended = true;
        }
        info!("shutting down queue {}", self.inner.config.origin);
        self.brake(BrakeMode::Park).await;
    }

    async fn brake(&self, mode: BrakeMode) {
        debug!("applying {:?} brake to queue {}", mode, self.inner.config.origin);

        let packets = self.inner.lock_state().store.snapshot();
        let releasing = mode == BrakeMode::Release;
        let mut any_active = false;
        let mut should_block_ui = false;

        for packet in &packets {
            if releasing {
                let mut p = packet.lock();
                if p.is_suspended() {
                    p.suspend(false);
                    any_active |= p.is_active();
                    should_block_ui |= p.should_block_ui();
                }
                continue;
            }

            let is_active = {
                let p = packet.lock();
                should_block_ui |= p.should_block_ui();
                p.is_active()
            };
            any_active |= is_active;
            if is_active && mode != BrakeMode::Soft {
                self.inner.events.on_abort(packet).await;
            }

            let can_be_removed = packet.lock().can_be_removed();
            if !can_be_removed {
                if mode == BrakeMode::Park {
                    self.error(packet).await;
                }
                else {
                    packet.lock().suspend(true);
                }
            }
        }

        let edges = self.inner.lock_state().flags.apply_brake(releasing, any_active, should_block_ui);
        self.fire_flag_edges(edges).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use mockall::predicate::eq;
    use mockall::Sequence;
    use tokio::time;

    use crate::packet::{Packet, SendState};
    use crate::queue::config::QueueConfig;
    use crate::queue::events::MockQueueEvents;
    use crate::test_util::events::{QueueEvent, RecordingEvents};
    use super::*;

    fn config(soft_brake: bool) -> QueueConfig {
        QueueConfig {
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(100),
            soft_brake,
            ..QueueConfig::new("brake")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_brake_pauses_in_place() {
        let events = Arc::new(RecordingEvents::new());
        let queue = PacketQueue::new(config(true), events.clone()).unwrap();
        let active = queue.send(Packet::new("a").with_reply_required(true).with_block_ui(true)).await.unwrap();

        queue.suspend(true).await;
        assert!(queue.is_suspended());
        assert!(active.lock().is_suspended());
        assert!(!events.events().contains(&QueueEvent::Abort(active.seqid())));
        assert_eq!(events.flag_events(), vec![
            QueueEvent::Transmit(true), QueueEvent::BlockUi(true),
            QueueEvent::Transmit(false), QueueEvent::BlockUi(false),
        ]);

        // no timeout while suspended
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(active.send_state(), SendState::Sending);

        queue.suspend(false).await;
        assert!(!queue.is_suspended());
        assert!(!active.lock().is_suspended());
        assert_eq!(events.flag_events()[4..], [QueueEvent::Transmit(true), QueueEvent::BlockUi(true)]);

        // the timeout clock restarted on resume
        time::sleep(Duration::from_millis(60)).await;
        assert_eq!(active.send_state(), SendState::Sending);
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(active.send_state(), SendState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_brake_flags_cover_all_packets() {
        let events = Arc::new(RecordingEvents::new());
        let queue = PacketQueue::new(config(true), events.clone()).unwrap();
        let blocking = queue.send(Packet::new("a").with_reply_required(true).with_block_ui(true)).await.unwrap();
        let background = queue.send(Packet::new("b").with_reply_required(true)).await.unwrap();
        assert_eq!(blocking.send_state(), SendState::Sending);
        assert_eq!(background.send_state(), SendState::Sending);

        // the packet that does not block the UI comes last, and must not mask the one that does
        queue.suspend(true).await;
        queue.suspend(false).await;
        assert!(queue.is_ui_blocked());
        assert_eq!(events.flag_events(), vec![
            QueueEvent::Transmit(true), QueueEvent::BlockUi(true),
            QueueEvent::Transmit(false), QueueEvent::BlockUi(false),
            QueueEvent::Transmit(true), QueueEvent::BlockUi(true),
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspended_queue_does_not_send() {
        let events = Arc::new(RecordingEvents::new());
        let queue = PacketQueue::new(config(true), events.clone()).unwrap();
        queue.suspend(true).await;

        let packet = queue.send(Packet::new("a").with_reply_required(true)).await.unwrap();
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(packet.send_state(), SendState::Queued);
        assert!(events.events().is_empty());

        // releasing runs the scheduler right away
        queue.suspend(false).await;
        assert_eq!(packet.send_state(), SendState::Sending);
        assert_eq!(events.events_for(&packet.seqid()), vec![QueueEvent::Send(packet.seqid())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_is_idempotent() {
        let mut mock = MockQueueEvents::new();
        let mut seq = Sequence::new();
        mock.expect_on_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ());
        mock.expect_on_transmit()
            .with(eq(true))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ());
        mock.expect_on_abort()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ());
        mock.expect_on_transmit()
            .with(eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ());

        let queue = PacketQueue::new(config(false), Arc::new(mock)).unwrap();
        let packet = queue.send(Packet::new("a").with_reply_required(true)).await.unwrap();

        queue.suspend(true).await;
        queue.suspend(true).await;
        assert!(queue.is_suspended());
        assert!(packet.lock().is_suspended());
        assert_eq!(packet.send_state(), SendState::Sending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_brake_aborts_only_active_packets() {
        let events = Arc::new(RecordingEvents::new());
        let queue = PacketQueue::new(QueueConfig { immediate: false, ..config(false) }, events.clone()).unwrap();

        let active = queue.send(Packet::new("a").with_reply_required(true)).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        let queued = queue.send(Packet::new("b").with_reply_required(true)).await.unwrap();
        assert_eq!(active.send_state(), SendState::Sending);
        assert_eq!(queued.send_state(), SendState::Queued);

        queue.suspend(true).await;
        assert!(events.events().contains(&QueueEvent::Abort(active.seqid())));
        assert!(!events.events().contains(&QueueEvent::Abort(queued.seqid())));
        assert!(active.lock().is_suspended());
        assert!(queued.lock().is_suspended());
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_fails_everything() {
        let events = Arc::new(RecordingEvents::new());
        let queue = PacketQueue::new(QueueConfig { immediate: false, ..config(true) }, events.clone()).unwrap();

        let active = queue.send(Packet::new("a").with_reply_required(true).with_block_ui(true)).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        let queued = queue.send(Packet::new("b").with_reply_required(true)).await.unwrap();

        queue.shutdown().await;
        assert!(queue.is_shut_down());
        assert!(queue.is_suspended());
        assert_eq!(active.send_state(), SendState::Failed);
        assert_eq!(queued.send_state(), SendState::Failed);
        assert!(queued.lock().has_error());

        assert_eq!(events.events_for(&active.seqid()), vec![
            QueueEvent::Send(active.seqid()),
            QueueEvent::Abort(active.seqid()),
            QueueEvent::Fail(active.seqid()),
        ]);
        assert_eq!(events.events_for(&queued.seqid()), vec![QueueEvent::Fail(queued.seqid())]);
        assert_eq!(events.flag_events(), vec![
            QueueEvent::Transmit(true), QueueEvent::BlockUi(true),
            QueueEvent::Transmit(false), QueueEvent::BlockUi(false),
        ]);

        // terminal: neither a second shutdown nor resuming has any effect
        let num_events = events.events().len();
        queue.shutdown().await;
        queue.suspend(false).await;
        assert!(queue.is_suspended());
        assert_eq!(events.events().len(), num_events);
    }
}
