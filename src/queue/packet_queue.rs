use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace};

use crate::packet::{Packet, PacketInput, PacketRef, SendState};
use crate::queue::config::QueueConfig;
use crate::queue::events::QueueEvents;
use crate::queue::runtime_flags::{FlagEdges, RuntimeFlags};
use crate::queue::store::QueueStore;

/// The queue manager: drives packets through their send / acknowledge / reply lifecycle,
///  correlates inbound packets with the outbound packets they answer, and reports everything
///  of interest through [QueueEvents].
///
/// This is a cheap handle, clones share the same queue. The queue's scheduler is a timer task
///  that lives as long as the queue, so a queue must be created inside a tokio runtime.
///
/// All mutation of the queue's state is serialized behind a single lock, which is never held
///  while calling a hook. Hooks are therefore free to call back into the queue.
#[derive(Clone)]
pub struct PacketQueue {
    pub(crate) inner: Arc<QueueInner>,
}

pub(crate) struct QueueInner {
    pub(crate) config: Arc<QueueConfig>,
    pub(crate) events: Arc<dyn QueueEvents>,
    pub(crate) state: Mutex<QueueState>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct QueueState {
    pub(crate) store: QueueStore,
    pub(crate) flags: RuntimeFlags,
    /// deadline for the timer's next tick, re-armed after every tick
    pub(crate) next_tick: Instant,
    pub(crate) ticking: bool,
    pub(crate) rerun_requested: bool,
    pub(crate) shut_down: bool,
}

impl QueueInner {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap()
    }

    fn next_tick(&self) -> Instant {
        self.lock_state().next_tick
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        if let Ok(mut handle) = self.timer_handle.lock() {
            if let Some(handle) = handle.take() {
                handle.abort();
            }
        }
    }
}

impl PacketQueue {
    pub fn new(config: QueueConfig, events: Arc<dyn QueueEvents>) -> anyhow::Result<PacketQueue> {
        config.validate()?;
        debug!("creating packet queue for origin {}", config.origin);

        let inner = Arc::new(QueueInner {
            config: Arc::new(config),
            events,
            state: Mutex::new(QueueState {
                store: QueueStore::default(),
                flags: RuntimeFlags::default(),
                next_tick: Instant::now(),
                ticking: false,
                rerun_requested: false,
                shut_down: false,
            }),
            timer_handle: Default::default(),
        });

        let handle = tokio::spawn(Self::run_timer(Arc::downgrade(&inner)));
        *inner.timer_handle.lock().unwrap() = Some(handle);

        Ok(PacketQueue { inner })
    }

    /// The timer re-arms itself unconditionally, even while the queue is suspended, so that
    ///  resuming takes effect without delay. It ends when the last handle to the queue is dropped.
    async fn run_timer(inner: Weak<QueueInner>) {
        loop {
            let deadline = match inner.upgrade() {
                Some(inner) => inner.next_tick(),
                None => return,
            };
            time::sleep_until(deadline).await;

            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.next_tick() > Instant::now() {
                // a tick ran in the meantime and moved the deadline
                continue;
            }
            PacketQueue { inner }.run().await;
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.lock_state().flags.suspended
    }

    pub fn is_sending(&self) -> bool {
        self.inner.lock_state().flags.sending
    }

    pub fn is_ui_blocked(&self) -> bool {
        self.inner.lock_state().flags.ui_blocked
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock_state().shut_down
    }

    pub fn len(&self) -> usize {
        self.inner.lock_state().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock_state().store.is_empty()
    }

    /// the packets currently in the queue, in scheduling order
    pub fn packets(&self) -> Vec<PacketRef> {
        self.inner.lock_state().store.snapshot()
    }

    pub fn contains(&self, packet: &PacketRef) -> bool {
        self.inner.lock_state().store.contains(packet)
    }

    /// Prefixes the packet's sequence id with this queue's origin, making it unique across
    ///  queues that generate sequence ids independently.
    pub fn brand(&self, packet: &mut Packet) {
        packet.seqid = format!("{}{}", self.inner.config.origin, packet.seqid);
    }

    /// Enqueues a packet for sending, returning the handle under which the queue tracks it.
    ///
    /// The queue's origin and its timing / retry policy are stamped onto the packet, replacing
    ///  whatever the packet had. Sending a packet instance that is already in the queue re-queues
    ///  it without adding it a second time.
    ///
    /// In immediate mode (and if the queue is not suspended), the scheduler runs before this
    ///  function returns, so the `on_send` hook may already have fired.
    pub async fn send(&self, packet: impl Into<PacketInput>) -> anyhow::Result<PacketRef> {
        let packet = packet.into().into_packet_ref()?;

        {
            let config = &self.inner.config;
            let mut p = packet.lock();
            p.origin = config.origin.clone();
            let comm = p.comm_mut();
            comm.timeout = config.timeout;
            comm.reply_timeout = config.reply_timeout;
            comm.retries_remaining = config.retries;
            comm.retry_wait = config.retry_wait;
            p.transition(SendState::Queued)?;
        }

        let run_now = {
            let mut state = self.inner.lock_state();
            if !state.store.push_unique(packet.clone()) {
                return Ok(packet);
            }
            self.inner.config.immediate && !state.flags.suspended
        };
        trace!("enqueued {:?}", packet);

        if run_now {
            self.run().await;
        }
        Ok(packet)
    }

    /// Fails a packet from the outside, e.g. because the transport reported an error for it.
    pub async fn error(&self, packet: &PacketRef) {
        let result = {
            let mut p = packet.lock();
            p.set_error();
            p.transition(SendState::Failed)
        };
        if let Err(e) = result {
            debug!("failing packet {:?}: {}", packet, e);
        }
        self.inner.events.on_fail(packet).await;
    }

    /// human-readable listing of the queue's packets, for diagnostics
    pub fn dump(&self) -> String {
        self.inner.lock_state().store.dump()
    }

    pub fn log_dump(&self) {
        info!("packet queue {}:\n{}", self.inner.config.origin, self.dump());
    }

    pub(crate) async fn fire_flag_edges(&self, edges: FlagEdges) {
        if let Some(sending) = edges.sending {
            self.inner.events.on_transmit(sending).await;
        }
        if let Some(ui_blocked) = edges.ui_blocked {
            self.inner.events.on_block_ui(ui_blocked).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::runtime::Builder;

    use crate::packet::RawPacket;
    use crate::queue::events::NoEvents;
    use crate::test_util::events::{QueueEvent, RecordingEvents};
    use super::*;

    fn queue(immediate: bool) -> (PacketQueue, Arc<RecordingEvents>) {
        let events = Arc::new(RecordingEvents::new());
        let config = QueueConfig {
            interval: Duration::from_millis(50),
            immediate,
            ..QueueConfig::new("test")
        };
        (PacketQueue::new(config, events.clone()).unwrap(), events)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let config = QueueConfig {
                interval: Duration::ZERO,
                ..QueueConfig::default()
            };
            assert!(PacketQueue::new(config, Arc::new(NoEvents)).is_err());
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_stamps_queue_policy() {
        let events = Arc::new(RecordingEvents::new());
        let config = QueueConfig {
            timeout: Duration::from_millis(100),
            reply_timeout: Duration::from_millis(300),
            retries: 3,
            retry_wait: Duration::from_millis(20),
            immediate: false,
            ..QueueConfig::new("me")
        };
        let queue = PacketQueue::new(config, events).unwrap();

        let mut packet = Packet::new("x");
        packet.origin = "someone else".to_string();
        packet.comm_mut().retries_remaining = 99;

        let packet = queue.send(packet).await.unwrap();
        let p = packet.lock();
        assert_eq!(p.origin, "me");
        assert_eq!(p.comm().timeout, Duration::from_millis(100));
        assert_eq!(p.comm().reply_timeout, Duration::from_millis(300));
        assert_eq!(p.comm().retries_remaining, 3);
        assert_eq!(p.comm().retry_wait, Duration::from_millis(20));
        assert_eq!(p.send_state(), SendState::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_dedups_by_identity() {
        let (queue, _) = queue(false);

        let packet = queue.send(Packet::new("x")).await.unwrap();
        let again = queue.send(&packet).await.unwrap();
        assert!(again.ptr_eq(&packet));
        assert_eq!(queue.len(), 1);

        // equal value, but a different instance
        queue.send(packet.snapshot()).await.unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_accepts_raw_input() {
        let (queue, _) = queue(false);

        let from_json = queue.send(r#"{"CO":"ping","PL":{"a":1}}"#).await.unwrap();
        assert_eq!(from_json.lock().command, "ping");
        assert_eq!(from_json.lock().payload, json!({"a":1}));

        let from_raw = queue.send(RawPacket { command: "pong".to_string(), ..Default::default() }).await.unwrap();
        assert_eq!(from_raw.lock().command, "pong");

        assert!(queue.send("not json").await.is_err());
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_send_runs_before_returning() {
        let (queue, events) = queue(true);

        let packet = queue.send(Packet::new("x").with_reply_required(true)).await.unwrap();
        assert_eq!(packet.send_state(), SendState::Sending);
        assert_eq!(events.events_for(&packet.seqid()), vec![QueueEvent::Send(packet.seqid())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_send_waits_for_tick() {
        let (queue, events) = queue(false);

        let packet = queue.send(Packet::new("x").with_reply_required(true)).await.unwrap();
        assert_eq!(packet.send_state(), SendState::Queued);
        assert!(events.events().is_empty());

        time::sleep(Duration::from_millis(60)).await;
        assert_eq!(packet.send_state(), SendState::Sending);
        assert_eq!(events.events_for(&packet.seqid()), vec![QueueEvent::Send(packet.seqid())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error() {
        let (queue, events) = queue(true);
        let packet = queue.send(Packet::new("x").with_reply_required(true)).await.unwrap();

        queue.error(&packet).await;
        assert_eq!(packet.send_state(), SendState::Failed);
        assert!(packet.lock().has_error());
        assert!(events.events().contains(&QueueEvent::Fail(packet.seqid())));

        time::sleep(Duration::from_millis(60)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_brand() {
        let (queue, _) = queue(false);
        let mut packet = Packet::new("x");
        packet.seqid = "17".to_string();
        queue.brand(&mut packet);
        assert_eq!(packet.seqid, "test17");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dump() {
        let (queue, _) = queue(false);
        let mut packet = Packet::new("hello");
        packet.seqid = "abc".to_string();
        queue.send(packet).await.unwrap();

        assert_eq!(queue.dump(), "state[0]: queued, seqid: abc, cmd: hello, last: None, type: RQ\n");
        queue.log_dump();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_stops_when_queue_is_dropped() {
        let (queue, _) = queue(false);
        let weak = Arc::downgrade(&queue.inner);
        drop(queue);
        time::sleep(Duration::from_millis(200)).await;
        assert!(weak.upgrade().is_none());
    }
}
