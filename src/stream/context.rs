//! State owned by a single monitoring run

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task::block_in_place;
use tracing::{debug, info, warn};

use super::types::{ActivityEvent, ConnectionState, MonitoredPair, Origin};
use crate::config::StreamConfig;
use crate::rpc::SolanaRpc;
use crate::state::{Cursor, CursorStore, SeenSet};

/// Everything one `start` creates. Dropped on stop or pair change;
/// only the persisted cursor outlives it.
pub struct RunContext {
    pub pair: MonitoredPair,
    pub config: Arc<StreamConfig>,
    pub rpc: SolanaRpc,
    store: Arc<dyn CursorStore>,
    events: mpsc::Sender<ActivityEvent>,
    seen: Mutex<SeenSet>,
    cursor: Mutex<Cursor>,
    in_flight: AtomicUsize,
    /// Shared with the monitor so `state()` reads the live value
    state: Arc<RwLock<ConnectionState>>,
    /// Cleared by `deactivate`. Readers hold the lock while emitting.
    active: RwLock<bool>,
}

impl RunContext {
    pub fn new(
        pair: MonitoredPair,
        config: Arc<StreamConfig>,
        rpc: SolanaRpc,
        store: Arc<dyn CursorStore>,
        events: mpsc::Sender<ActivityEvent>,
        cursor: Cursor,
        state: Arc<RwLock<ConnectionState>>,
    ) -> Self {
        let seen = SeenSet::new(config.seen_capacity);
        Self {
            pair,
            config,
            rpc,
            store,
            events,
            seen: Mutex::new(seen),
            cursor: Mutex::new(cursor),
            in_flight: AtomicUsize::new(0),
            state,
            active: RwLock::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        *self.active.read()
    }

    /// Stop all further emission and state changes from this run.
    /// Returns once no emission is in progress.
    pub fn deactivate(&self) {
        *self.active.write() = false;
    }

    pub fn is_seen(&self, identifier: &str) -> bool {
        self.seen.lock().contains(identifier)
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor.lock().clone()
    }

    /// Record a state transition unless the run has been stopped
    pub fn set_state(&self, next: ConnectionState) {
        let active = self.active.read();
        if !*active {
            return;
        }
        let mut state = self.state.write();
        if *state != next {
            debug!(pair = %self.pair.short(), from = %*state, to = %next, "connection state");
            *state = next;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Admission gate for live detail fetches. Never queues: returns
    /// `None` when the limit is reached.
    pub fn try_admit(self: &Arc<Self>) -> Option<InFlightGuard> {
        let limit = self.config.max_detail_concurrency;
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .ok()
            .map(|_| InFlightGuard { ctx: Arc::clone(self) })
    }

    /// Deliver an event, mark it seen and advance the persisted cursor.
    ///
    /// Returns `false` if the run is no longer active, the identifier was already
    /// emitted, or the channel refused the event. A refused event is neither marked
    /// seen nor reflected in the cursor, so a later delivery or a restart's backfill
    /// can still pick it up.
    pub fn emit(
        &self,
        origin: Origin,
        position: u64,
        identifier: &str,
        error: Option<String>,
        note: String,
    ) -> bool {
        let active = self.active.read();
        if !*active {
            return false;
        }

        {
            let mut seen = self.seen.lock();
            if seen.contains(identifier) {
                debug!(signature = identifier, %origin, "duplicate suppressed");
                return false;
            }

            let event = ActivityEvent::new(origin, self.pair.clone(), position, identifier, error, note);
            match self.events.try_send(event) {
                Ok(()) => {
                    seen.insert(identifier);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(signature = identifier, %origin, "event channel full, dropping event");
                    return false;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(signature = identifier, "event receiver dropped");
                    return false;
                }
            }
        }

        info!(
            pair = %self.pair.short(),
            %origin,
            signature = identifier,
            slot = position,
            "activity event"
        );

        // Held through the write so saves land in advance order
        let mut cursor = self.cursor.lock();
        if cursor.advance(position, identifier) {
            if let Err(e) = blocking_io(|| self.store.save(&self.pair, &cursor)) {
                warn!(pair = %self.pair.short(), error = ?e, "failed to persist cursor");
            }
        }

        true
    }
}

/// Run blocking store IO without stalling sibling tasks on a multi-threaded runtime
fn blocking_io<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => block_in_place(f),
        _ => f(),
    }
}

/// Releases one live detail-fetch slot on drop
pub struct InFlightGuard {
    ctx: Arc<RunContext>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ctx.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::rpc::mock::MockRpc;
    use crate::state::MemoryCursorStore;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_emit_dedups_and_advances_cursor() {
        let (ctx, store, mut rx) = context(MockRpc::healthy(), StreamConfig::default());

        assert!(ctx.emit(Origin::Backfill, 10, "a", None, String::new()));
        assert!(!ctx.emit(Origin::Stream, 10, "a", None, String::new()));
        assert!(ctx.emit(Origin::Stream, 8, "b", None, String::new()));

        assert_eq!(rx.try_recv().unwrap().identifier, "a");
        assert_eq!(rx.try_recv().unwrap().identifier, "b");
        assert!(rx.try_recv().is_err());

        // older position does not move the cursor back
        let stored = store.load(&ctx.pair).unwrap();
        assert_eq!(stored.last_position, 10);
        assert_eq!(stored.last_identifier.as_deref(), Some("a"));
    }

    #[test]
    fn test_inactive_run_emits_nothing() {
        let (ctx, _store, mut rx) = context(MockRpc::healthy(), StreamConfig::default());
        ctx.set_state(ConnectionState::Subscribed);
        ctx.deactivate();

        assert!(!ctx.emit(Origin::Stream, 1, "a", None, String::new()));
        assert!(rx.try_recv().is_err());

        // state is frozen once deactivated
        ctx.set_state(ConnectionState::Reconnecting);
        assert_eq!(*ctx.state.read(), ConnectionState::Subscribed);
    }

    #[test]
    fn test_admission_gate() {
        let config = StreamConfig {
            max_detail_concurrency: 2,
            ..StreamConfig::default()
        };
        let (ctx, _store, _rx) = context(MockRpc::healthy(), config);

        let first = ctx.try_admit().unwrap();
        let _second = ctx.try_admit().unwrap();
        assert!(ctx.try_admit().is_none());
        assert_eq!(ctx.in_flight(), 2);

        drop(first);
        assert_eq!(ctx.in_flight(), 1);
        assert!(ctx.try_admit().is_some());
    }

    #[test]
    fn test_full_channel_drops_newest() {
        let config = StreamConfig {
            event_buffer: 1,
            ..StreamConfig::default()
        };
        let (ctx, store, mut rx) = context(MockRpc::healthy(), config);

        assert!(ctx.emit(Origin::Stream, 1, "a", None, String::new()));
        assert!(!ctx.emit(Origin::Stream, 2, "b", None, String::new()));

        // the dropped event moved neither the dedup set nor the cursor
        assert!(!ctx.is_seen("b"));
        assert_eq!(store.load(&ctx.pair).unwrap().last_position, 1);

        assert_eq!(rx.try_recv().unwrap().identifier, "a");
        assert!(rx.try_recv().is_err());

        // once there is room the same identifier goes through
        assert!(ctx.emit(Origin::Stream, 2, "b", None, String::new()));
        assert_eq!(rx.try_recv().unwrap().identifier, "b");
        assert_eq!(store.load(&ctx.pair).unwrap().last_position, 2);
    }

    #[test]
    fn test_closed_channel_keeps_cursor() {
        let (ctx, store, rx) = context(MockRpc::healthy(), StreamConfig::default());
        drop(rx);

        assert!(!ctx.emit(Origin::Stream, 9, "a", None, String::new()));
        assert!(!ctx.is_seen("a"));
        assert_eq!(store.load(&ctx.pair).unwrap(), Cursor::default());
    }

    /// Saves of one position stall, as a slow disk would
    struct StallingStore {
        inner: MemoryCursorStore,
        stall_at: u64,
    }

    impl CursorStore for StallingStore {
        fn load(&self, pair: &MonitoredPair) -> anyhow::Result<Cursor> {
            self.inner.load(pair)
        }

        fn save(&self, pair: &MonitoredPair, cursor: &Cursor) -> anyhow::Result<()> {
            if cursor.last_position == self.stall_at {
                thread::sleep(Duration::from_millis(200));
            }
            self.inner.save(pair, cursor)
        }
    }

    #[test]
    fn test_concurrent_emits_persist_newest_cursor() {
        let store = Arc::new(StallingStore {
            inner: MemoryCursorStore::new(),
            stall_at: 100,
        });
        let (ctx, _rx) = context_with_store(MockRpc::healthy(), StreamConfig::default(), store.clone());

        let older = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || ctx.emit(Origin::Stream, 100, "a", None, String::new()))
        };
        thread::sleep(Duration::from_millis(50));
        let newer = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || ctx.emit(Origin::Stream, 110, "b", None, String::new()))
        };
        assert!(older.join().unwrap());
        assert!(newer.join().unwrap());

        let expected = Cursor {
            last_position: 110,
            last_identifier: Some("b".into()),
        };
        assert_eq!(ctx.cursor(), expected);
        assert_eq!(store.load(&ctx.pair).unwrap(), expected);
    }
}
