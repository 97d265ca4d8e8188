//! Time-windowed aggregation of related notifications.
//!
//! Changes to the same (user, entity) pair inside a rolling window are
//! buffered and flushed as one merged message. The window is fixed, not
//! sliding: the first buffered change arms the flush deadline and later
//! changes only append, so the worst-case delay is bounded by the window.
//!
//! A single scheduler task ([`Aggregator::run`]) polls a min-heap of
//! deadlines; cancellation drains every outstanding buffer through the sink
//! so shutdown never silently drops buffered content.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use shopline_core::types::{DbId, Timestamp};

/// Default aggregation window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5 * 60);

// ---------------------------------------------------------------------------
// Keys and buffered state
// ---------------------------------------------------------------------------

/// Aggregation key: one buffer per (user, entity) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggKey {
    pub user_id: DbId,
    pub entity_type: String,
    pub entity_id: DbId,
}

/// One buffered field-change entry.
#[derive(Debug, Clone)]
pub struct ChangeEntry {
    /// Human-readable field label (e.g. `"deadline"`).
    pub label: String,
    /// Rendered one-line summary of this change.
    pub summary: String,
    /// Raw change payload, kept for the merged notification's metadata.
    pub payload: serde_json::Value,
    pub buffered_at: Timestamp,
}

/// Dispatch parameters captured when a buffer is created.
#[derive(Debug, Clone)]
pub struct BufferMeta {
    pub notification_type: String,
    pub importance: String,
    pub event_key: String,
    pub channels: Vec<String>,
}

/// The accumulated state for one aggregation key.
///
/// Owned exclusively by the [`Aggregator`]; it leaves the map only through
/// a flush (timer, explicit, or immediate-send short-circuit).
#[derive(Debug, Clone)]
pub struct PendingAggregation {
    pub key: AggKey,
    pub meta: BufferMeta,
    /// Buffered changes in arrival order.
    pub entries: Vec<ChangeEntry>,
    pub window_started_at: Timestamp,
    pub(crate) deadline: Instant,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Where flushed buffers go (implemented by the dispatch coordinator).
///
/// Implementations handle their own failures; a flush error for one key must
/// not stop the scheduler from flushing the rest.
#[async_trait]
pub trait FlushSink: Send + Sync {
    async fn flush(&self, pending: PendingAggregation);
}

struct AggState {
    buffers: HashMap<AggKey, PendingAggregation>,
    /// Min-heap of (deadline, key). Entries go stale when a buffer is taken
    /// early; the scheduler skips those on pop.
    deadlines: BinaryHeap<Reverse<(Instant, AggKey)>>,
}

/// Keyed aggregation buffer table plus its deadline scheduler.
pub struct Aggregator {
    window: Duration,
    inner: Mutex<AggState>,
    /// Wakes the scheduler when a new deadline is armed.
    wake: Notify,
}

impl Aggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(AggState {
                buffers: HashMap::new(),
                deadlines: BinaryHeap::new(),
            }),
            wake: Notify::new(),
        }
    }

    /// Append a change to the buffer for `key`, creating it (and arming its
    /// flush deadline) on first use.
    ///
    /// Returns `true` when a new buffer was created. Appends to an existing
    /// buffer do not reset the deadline.
    pub fn buffer(&self, key: AggKey, meta: BufferMeta, entry: ChangeEntry) -> bool {
        let mut state = self.inner.lock().expect("aggregation state poisoned");

        if let Some(pending) = state.buffers.get_mut(&key) {
            pending.entries.push(entry);
            return false;
        }

        let deadline = Instant::now() + self.window;
        state.buffers.insert(
            key.clone(),
            PendingAggregation {
                key: key.clone(),
                meta,
                entries: vec![entry],
                window_started_at: Utc::now(),
                deadline,
            },
        );
        state.deadlines.push(Reverse((deadline, key)));
        drop(state);

        self.wake.notify_one();
        true
    }

    /// Remove and return the buffer for `key`, if any.
    ///
    /// Used by the immediate-send short-circuit; the stale heap entry is
    /// skipped when its deadline comes up.
    pub fn take(&self, key: &AggKey) -> Option<PendingAggregation> {
        self.inner
            .lock()
            .expect("aggregation state poisoned")
            .buffers
            .remove(key)
    }

    /// Remove and return every buffer belonging to a user.
    pub fn drain_user(&self, user_id: DbId) -> Vec<PendingAggregation> {
        let mut state = self.inner.lock().expect("aggregation state poisoned");
        let keys: Vec<AggKey> = state
            .buffers
            .keys()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect();
        keys.iter()
            .filter_map(|k| state.buffers.remove(k))
            .collect()
    }

    /// Remove and return every outstanding buffer.
    pub fn drain_all(&self) -> Vec<PendingAggregation> {
        let mut state = self.inner.lock().expect("aggregation state poisoned");
        state.deadlines.clear();
        state.buffers.drain().map(|(_, v)| v).collect()
    }

    /// Number of outstanding buffers.
    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .expect("aggregation state poisoned")
            .buffers
            .len()
    }

    /// Earliest live deadline, discarding stale heap entries.
    fn earliest(&self) -> Option<Instant> {
        let mut state = self.inner.lock().expect("aggregation state poisoned");
        while let Some(Reverse((deadline, key))) = state.deadlines.peek().cloned() {
            match state.buffers.get(&key) {
                Some(pending) if pending.deadline == deadline => return Some(deadline),
                // Taken early or re-armed: drop the stale entry.
                _ => {
                    state.deadlines.pop();
                }
            }
        }
        None
    }

    /// Remove every buffer whose deadline has passed.
    fn take_due(&self, now: Instant) -> Vec<PendingAggregation> {
        let mut state = self.inner.lock().expect("aggregation state poisoned");
        let mut due = Vec::new();
        while let Some(Reverse((deadline, key))) = state.deadlines.peek().cloned() {
            if deadline > now {
                break;
            }
            state.deadlines.pop();
            let live = state.buffers.get(&key).is_some_and(|p| p.deadline == deadline);
            if live {
                if let Some(pending) = state.buffers.remove(&key) {
                    due.push(pending);
                }
            }
        }
        due
    }

    /// Run the flush scheduler until cancelled.
    ///
    /// On cancellation every outstanding buffer is drained through the sink
    /// before the loop exits (the graceful-shutdown `cleanup` path).
    pub async fn run(&self, sink: std::sync::Arc<dyn FlushSink>, cancel: CancellationToken) {
        loop {
            let next = self.earliest();
            let sleep = async {
                match next {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => futures::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    let outstanding = self.drain_all();
                    if !outstanding.is_empty() {
                        tracing::info!(
                            count = outstanding.len(),
                            "Flushing outstanding aggregations on shutdown"
                        );
                    }
                    for pending in outstanding {
                        sink.flush(pending).await;
                    }
                    break;
                }
                _ = self.wake.notified() => {}
                _ = sleep => {
                    for pending in self.take_due(Instant::now()) {
                        sink.flush(pending).await;
                    }
                }
            }
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(user: DbId, entity: DbId) -> AggKey {
        AggKey {
            user_id: user,
            entity_type: "task".into(),
            entity_id: entity,
        }
    }

    fn meta() -> BufferMeta {
        BufferMeta {
            notification_type: "task".into(),
            importance: "normal".into(),
            event_key: "task.field.status".into(),
            channels: vec!["in_app".into()],
        }
    }

    fn entry(label: &str) -> ChangeEntry {
        ChangeEntry {
            label: label.into(),
            summary: format!("{label} changed"),
            payload: serde_json::json!({}),
            buffered_at: Utc::now(),
        }
    }

    struct Collector {
        flushed: tokio::sync::Mutex<Vec<PendingAggregation>>,
    }

    impl Collector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                flushed: tokio::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FlushSink for Collector {
        async fn flush(&self, pending: PendingAggregation) {
            self.flushed.lock().await.push(pending);
        }
    }

    #[test]
    fn first_buffer_creates_later_buffers_append() {
        let agg = Aggregator::new(Duration::from_secs(300));
        assert!(agg.buffer(key(1, 10), meta(), entry("status")));
        assert!(!agg.buffer(key(1, 10), meta(), entry("deadline")));
        assert_eq!(agg.pending_count(), 1);

        let pending = agg.take(&key(1, 10)).unwrap();
        assert_eq!(pending.entries.len(), 2);
        assert_eq!(pending.entries[0].label, "status");
        assert_eq!(pending.entries[1].label, "deadline");
        assert!(agg.take(&key(1, 10)).is_none());
    }

    #[test]
    fn different_keys_have_independent_buffers() {
        let agg = Aggregator::new(Duration::from_secs(300));
        agg.buffer(key(1, 10), meta(), entry("status"));
        agg.buffer(key(2, 10), meta(), entry("status"));
        agg.buffer(key(1, 11), meta(), entry("status"));
        assert_eq!(agg.pending_count(), 3);

        let drained = agg.drain_user(1);
        assert_eq!(drained.len(), 2);
        assert_eq!(agg.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn window_is_fixed_not_sliding() {
        let agg = Arc::new(Aggregator::new(Duration::from_secs(300)));
        let sink = Collector::new();
        let cancel = CancellationToken::new();

        let agg2 = Arc::clone(&agg);
        let sink2 = Arc::clone(&sink);
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { agg2.run(sink2, cancel2).await });

        agg.buffer(key(1, 10), meta(), entry("status"));
        tokio::time::advance(Duration::from_secs(240)).await;
        // A change at t=4min must not extend the t=5min deadline.
        agg.buffer(key(1, 10), meta(), entry("deadline"));

        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        let flushed = sink.flushed.lock().await;
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].entries.len(), 2);
        assert_eq!(flushed[0].entries[0].label, "status");
        assert_eq!(flushed[0].entries[1].label, "deadline");
        assert_eq!(agg.pending_count(), 0);
        drop(flushed);

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn taken_buffer_is_not_flushed_by_the_timer() {
        let agg = Arc::new(Aggregator::new(Duration::from_secs(300)));
        let sink = Collector::new();
        let cancel = CancellationToken::new();

        let agg2 = Arc::clone(&agg);
        let sink2 = Arc::clone(&sink);
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { agg2.run(sink2, cancel2).await });

        agg.buffer(key(1, 10), meta(), entry("status"));
        tokio::time::advance(Duration::from_secs(240)).await;
        // Immediate-send path takes the buffer before the deadline.
        assert!(agg.take(&key(1, 10)).is_some());

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;

        assert!(sink.flushed.lock().await.is_empty());

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_drains_outstanding_buffers() {
        let agg = Arc::new(Aggregator::new(Duration::from_secs(300)));
        let sink = Collector::new();
        let cancel = CancellationToken::new();

        let agg2 = Arc::clone(&agg);
        let sink2 = Arc::clone(&sink);
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { agg2.run(sink2, cancel2).await });

        agg.buffer(key(1, 10), meta(), entry("status"));
        agg.buffer(key(2, 20), meta(), entry("deadline"));
        tokio::task::yield_now().await;

        cancel.cancel();
        let _ = handle.await;

        assert_eq!(sink.flushed.lock().await.len(), 2);
        assert_eq!(agg.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_fire_per_key_in_deadline_order() {
        let agg = Arc::new(Aggregator::new(Duration::from_secs(300)));
        let sink = Collector::new();
        let cancel = CancellationToken::new();

        let agg2 = Arc::clone(&agg);
        let sink2 = Arc::clone(&sink);
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { agg2.run(sink2, cancel2).await });

        agg.buffer(key(1, 10), meta(), entry("status"));
        tokio::time::advance(Duration::from_secs(60)).await;
        agg.buffer(key(2, 20), meta(), entry("deadline"));

        tokio::time::advance(Duration::from_secs(241)).await;
        tokio::task::yield_now().await;
        {
            let flushed = sink.flushed.lock().await;
            assert_eq!(flushed.len(), 1);
            assert_eq!(flushed[0].key, key(1, 10));
        }

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        {
            let flushed = sink.flushed.lock().await;
            assert_eq!(flushed.len(), 2);
            assert_eq!(flushed[1].key, key(2, 20));
        }

        cancel.cancel();
        let _ = handle.await;
    }
}
