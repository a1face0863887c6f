use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::model::*;
use crate::observability::{EDITS_COALESCED_TOTAL, EDITS_SUBMITTED_TOTAL, PENDING_EDITS};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EditKey {
    pub item_id: ItemId,
    pub field: String,
}

/// The surviving value of a burst of edits to one `(item, field)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEdit {
    pub item_id: ItemId,
    pub field: String,
    pub value: Value,
    /// Every entity whose capacity any edit of the burst touched.
    pub touched: BTreeSet<EntityId>,
}

/// Where debounced edits go once their quiet period ends.
#[async_trait]
pub trait EditSink: Send + Sync + 'static {
    async fn persist(&self, edit: PendingEdit);
}

struct Slot {
    edit: PendingEdit,
    seq: u64,
    timer: JoinHandle<()>,
}

type WriteLocks = DashMap<EditKey, Arc<Mutex<()>>>;

/// Cancel-and-restart debounce per `(item, field)`.
///
/// Only the last value submitted inside one window is written, and writes for
/// the same key never overtake each other.
pub struct EditDebouncer<S: EditSink> {
    sink: Arc<S>,
    delay: Duration,
    slots: Arc<DashMap<EditKey, Slot>>,
    write_locks: Arc<WriteLocks>,
    next_seq: AtomicU64,
}

impl<S: EditSink> EditDebouncer<S> {
    pub fn new(sink: Arc<S>, delay: Duration) -> Self {
        Self {
            sink,
            delay,
            slots: Arc::new(DashMap::new()),
            write_locks: Arc::new(DashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Record an edit and (re)start its timer. Supersedes any pending edit for the key.
    pub fn submit(
        &self,
        item_id: ItemId,
        field: &str,
        value: Value,
        touched: impl IntoIterator<Item = EntityId>,
    ) {
        let key = EditKey {
            item_id,
            field: field.to_string(),
        };
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let mut edit = PendingEdit {
            item_id,
            field: field.to_string(),
            value,
            touched: touched.into_iter().collect(),
        };
        metrics::counter!(EDITS_SUBMITTED_TOTAL).increment(1);

        match self.slots.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.get();
                previous.timer.abort();
                edit.touched.extend(previous.edit.touched.iter().copied());
                metrics::counter!(EDITS_COALESCED_TOTAL).increment(1);
                debug!("edit {item_id}.{field} superseded pending value");
                let timer = self.spawn_timer(key, seq);
                entry.insert(Slot { edit, seq, timer });
            }
            Entry::Vacant(entry) => {
                let timer = self.spawn_timer(key, seq);
                entry.insert(Slot { edit, seq, timer });
            }
        }
        metrics::gauge!(PENDING_EDITS).set(self.slots.len() as f64);
    }

    fn spawn_timer(&self, key: EditKey, seq: u64) -> JoinHandle<()> {
        let delay = self.delay;
        let slots = self.slots.clone();
        let locks = self.write_locks.clone();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A newer submit replaced this slot; its own timer owns the write.
            let Some((key, slot)) = slots.remove_if(&key, |_, s| s.seq == seq) else {
                return;
            };
            metrics::gauge!(PENDING_EDITS).set(slots.len() as f64);
            write_in_order(&sink, &locks, key, slot.edit).await;
        })
    }

    /// Write every pending edit now, without waiting for its timer.
    pub async fn flush(&self) -> usize {
        let drained = self.drain();
        let count = drained.len();
        join_all(
            drained
                .into_iter()
                .map(|(key, edit)| write_in_order(&self.sink, &self.write_locks, key, edit)),
        )
        .await;
        count
    }

    /// Drop every pending edit without writing it.
    pub fn cancel_all(&self) -> usize {
        self.drain().len()
    }

    fn drain(&self) -> Vec<(EditKey, PendingEdit)> {
        let keys: Vec<EditKey> = self.slots.iter().map(|e| e.key().clone()).collect();
        let drained: Vec<(EditKey, PendingEdit)> = keys
            .into_iter()
            .filter_map(|key| self.slots.remove(&key))
            .map(|(key, slot)| {
                slot.timer.abort();
                (key, slot.edit)
            })
            .collect();
        metrics::gauge!(PENDING_EDITS).set(self.slots.len() as f64);
        drained
    }

    pub fn pending_value(&self, item_id: ItemId, field: &str) -> Option<Value> {
        let key = EditKey {
            item_id,
            field: field.to_string(),
        };
        self.slots.get(&key).map(|s| s.edit.value.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.slots.len()
    }
}

/// Hold the key's write lock for the duration of the sink call.
async fn write_in_order<S: EditSink>(sink: &Arc<S>, locks: &WriteLocks, key: EditKey, edit: PendingEdit) {
    let lock = locks.entry(key.clone()).or_default().value().clone();
    let guard = lock.lock().await;
    sink.persist(edit).await;
    drop(guard);
    drop(lock);
    locks.remove_if(&key, |_, l| Arc::strong_count(l) == 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingSink {
        latency: Duration,
        writes: StdMutex<Vec<(PendingEdit, Instant, Instant)>>,
    }

    impl RecordingSink {
        fn slow(latency: Duration) -> Self {
            Self {
                latency,
                writes: StdMutex::new(Vec::new()),
            }
        }

        fn values(&self) -> Vec<Value> {
            self.writes.lock().unwrap().iter().map(|w| w.0.value.clone()).collect()
        }

        fn edits(&self) -> Vec<PendingEdit> {
            self.writes.lock().unwrap().iter().map(|w| w.0.clone()).collect()
        }
    }

    #[async_trait]
    impl EditSink for RecordingSink {
        async fn persist(&self, edit: PendingEdit) {
            let started = Instant::now();
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.writes.lock().unwrap().push((edit, started, Instant::now()));
        }
    }

    fn debouncer(sink: &Arc<RecordingSink>) -> EditDebouncer<RecordingSink> {
        EditDebouncer::new(sink.clone(), Duration::from_millis(500))
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_writes_only_last_value() {
        let sink = Arc::new(RecordingSink::default());
        let debouncer = debouncer(&sink);

        debouncer.submit(7, "name", json!("v1"), []);
        debouncer.submit(7, "name", json!("v2"), []);
        debouncer.submit(7, "name", json!("v3"), []);
        assert_eq!(debouncer.pending_count(), 1);
        assert_eq!(debouncer.pending_value(7, "name"), Some(json!("v3")));

        wait(600).await;
        assert_eq!(sink.values(), vec![json!("v3")]);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn each_edit_restarts_the_window() {
        let sink = Arc::new(RecordingSink::default());
        let debouncer = debouncer(&sink);

        debouncer.submit(7, "name", json!("a"), []);
        wait(300).await;
        debouncer.submit(7, "name", json!("ab"), []);
        wait(300).await;
        debouncer.submit(7, "name", json!("abc"), []);
        wait(300).await;
        assert!(sink.values().is_empty(), "window keeps restarting");

        wait(300).await;
        assert_eq!(sink.values(), vec![json!("abc")]);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let sink = Arc::new(RecordingSink::default());
        let debouncer = debouncer(&sink);

        debouncer.submit(7, "name", json!("x"), []);
        debouncer.submit(7, "priority", json!("P1"), []);
        debouncer.submit(8, "name", json!("y"), []);
        assert_eq!(debouncer.pending_count(), 3);

        wait(600).await;
        let mut values: Vec<String> = sink.values().iter().map(|v| v.to_string()).collect();
        values.sort();
        assert_eq!(values, vec!["\"P1\"", "\"x\"", "\"y\""]);
    }

    #[tokio::test(start_paused = true)]
    async fn edits_after_a_write_start_a_new_burst() {
        let sink = Arc::new(RecordingSink::default());
        let debouncer = debouncer(&sink);

        debouncer.submit(7, "planned_hours", json!(4), []);
        wait(600).await;
        debouncer.submit(7, "planned_hours", json!(6), []);
        wait(600).await;
        assert_eq!(sink.values(), vec![json!(4), json!(6)]);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_for_one_key_never_overlap() {
        let sink = Arc::new(RecordingSink::slow(Duration::from_millis(1_000)));
        let debouncer = debouncer(&sink);

        debouncer.submit(7, "name", json!("first"), []);
        wait(600).await; // first write now in flight until ~1500
        debouncer.submit(7, "name", json!("second"), []);
        wait(3_000).await;

        let writes = sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].0.value, json!("first"));
        assert_eq!(writes[1].0.value, json!("second"));
        assert!(writes[1].1 >= writes[0].2, "second write started before first settled");
    }

    #[tokio::test(start_paused = true)]
    async fn touched_entities_accumulate_over_a_burst() {
        let sink = Arc::new(RecordingSink::default());
        let debouncer = debouncer(&sink);

        debouncer.submit(7, "owner_id", json!(2), [1, 2]);
        debouncer.submit(7, "owner_id", json!(3), [2, 3]);
        wait(600).await;

        let edits = sink.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].value, json!(3));
        assert_eq!(edits[0].touched, BTreeSet::from([1, 2, 3]));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_now_and_timers_stay_quiet() {
        let sink = Arc::new(RecordingSink::default());
        let debouncer = debouncer(&sink);

        debouncer.submit(7, "name", json!("x"), []);
        debouncer.submit(8, "name", json!("y"), []);
        assert_eq!(debouncer.flush().await, 2);
        assert_eq!(sink.values().len(), 2);

        wait(1_000).await;
        assert_eq!(sink.values().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_edits() {
        let sink = Arc::new(RecordingSink::default());
        let debouncer = debouncer(&sink);

        debouncer.submit(7, "name", json!("x"), []);
        assert_eq!(debouncer.cancel_all(), 1);
        wait(1_000).await;
        assert!(sink.values().is_empty());
        assert_eq!(debouncer.pending_value(7, "name"), None);
    }
}
