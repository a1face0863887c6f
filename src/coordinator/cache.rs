use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, warn};

use crate::backend::{Backend, BackendOp};
use crate::limits::*;
use crate::model::*;
use crate::observability::{self, CACHED_WINDOWS, CACHE_REQUESTS_TOTAL, STALE_FETCHES_DISCARDED_TOTAL};

pub type Records = Arc<Vec<AllocationRecord>>;

type FetchFuture = Shared<BoxFuture<'static, Records>>;

/// Cache generation a fetch was started under: `(epoch, per-entity generation)`.
/// `invalidate(None)` bumps the epoch, `invalidate(Some(e))` bumps `e`'s generation.
type Tag = (u64, u64);

enum WindowState {
    Loading {
        fetch_id: u64,
        tag: Tag,
        fetch: FetchFuture,
    },
    Ready(Records),
}

struct CacheWindow {
    range: DateRange,
    state: WindowState,
}

struct CacheShared {
    windows: DashMap<EntityId, CacheWindow>,
    generations: DashMap<EntityId, u64>,
    epoch: AtomicU64,
    next_fetch_id: AtomicU64,
}

impl CacheShared {
    fn tag(&self, entity_id: EntityId) -> Tag {
        let generation = self.generations.get(&entity_id).map(|g| *g).unwrap_or(0);
        (self.epoch.load(Ordering::SeqCst), generation)
    }
}

/// What a request does after inspecting the window map.
enum Plan {
    Lead(FetchFuture),
    Join { fetch: FetchFuture, reusable: bool },
}

/// Per-entity allocation windows with single-flight fetching.
///
/// At most one fetch per entity is in flight; every concurrent requester awaits
/// the same shared future. Failed fetches resolve to an empty list and leave no
/// window behind. Results of fetches that were invalidated while in flight are
/// handed to their waiters but never stored.
pub struct CapacityCache {
    backend: Arc<dyn Backend>,
    shared: Arc<CacheShared>,
    include_overtime: bool,
}

impl CapacityCache {
    pub fn new(backend: Arc<dyn Backend>, include_overtime: bool) -> Self {
        Self {
            backend,
            shared: Arc::new(CacheShared {
                windows: DashMap::new(),
                generations: DashMap::new(),
                epoch: AtomicU64::new(0),
                next_fetch_id: AtomicU64::new(0),
            }),
            include_overtime,
        }
    }

    pub async fn request(&self, entity_id: EntityId, range: DateRange) -> Records {
        if range.is_inverted() {
            debug!("capacity request for {entity_id} with inverted range, skipping fetch");
            return Records::default();
        }
        if range.days() > MAX_QUERY_WINDOW_DAYS {
            warn!("capacity request for {entity_id} spans {} days, skipping fetch", range.days());
            return Records::default();
        }

        for _ in 0..=MAX_STALE_REFETCHES {
            let tag = self.shared.tag(entity_id);
            let plan = match self.shared.windows.entry(entity_id) {
                Entry::Occupied(mut entry) => {
                    let window = entry.get();
                    let join = match &window.state {
                        WindowState::Ready(records) if window.range == range => {
                            metrics::counter!(CACHE_REQUESTS_TOTAL, "outcome" => "hit").increment(1);
                            return records.clone();
                        }
                        WindowState::Ready(_) => None,
                        WindowState::Loading { tag: loading_tag, fetch, .. } => Some(Plan::Join {
                            fetch: fetch.clone(),
                            reusable: *loading_tag == tag && window.range == range,
                        }),
                    };
                    match join {
                        Some(plan) => plan,
                        None => {
                            let (state, fetch) = self.start_fetch(entity_id, range, tag);
                            entry.insert(CacheWindow { range, state });
                            Plan::Lead(fetch)
                        }
                    }
                }
                Entry::Vacant(entry) => {
                    let (state, fetch) = self.start_fetch(entity_id, range, tag);
                    entry.insert(CacheWindow { range, state });
                    Plan::Lead(fetch)
                }
            };
            metrics::gauge!(CACHED_WINDOWS).set(self.shared.windows.len() as f64);

            match plan {
                Plan::Lead(fetch) => {
                    metrics::counter!(CACHE_REQUESTS_TOTAL, "outcome" => "miss").increment(1);
                    return fetch.await;
                }
                Plan::Join { fetch, reusable } => {
                    metrics::counter!(CACHE_REQUESTS_TOTAL, "outcome" => "joined").increment(1);
                    let records = fetch.await;
                    if reusable {
                        return records;
                    }
                    debug!("in-flight fetch for {entity_id} was stale or for another range, re-requesting");
                }
            }
        }

        warn!("capacity for {entity_id} kept being invalidated, giving up");
        Records::default()
    }

    /// Spawn the backend fetch and return its Loading state plus the shared handle.
    /// Must not touch `windows` synchronously: the caller holds an entry lock.
    fn start_fetch(&self, entity_id: EntityId, range: DateRange, tag: Tag) -> (WindowState, FetchFuture) {
        let fetch_id = self.shared.next_fetch_id.fetch_add(1, Ordering::SeqCst);
        let backend = self.backend.clone();
        let shared = self.shared.clone();
        let include_overtime = self.include_overtime;

        debug!("fetching capacity for {entity_id} [{}, {}]", range.start, range.end);
        let task = tokio::spawn(async move {
            let result = observability::timed(
                BackendOp::FetchAllocations,
                backend.fetch_allocations(entity_id, range.start, range.end, include_overtime),
            )
            .await;
            let (records, failed) = match result {
                Ok(records) => (Arc::new(records), false),
                Err(e) => {
                    warn!("capacity fetch for {entity_id} failed, treating as unknown: {e}");
                    (Records::default(), true)
                }
            };
            settle_fetch(&shared, entity_id, fetch_id, tag, &records, failed);
            records
        });

        let fetch = task
            .map(|joined| joined.unwrap_or_default())
            .boxed()
            .shared();
        let state = WindowState::Loading {
            fetch_id,
            tag,
            fetch: fetch.clone(),
        };
        (state, fetch)
    }

    /// Drop the window of one entity, or every window when `entity_id` is `None`.
    /// In-flight fetches stay registered but their results will not be stored.
    pub fn invalidate(&self, entity_id: Option<EntityId>) {
        match entity_id {
            Some(id) => {
                *self.shared.generations.entry(id).or_insert(0) += 1;
                self.shared
                    .windows
                    .remove_if(&id, |_, w| matches!(w.state, WindowState::Ready(_)));
                debug!("invalidated capacity for {id}");
            }
            None => {
                self.shared.epoch.fetch_add(1, Ordering::SeqCst);
                self.shared
                    .windows
                    .retain(|_, w| matches!(w.state, WindowState::Loading { .. }));
                debug!("invalidated all capacity windows");
            }
        }
        metrics::gauge!(CACHED_WINDOWS).set(self.shared.windows.len() as f64);
    }

    /// The ready window for an entity, without fetching.
    pub fn cached(&self, entity_id: EntityId) -> Option<(DateRange, Records)> {
        self.shared.windows.get(&entity_id).and_then(|w| match &w.state {
            WindowState::Ready(records) => Some((w.range, records.clone())),
            WindowState::Loading { .. } => None,
        })
    }

    pub fn is_loading(&self, entity_id: EntityId) -> bool {
        self.shared
            .windows
            .get(&entity_id)
            .is_some_and(|w| matches!(w.state, WindowState::Loading { .. }))
    }

    pub fn window_count(&self) -> usize {
        self.shared.windows.len()
    }
}

/// Store or discard a finished fetch. Only the fetch that owns the Loading
/// window may replace it.
fn settle_fetch(
    shared: &CacheShared,
    entity_id: EntityId,
    fetch_id: u64,
    tag: Tag,
    records: &Records,
    failed: bool,
) {
    let current = shared.tag(entity_id);
    if let Entry::Occupied(mut entry) = shared.windows.entry(entity_id) {
        let owned = matches!(
            entry.get().state,
            WindowState::Loading { fetch_id: id, .. } if id == fetch_id
        );
        if !owned {
            return;
        }
        if failed {
            entry.remove();
        } else if current != tag {
            debug!("discarding stale capacity fetch for {entity_id}");
            metrics::counter!(STALE_FETCHES_DISCARDED_TOTAL).increment(1);
            entry.remove();
        } else {
            entry.get_mut().state = WindowState::Ready(records.clone());
        }
    }
}
