//! The datasource the grid widget talks to.
//!
//! A [`DataView`] owns one collection's query state (sort, filter, visible
//! window) and its [`WindowCache`]. The grid asks for row ranges through
//! [`DataView::request_rows`]; answers go to the [`GridSink`] and back to the
//! caller. Purges come from three places: query edits ([`DataView::set_sort`],
//! [`DataView::set_filter`]), [`crate::ViewControls`], and the push channel via
//! [`crate::InvalidationTarget`].
//!
//! Lock order is view state, then cache. Neither lock is held across an await.

use std::collections::HashMap;
use std::num::{NonZeroU64, NonZeroUsize};
use std::ops::Range;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use fleetgrid_types::{Collection, FilterSpec, Row, Signature, SortSpec};
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::cache::{BlockKey, WindowCache};
use crate::config::ConsoleConfig;
use crate::error::ClientError;
use crate::fetcher::{BlockFetch, RangeFetcher};
use crate::invalidation::InvalidationTarget;
use crate::translate;

/// Receives what the view has to show.
///
/// Called with the view's state lock held, so implementations must not call
/// back into the view synchronously.
pub trait GridSink: Send + Sync {
    /// `rows` covers `range` from its start; it is shorter at the end of the collection.
    fn rows_loaded(&self, range: Range<u64>, rows: &[Row], last_row: Option<u64>);
    fn rows_failed(&self, range: Range<u64>, error: &ClientError);
    /// Move the grid's scroll position.
    fn scroll_to(&self, index: u64);
}

/// A sink that drops everything, for headless use.
pub struct NullSink;

impl GridSink for NullSink {
    fn rows_loaded(&self, _: Range<u64>, _: &[Row], _: Option<u64>) {}
    fn rows_failed(&self, _: Range<u64>, _: &ClientError) {}
    fn scroll_to(&self, _: u64) {}
}

/// Told when the view's sort/filter signature is about to change.
pub trait ViewObserver: Send + Sync {
    fn signature_changed(&self, collection: Collection);
}

/// Derived per-block state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockPhase {
    Idle,
    Fetching,
    Ready,
    Failed,
}

/// What a range request produced.
#[derive(Debug, Clone)]
pub enum RowsOutcome {
    Ready { rows: Vec<Row>, last_row: Option<u64> },
    Failed(ClientError),
    /// The view was purged before the answer arrived; nothing was delivered.
    Discarded,
}

impl RowsOutcome {
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Self::Ready { rows, .. } => Some(rows),
            _ => None,
        }
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, Self::Discarded)
    }
}

struct ViewState {
    sort: SortSpec,
    filter: FilterSpec,
    viewport: Range<u64>,
    /// Block → generation in which its last fetch failed.
    failed: HashMap<BlockKey, u64>,
    observers: Vec<Weak<dyn ViewObserver>>,
}

pub struct DataView {
    collection: Collection,
    fetcher: RangeFetcher,
    cache: Arc<Mutex<WindowCache>>,
    state: Mutex<ViewState>,
    sink: Arc<dyn GridSink>,
}

impl DataView {
    /// Mount a view over `collection` with its default sort and no filter.
    pub fn new(
        collection: Collection,
        backend: Arc<dyn Backend>,
        sink: Arc<dyn GridSink>,
        block_size: NonZeroU64,
        max_blocks: NonZeroUsize,
    ) -> Arc<Self> {
        let sort = collection.default_sort();
        let filter = FilterSpec::new();
        let cache = Arc::new(Mutex::new(WindowCache::new(
            block_size,
            max_blocks,
            translate::signature(&sort, &filter),
        )));
        info!(%collection, block_size, max_blocks, "view mounted");
        Arc::new(Self {
            collection,
            fetcher: RangeFetcher::new(backend, collection, cache.clone()),
            cache,
            state: Mutex::new(ViewState {
                sort,
                filter,
                viewport: 0..block_size.get(),
                failed: HashMap::new(),
                observers: Vec::new(),
            }),
            sink,
        })
    }

    pub fn from_config(
        collection: Collection,
        backend: Arc<dyn Backend>,
        sink: Arc<dyn GridSink>,
        config: &ConsoleConfig,
    ) -> Arc<Self> {
        let block_size = NonZeroU64::new(config.block_size).unwrap_or(NonZeroU64::MIN);
        let max_blocks = NonZeroUsize::new(config.max_blocks).unwrap_or(NonZeroUsize::MIN);
        Self::new(collection, backend, sink, block_size, max_blocks)
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        self.fetcher.backend()
    }

    pub fn block_size(&self) -> u64 {
        self.cache.lock().block_size()
    }

    pub fn generation(&self) -> u64 {
        self.cache.lock().generation()
    }

    pub fn signature(&self) -> Signature {
        self.cache.lock().signature().clone()
    }

    pub fn sort(&self) -> SortSpec {
        self.state.lock().sort.clone()
    }

    pub fn filter(&self) -> FilterSpec {
        self.state.lock().filter.clone()
    }

    pub fn viewport(&self) -> Range<u64> {
        self.state.lock().viewport.clone()
    }

    /// Record the window the grid currently shows.
    pub fn set_viewport(&self, range: Range<u64>) {
        self.state.lock().viewport = range;
    }

    /// Number of cached blocks.
    pub fn cached_blocks(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn add_observer(&self, observer: Weak<dyn ViewObserver>) {
        self.state.lock().observers.push(observer);
    }

    pub fn block_phase(&self, key: BlockKey) -> BlockPhase {
        let state = self.state.lock();
        let cache = self.cache.lock();
        if cache.peek_block(key).is_some() {
            BlockPhase::Ready
        } else if cache.is_in_flight(key) {
            BlockPhase::Fetching
        } else if state.failed.get(&key) == Some(&cache.generation()) {
            BlockPhase::Failed
        } else {
            BlockPhase::Idle
        }
    }

    /// Serve `range` to the grid.
    pub async fn request_rows(&self, range: Range<u64>) -> RowsOutcome {
        let (sort, filter, generation, block_size) = {
            let state = self.state.lock();
            let cache = self.cache.lock();
            (state.sort.clone(), state.filter.clone(), cache.generation(), cache.block_size())
        };

        let keys = BlockKey::covering(range.clone(), block_size);
        let fetches = keys
            .iter()
            .map(|key| self.fetcher.fetch_block(*key, &sort, &filter, generation));
        let results = join_all(fetches).await;

        let mut rows = Vec::new();
        let mut last_row = None;
        let mut failure = None;
        let mut stale = false;
        let mut failed_keys = Vec::new();
        for (key, result) in keys.iter().zip(results) {
            match result {
                BlockFetch::Ready(block) => {
                    let start = range.start.saturating_sub(key.start()) as usize;
                    let end = ((range.end - key.start()) as usize).min(block.rows.len());
                    if start < end {
                        rows.extend_from_slice(&block.rows[start..end]);
                    }
                    if let Some(total) = block.last_row.and_then(|n| u64::try_from(n).ok()) {
                        last_row = Some(total);
                    }
                }
                BlockFetch::Failed(e) => {
                    failed_keys.push(*key);
                    failure.get_or_insert(e);
                }
                BlockFetch::Stale => stale = true,
            }
        }

        let mut state = self.state.lock();
        if stale || self.cache.lock().generation() != generation {
            debug!(collection = %self.collection, ?range, generation, "range answer discarded");
            return RowsOutcome::Discarded;
        }
        for key in &keys {
            state.failed.remove(key);
        }
        match failure {
            Some(error) => {
                for key in failed_keys {
                    state.failed.insert(key, generation);
                }
                warn!(collection = %self.collection, ?range, %error, "rows failed");
                self.sink.rows_failed(range, &error);
                RowsOutcome::Failed(error)
            }
            None => {
                self.sink.rows_loaded(range, &rows, last_row);
                RowsOutcome::Ready { rows, last_row }
            }
        }
    }

    /// Re-request the recorded viewport.
    pub async fn refresh_visible(&self) -> RowsOutcome {
        let viewport = self.viewport();
        self.request_rows(viewport).await
    }

    /// Drop every cached block and start a new generation.
    pub fn purge(&self) -> u64 {
        let _state = self.state.lock();
        self.cache.lock().purge_all()
    }

    /// Purge and refetch the current window, keeping the scroll position.
    pub async fn purge_and_refetch(&self) -> RowsOutcome {
        self.purge();
        self.refresh_visible().await
    }

    /// Grid-initiated sort change.
    pub async fn set_sort(&self, sort: SortSpec) -> RowsOutcome {
        self.update_query(|slot, _| *slot = sort);
        self.restart_from_top().await
    }

    /// Grid-initiated filter change.
    pub async fn set_filter(&self, filter: FilterSpec) -> RowsOutcome {
        self.update_query(|_, slot| *slot = filter);
        self.restart_from_top().await
    }

    /// Replace sort and filter without requesting rows. The caller re-requests
    /// whatever range it wants next.
    pub fn replace_query(&self, sort: SortSpec, filter: FilterSpec) {
        self.update_query(|sort_slot, filter_slot| {
            *sort_slot = sort;
            *filter_slot = filter;
        });
    }

    /// Edit sort and/or filter and purge in one step.
    ///
    /// Observers hear about a signature change before the purge. The purge
    /// happens even when the signature is unchanged.
    pub(crate) fn update_query(&self, edit: impl FnOnce(&mut SortSpec, &mut FilterSpec)) {
        let mut state = self.state.lock();
        let state = &mut *state;
        edit(&mut state.sort, &mut state.filter);
        let signature = translate::signature(&state.sort, &state.filter);

        let mut cache = self.cache.lock();
        if *cache.signature() != signature {
            state.observers.retain(|o| o.strong_count() > 0);
            for observer in state.observers.iter().filter_map(Weak::upgrade) {
                observer.signature_changed(self.collection);
            }
            debug!(collection = %self.collection, %signature, "query signature changed");
        }
        cache.reset(signature);
        state.failed.clear();
    }

    /// Scroll the grid to row 0 and request the window from there.
    pub(crate) async fn restart_from_top(&self) -> RowsOutcome {
        let viewport = {
            let mut state = self.state.lock();
            let len = state.viewport.end - state.viewport.start;
            state.viewport = 0..len;
            self.sink.scroll_to(0);
            state.viewport.clone()
        };
        self.request_rows(viewport).await
    }
}

#[async_trait]
impl InvalidationTarget for DataView {
    async fn invalidate(&self) {
        self.purge_and_refetch().await;
    }
}
