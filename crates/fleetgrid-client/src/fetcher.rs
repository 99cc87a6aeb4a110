//! One network query per block, coalesced through the [`WindowCache`].

use std::sync::Arc;

use fleetgrid_types::{Collection, FilterSpec, QueryContract, QueryResponse, SortSpec};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::backend::Backend;
use crate::cache::{Block, BlockKey, BlockOutcome, FetchTicket, WindowCache};
use crate::error::ClientError;
use crate::translate;

/// Result of a raw range query, checked against the cache generation.
#[derive(Debug)]
pub enum FetchOutcome {
    Rows(QueryResponse),
    Failed(ClientError),
    /// The cache was purged while the query was in flight. Nothing to deliver.
    Stale,
}

/// Result of fetching one block through the cache.
#[derive(Debug, Clone)]
pub enum BlockFetch {
    Ready(Arc<Block>),
    Failed(ClientError),
    Stale,
}

/// Issues range queries for one collection and admits their results into a
/// shared [`WindowCache`].
///
/// Never retries. Failures are handed back to the caller as they are.
#[derive(Clone)]
pub struct RangeFetcher {
    backend: Arc<dyn Backend>,
    collection: Collection,
    cache: Arc<Mutex<WindowCache>>,
}

impl RangeFetcher {
    pub fn new(backend: Arc<dyn Backend>, collection: Collection, cache: Arc<Mutex<WindowCache>>) -> Self {
        Self { backend, collection, cache }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Run `contract` and classify the result. A response that arrives after the
    /// cache moved past `generation` comes back as [`FetchOutcome::Stale`].
    pub async fn fetch(&self, contract: &QueryContract, generation: u64) -> FetchOutcome {
        let result = self.backend.query_rows(self.collection, contract).await;

        let current = self.cache.lock().generation();
        if current != generation {
            debug!(
                collection = %self.collection,
                start = contract.start_row,
                generation,
                current,
                "discarding result from purged generation"
            );
            return FetchOutcome::Stale;
        }

        match result {
            Ok(response) => FetchOutcome::Rows(response),
            Err(e) => {
                warn!(collection = %self.collection, start = contract.start_row, error = %e, "range fetch failed");
                FetchOutcome::Failed(e)
            }
        }
    }

    /// Fetch block `key` under (`sort`, `filter`), which must be the query the
    /// cache held at `generation`.
    ///
    /// Serves a cached block directly, attaches to an in-flight fetch of the same
    /// block, or leads a new one. A follower whose leader was dropped takes over
    /// the fetch itself.
    pub async fn fetch_block(
        &self,
        key: BlockKey,
        sort: &SortSpec,
        filter: &FilterSpec,
        generation: u64,
    ) -> BlockFetch {
        loop {
            let (ticket, block_size) = {
                let mut cache = self.cache.lock();
                if cache.generation() != generation {
                    return BlockFetch::Stale;
                }
                if let Some(block) = cache.get_block(key) {
                    trace!(collection = %self.collection, block = key.start(), "cache hit");
                    return BlockFetch::Ready(block);
                }
                (cache.begin_fetch(key), cache.block_size())
            };

            match ticket {
                FetchTicket::Follow(rx) => match rx.await {
                    Ok(BlockOutcome::Ready(block)) => return BlockFetch::Ready(block),
                    Ok(BlockOutcome::Failed(e)) => return BlockFetch::Failed(e),
                    // Purged or abandoned; the generation check tells which.
                    Err(_) => continue,
                },
                FetchTicket::Lead { generation } => {
                    return self.lead_block(key, sort, filter, generation, block_size).await;
                }
            }
        }
    }

    async fn lead_block(
        &self,
        key: BlockKey,
        sort: &SortSpec,
        filter: &FilterSpec,
        generation: u64,
        block_size: u64,
    ) -> BlockFetch {
        let mut guard = LeadGuard { cache: &self.cache, key, generation, armed: true };
        let contract = translate::translate(sort, filter, key.range(block_size));
        let result = match self.fetch(&contract, generation).await {
            FetchOutcome::Stale => return BlockFetch::Stale,
            FetchOutcome::Rows(response) => Ok(response),
            FetchOutcome::Failed(e) => Err(e),
        };
        guard.armed = false;
        let outcome = self.cache.lock().finish_fetch(key, generation, result);
        match outcome {
            Some(BlockOutcome::Ready(block)) => BlockFetch::Ready(block),
            Some(BlockOutcome::Failed(e)) => BlockFetch::Failed(e),
            None => BlockFetch::Stale,
        }
    }
}

/// Releases a lead fetch's pending entry when the fetch is dropped before it
/// reports back, e.g. because the requesting task was aborted.
struct LeadGuard<'a> {
    cache: &'a Mutex<WindowCache>,
    key: BlockKey,
    generation: u64,
    armed: bool,
}

impl Drop for LeadGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.lock().abandon_fetch(self.key, self.generation);
        }
    }
}
