//! Block-addressed cache of fetched row ranges.
//!
//! # Invariants
//!
//! - Every cached [`Block`] was fetched under the current [`Signature`]; changing
//!   the signature purges first ([`WindowCache::reset`]).
//! - Every cached block carries the current generation. [`WindowCache::purge_all`]
//!   bumps the generation, so results of fetches issued before the purge are
//!   rejected when they arrive.
//! - At most `max_blocks` blocks are held; inserting past that evicts the least
//!   recently used one.
//! - At most one fetch per [`BlockKey`] is outstanding per generation. Later
//!   requests for the same block attach to it via [`FetchTicket::Follow`].
//!
//! The cache is a plain data structure: callers hold it behind a mutex and never
//! keep the lock across an await.

use std::collections::HashMap;
use std::num::{NonZeroU64, NonZeroUsize};
use std::ops::Range;
use std::sync::Arc;

use fleetgrid_types::{QueryResponse, Row, Signature};
use lru::LruCache;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::ClientError;

/// Start row of a block. Blocks are aligned to the cache's block size.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BlockKey(u64);

impl BlockKey {
    /// The block holding `row`.
    pub fn containing(row: u64, block_size: u64) -> Self {
        Self(row - row % block_size)
    }

    pub fn start(self) -> u64 {
        self.0
    }

    pub fn range(self, block_size: u64) -> Range<u64> {
        self.0..self.0.saturating_add(block_size)
    }

    /// Blocks overlapping `range`, in row order.
    pub fn covering(range: Range<u64>, block_size: u64) -> Vec<BlockKey> {
        if range.is_empty() {
            return Vec::new();
        }
        let first = Self::containing(range.start, block_size).0;
        (first..range.end).step_by(block_size as usize).map(BlockKey).collect()
    }
}

/// A cached contiguous row range.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub key: BlockKey,
    pub rows: Vec<Row>,
    /// Total row count reported alongside this block, if known.
    pub last_row: Option<i64>,
    pub signature: Signature,
    pub generation: u64,
}

/// Result of a completed block fetch, shared with every coalesced requester.
#[derive(Debug, Clone)]
pub enum BlockOutcome {
    Ready(Arc<Block>),
    Failed(ClientError),
}

/// What a requester must do for a block that is not cached.
#[derive(Debug)]
pub enum FetchTicket {
    /// Issue the network call, then report back with [`WindowCache::finish_fetch`].
    Lead { generation: u64 },
    /// Someone else is fetching; wait for their outcome. A closed receiver means
    /// the cache was purged meanwhile or the leader gave up without an answer.
    Follow(oneshot::Receiver<BlockOutcome>),
}

pub struct WindowCache {
    blocks: LruCache<BlockKey, Arc<Block>>,
    in_flight: HashMap<BlockKey, Vec<oneshot::Sender<BlockOutcome>>>,
    generation: u64,
    signature: Signature,
    block_size: u64,
}

impl WindowCache {
    pub fn new(block_size: NonZeroU64, max_blocks: NonZeroUsize, signature: Signature) -> Self {
        Self {
            blocks: LruCache::new(max_blocks),
            in_flight: HashMap::new(),
            generation: 0,
            signature,
            block_size: block_size.get(),
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.blocks.cap().get()
    }

    /// Cached block for `key`, marking it most recently used.
    pub fn get_block(&mut self, key: BlockKey) -> Option<Arc<Block>> {
        self.blocks.get(&key).cloned()
    }

    /// Cached block for `key` without touching recency.
    pub fn peek_block(&self, key: BlockKey) -> Option<&Arc<Block>> {
        self.blocks.peek(&key)
    }

    /// Keys currently cached, most recently used first.
    pub fn keys(&self) -> Vec<BlockKey> {
        self.blocks.iter().map(|(k, _)| *k).collect()
    }

    /// Admit a block fetched under `generation`.
    ///
    /// Returns `None` without touching the cache when `generation` is older than
    /// the current one.
    pub fn put_block(
        &mut self,
        key: BlockKey,
        rows: Vec<Row>,
        last_row: Option<i64>,
        generation: u64,
    ) -> Option<Arc<Block>> {
        if generation < self.generation {
            debug!(
                block = key.start(),
                generation,
                current = self.generation,
                "rejecting stale block"
            );
            return None;
        }
        let block = Arc::new(Block {
            key,
            rows,
            last_row,
            signature: self.signature.clone(),
            generation: self.generation,
        });
        if let Some((evicted, _)) = self.blocks.push(key, block.clone()) {
            if evicted != key {
                trace!(evicted = evicted.start(), inserted = key.start(), "evicted LRU block");
            }
        }
        Some(block)
    }

    /// Drop every block and every pending fetch, and start a new generation.
    ///
    /// Requesters waiting on a pending fetch see their receiver close.
    pub fn purge_all(&mut self) -> u64 {
        self.blocks.clear();
        self.in_flight.clear();
        self.generation += 1;
        debug!(generation = self.generation, "window cache purged");
        self.generation
    }

    /// Switch to a new signature, purging in the same step.
    pub fn reset(&mut self, signature: Signature) -> u64 {
        self.signature = signature;
        self.purge_all()
    }

    pub fn is_in_flight(&self, key: BlockKey) -> bool {
        self.in_flight.contains_key(&key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Register interest in fetching `key` under the current generation.
    pub fn begin_fetch(&mut self, key: BlockKey) -> FetchTicket {
        match self.in_flight.get_mut(&key) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                trace!(block = key.start(), waiters = waiters.len(), "attached to in-flight fetch");
                FetchTicket::Follow(rx)
            }
            None => {
                self.in_flight.insert(key, Vec::new());
                FetchTicket::Lead { generation: self.generation }
            }
        }
    }

    /// Forget the pending fetch for `key` after its leader went away without an
    /// answer. Followers see their receiver close. A no-op once the generation
    /// has moved on, since the entry then belongs to a newer fetch or to nobody.
    pub fn abandon_fetch(&mut self, key: BlockKey, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        let abandoned = self.in_flight.remove(&key).is_some();
        if abandoned {
            debug!(block = key.start(), generation, "lead fetch abandoned");
        }
        abandoned
    }

    /// Complete the lead fetch for `key` issued under `generation`.
    ///
    /// Stale completions return `None` and change nothing: the pending entry they
    /// belonged to was already discarded by the purge, and any entry now present
    /// belongs to a newer fetch. Current completions wake all followers and, on
    /// success, cache the block.
    pub fn finish_fetch(
        &mut self,
        key: BlockKey,
        generation: u64,
        result: Result<QueryResponse, ClientError>,
    ) -> Option<BlockOutcome> {
        if generation != self.generation {
            debug!(
                block = key.start(),
                generation,
                current = self.generation,
                "dropping stale fetch result"
            );
            return None;
        }
        let waiters = self.in_flight.remove(&key).unwrap_or_default();
        let outcome = match result {
            Ok(resp) => {
                let block = self.put_block(key, resp.rows, resp.last_row, generation)?;
                BlockOutcome::Ready(block)
            }
            Err(e) => BlockOutcome::Failed(e),
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        Some(outcome)
    }
}
