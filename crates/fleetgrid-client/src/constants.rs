//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default API base for local development.
pub const DEFAULT_API_BASE: &str = "http://localhost:8080";

/// Rows per cached block (the grid's `cacheBlockSize`).
pub const DEFAULT_BLOCK_SIZE: u64 = 50;

/// Blocks kept per view before LRU eviction (the grid's `maxBlocksInCache`).
pub const DEFAULT_MAX_BLOCKS: usize = 2;

/// Per-request timeout enforced by the HTTP transport. Range fetches have no
/// timeout of their own beyond this.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// First reconnect delay for the push channel, and the value it resets to
/// after a successful open.
pub const PUSH_BACKOFF_INITIAL: Duration = Duration::from_millis(1000);

/// Reconnect delay ceiling.
pub const PUSH_BACKOFF_MAX: Duration = Duration::from_millis(10_000);

/// Notifications closer together than this collapse into one purge + refetch.
pub const PUSH_COALESCE_WINDOW: Duration = Duration::from_millis(100);

/// The only push payload the server sends.
pub const REFRESH_TOKEN: &str = "refresh";

/// Error `code` that marks a delete refused by a reference constraint.
pub const FK_CONSTRAINT_CODE: &str = "FK_CONSTRAINT";

/// Default page size for replacement-owner search.
pub const PERSON_SEARCH_LIMIT: u32 = 20;
