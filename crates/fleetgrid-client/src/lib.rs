//! Windowed data-view synchronization for the fleet console.
//!
//! A [`DataView`] keeps one server-held collection consistent with the rows a
//! grid shows: range requests go through a bounded block cache, sort/filter
//! edits and push notifications purge it, and every fetch result is checked
//! against the cache generation before it can be shown. [`ViewControls`]
//! exposes the console's toolbar operations and [`ReassignmentWorkflow`]
//! handles deletes blocked by references.
//!
//! ```ignore
//! let backend = Arc::new(HttpBackend::from_config(&config)?);
//! let view = DataView::from_config(Collection::Vehicles, backend, sink, &config);
//! let push = InvalidationChannel::spawn(
//!     Arc::new(WsConnector),
//!     Collection::Vehicles.push_url(&config.api_base)?,
//!     view.clone(),
//!     ChannelOptions::from(&config),
//! );
//! view.request_rows(0..50).await;
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod constants;
pub mod controls;
pub mod error;
pub mod fetcher;
pub mod invalidation;
pub mod push;
pub mod reassign;
pub mod translate;
pub mod view;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{Backend, HttpBackend, VehicleSelection};
pub use cache::{Block, BlockKey, WindowCache};
pub use config::{ConfigError, ConsoleConfig};
pub use controls::{PresetError, ViewControls};
pub use error::ClientError;
pub use fetcher::{BlockFetch, FetchOutcome, RangeFetcher};
pub use invalidation::{
    Backoff, ChannelHandle, ChannelOptions, ChannelState, ChannelStatus, ConnectionState,
    InvalidationChannel, InvalidationTarget,
};
pub use push::{PushConnector, PushSocket, WsConnector};
pub use reassign::{ReassignmentContext, ReassignmentWorkflow, WorkflowError, WorkflowState};
pub use view::{BlockPhase, DataView, GridSink, NullSink, RowsOutcome, ViewObserver};
