//! In-memory fakes for the backend, the grid, and the push transport.
//!
//! Available to this crate's tests and, with the `testing` feature, to
//! integration tests and downstream crates.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use fleetgrid_types::{Collection, PersonSummary, QueryContract, QueryResponse, RecordId, Row};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::Instant;

use crate::backend::{Backend, VehicleSelection};
use crate::error::ClientError;
use crate::push::{PushConnector, PushSocket};
use crate::view::GridSink;

pub type DeleteCall = (Collection, RecordId, Option<RecordId>);

#[derive(Default)]
struct FakeState {
    total_rows: u64,
    queries: Vec<(Collection, QueryContract)>,
    query_failures: VecDeque<ClientError>,
    hold_queries: bool,
    parked_queries: Vec<oneshot::Sender<()>>,
    deletes: Vec<DeleteCall>,
    delete_results: VecDeque<Result<(), ClientError>>,
    hold_deletes: bool,
    parked_deletes: Vec<oneshot::Sender<()>>,
    writes: Vec<(Collection, Option<RecordId>, Value)>,
    persons: Vec<PersonSummary>,
    session_expired: bool,
    selections: Vec<VehicleSelection>,
    special_failures: VecDeque<ClientError>,
    fuel_count: u64,
    min_distance: Option<Row>,
}

/// A [`Backend`] that serves `total_rows` synthetic rows (`{"id": n, "name": "row-n"}`)
/// and records every call.
///
/// Queries and deletes can be held at a gate to simulate slow responses.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    changed: Notify,
}

impl FakeBackend {
    pub fn with_rows(total_rows: u64) -> Arc<Self> {
        let backend = Self::default();
        backend.state.lock().total_rows = total_rows;
        Arc::new(backend)
    }

    /// Park every query until [`release_queries`](Self::release_queries).
    pub fn hold_queries(&self) {
        self.state.lock().hold_queries = true;
    }

    /// Let parked queries complete and stop parking new ones.
    pub fn release_queries(&self) {
        let parked = {
            let mut state = self.state.lock();
            state.hold_queries = false;
            std::mem::take(&mut state.parked_queries)
        };
        for gate in parked {
            let _ = gate.send(());
        }
    }

    pub fn fail_next_query(&self, error: ClientError) {
        self.state.lock().query_failures.push_back(error);
    }

    pub fn query_count(&self) -> usize {
        self.state.lock().queries.len()
    }

    pub fn queries(&self) -> Vec<(Collection, QueryContract)> {
        self.state.lock().queries.clone()
    }

    pub fn last_query(&self) -> Option<(Collection, QueryContract)> {
        self.state.lock().queries.last().cloned()
    }

    /// Wait until at least `n` queries have been received.
    pub async fn wait_for_queries(&self, n: usize) {
        loop {
            let notified = self.changed.notified();
            if self.query_count() >= n {
                return;
            }
            notified.await;
        }
    }

    /// Queue the outcome of the next delete. Deletes succeed once the queue is empty.
    pub fn push_delete_result(&self, result: Result<(), ClientError>) {
        self.state.lock().delete_results.push_back(result);
    }

    pub fn hold_deletes(&self) {
        self.state.lock().hold_deletes = true;
    }

    pub fn release_deletes(&self) {
        let parked = {
            let mut state = self.state.lock();
            state.hold_deletes = false;
            std::mem::take(&mut state.parked_deletes)
        };
        for gate in parked {
            let _ = gate.send(());
        }
    }

    pub fn deletes(&self) -> Vec<DeleteCall> {
        self.state.lock().deletes.clone()
    }

    pub async fn wait_for_deletes(&self, n: usize) {
        loop {
            let notified = self.changed.notified();
            if self.state.lock().deletes.len() >= n {
                return;
            }
            notified.await;
        }
    }

    /// Create/update bodies received, with the target id for updates.
    pub fn writes(&self) -> Vec<(Collection, Option<RecordId>, Value)> {
        self.state.lock().writes.clone()
    }

    pub fn set_persons(&self, persons: Vec<PersonSummary>) {
        self.state.lock().persons = persons;
    }

    pub fn expire_session(&self) {
        self.state.lock().session_expired = true;
    }

    /// Fail the next call to a `/api/vehicle/special` endpoint.
    pub fn fail_next_special(&self, error: ClientError) {
        self.state.lock().special_failures.push_back(error);
    }

    /// Preset selections received, in order.
    pub fn selections(&self) -> Vec<VehicleSelection> {
        self.state.lock().selections.clone()
    }

    pub fn set_fuel_count(&self, count: u64) {
        self.state.lock().fuel_count = count;
    }

    pub fn set_min_distance(&self, vehicle: Option<Row>) {
        self.state.lock().min_distance = vehicle;
    }

    fn special_failure(&self) -> Result<(), ClientError> {
        self.state.lock().special_failures.pop_front().map_or(Ok(()), Err)
    }

    fn page(range: Range<u64>, total: u64) -> QueryResponse {
        let rows = (range.start..range.end.min(total))
            .map(|n| Row::from(json!({"id": n, "name": format!("row-{n}")})))
            .collect();
        QueryResponse { rows, last_row: Some(total as i64) }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn query_rows(
        &self,
        collection: Collection,
        contract: &QueryContract,
    ) -> Result<QueryResponse, ClientError> {
        let (gate, failure, total) = {
            let mut state = self.state.lock();
            state.queries.push((collection, contract.clone()));
            let gate = state.hold_queries.then(|| {
                let (tx, rx) = oneshot::channel();
                state.parked_queries.push(tx);
                rx
            });
            (gate, state.query_failures.pop_front(), state.total_rows)
        };
        self.changed.notify_waiters();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(Self::page(contract.start_row..contract.end_row, total)),
        }
    }

    async fn create_record(&self, collection: Collection, body: &Value) -> Result<Value, ClientError> {
        let mut state = self.state.lock();
        state.writes.push((collection, None, body.clone()));
        let mut created = body.clone();
        if let Value::Object(fields) = &mut created {
            fields.insert("id".into(), json!(state.writes.len()));
        }
        Ok(created)
    }

    async fn update_record(
        &self,
        collection: Collection,
        id: RecordId,
        body: &Value,
    ) -> Result<Value, ClientError> {
        self.state.lock().writes.push((collection, Some(id), body.clone()));
        Ok(body.clone())
    }

    async fn delete_record(
        &self,
        collection: Collection,
        id: RecordId,
        reassign_to: Option<RecordId>,
    ) -> Result<(), ClientError> {
        let (gate, result) = {
            let mut state = self.state.lock();
            state.deletes.push((collection, id, reassign_to));
            let gate = state.hold_deletes.then(|| {
                let (tx, rx) = oneshot::channel();
                state.parked_deletes.push(tx);
                rx
            });
            (gate, state.delete_results.pop_front().unwrap_or(Ok(())))
        };
        self.changed.notify_waiters();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        result
    }

    async fn search_persons(&self, query: &str, limit: u32) -> Result<Vec<PersonSummary>, ClientError> {
        let needle = query.to_lowercase();
        Ok(self
            .state
            .lock()
            .persons
            .iter()
            .filter(|p| p.full_name.to_lowercase().contains(&needle))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn check_session(&self) -> Result<(), ClientError> {
        if self.state.lock().session_expired { Err(ClientError::Unauthorized) } else { Ok(()) }
    }

    async fn select_vehicles(&self, selection: VehicleSelection) -> Result<Value, ClientError> {
        self.state.lock().selections.push(selection);
        self.special_failure()?;
        Ok(json!([]))
    }

    async fn count_fuel_consumption_above(&self, _threshold: f64) -> Result<u64, ClientError> {
        self.special_failure()?;
        Ok(self.state.lock().fuel_count)
    }

    async fn min_distance_vehicle(&self) -> Result<Option<Row>, ClientError> {
        self.special_failure()?;
        Ok(self.state.lock().min_distance.clone())
    }
}

/// What a [`RecordingSink`] saw.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Loaded { range: Range<u64>, rows: usize, last_row: Option<u64> },
    Failed { range: Range<u64> },
    Scrolled(u64),
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }
}

impl GridSink for RecordingSink {
    fn rows_loaded(&self, range: Range<u64>, rows: &[Row], last_row: Option<u64>) {
        self.events.lock().push(SinkEvent::Loaded { range, rows: rows.len(), last_row });
    }

    fn rows_failed(&self, range: Range<u64>, _error: &ClientError) {
        self.events.lock().push(SinkEvent::Failed { range });
    }

    fn scroll_to(&self, index: u64) {
        self.events.lock().push(SinkEvent::Scrolled(index));
    }
}

enum Script {
    Accept(mpsc::UnboundedReceiver<String>),
    Refuse,
}

#[derive(Default)]
struct ConnectorState {
    scripts: VecDeque<Script>,
    attempts: Vec<Instant>,
}

/// A [`PushConnector`] that plays back scripted connection outcomes. Once the
/// script runs out every attempt is refused.
#[derive(Default)]
pub struct FakePushConnector {
    state: Mutex<ConnectorState>,
}

/// Server side of a scripted connection. Dropping it closes the socket.
pub struct PushServer {
    tx: mpsc::UnboundedSender<String>,
}

impl PushServer {
    pub fn send(&self, text: &str) {
        let _ = self.tx.send(text.to_owned());
    }
}

impl FakePushConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the next attempt to succeed.
    pub fn accept(&self) -> PushServer {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().scripts.push_back(Script::Accept(rx));
        PushServer { tx }
    }

    /// Script the next attempt to fail.
    pub fn refuse(&self) {
        self.state.lock().scripts.push_back(Script::Refuse);
    }

    /// When each connect attempt happened.
    pub fn attempts(&self) -> Vec<Instant> {
        self.state.lock().attempts.clone()
    }
}

struct FakeSocket {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl PushSocket for FakeSocket {
    async fn next_text(&mut self) -> Option<Result<String, ClientError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[async_trait]
impl PushConnector for FakePushConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn PushSocket>, ClientError> {
        let mut state = self.state.lock();
        state.attempts.push(Instant::now());
        match state.scripts.pop_front() {
            Some(Script::Accept(rx)) => Ok(Box::new(FakeSocket { rx })),
            Some(Script::Refuse) | None => Err(ClientError::network("connection refused")),
        }
    }
}
