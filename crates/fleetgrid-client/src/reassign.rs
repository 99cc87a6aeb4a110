//! Delete-with-reassignment for referenced owners.
//!
//! Deleting a person that vehicles still point at comes back as a reference
//! conflict. The workflow then holds a [`ReassignmentContext`] until the user
//! picks a replacement owner and confirms, or cancels.
//!
//! ```text
//! Idle ──delete──▶ Deleting ──ok──▶ Deleted
//!                     │
//!                     └─conflict─▶ ConflictNeedsReassign ──confirm──▶ Reassigning ──ok──▶ Deleted
//!                                        ▲                                 │
//!                                        └──────────────error──────────────┘
//! ```
//!
//! Cancelling from any non-terminal state returns to `Idle`. A response that
//! arrives after a cancel does not move the state.

use std::sync::Arc;

use fleetgrid_types::{Collection, PersonSummary, RecordId};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants;
use crate::controls::ViewControls;
use crate::error::ClientError;
use crate::view::ViewObserver;

#[derive(Debug, Clone, PartialEq)]
pub struct ReassignmentContext {
    pub subject_id: RecordId,
    /// Dependent records the server reported.
    pub blocking_ref_count: u64,
    pub replacement_candidate: Option<RecordId>,
    /// Error from the last reassigning delete, kept for display.
    pub last_error: Option<ClientError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    Idle,
    Deleting { subject: RecordId },
    Deleted { subject: RecordId },
    ConflictNeedsReassign(ReassignmentContext),
    Reassigning(ReassignmentContext),
}

impl WorkflowState {
    pub fn context(&self) -> Option<&ReassignmentContext> {
        match self {
            Self::ConflictNeedsReassign(ctx) | Self::Reassigning(ctx) => Some(ctx),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Deleting { .. } => "deleting",
            Self::Deleted { .. } => "deleted",
            Self::ConflictNeedsReassign(_) => "conflict",
            Self::Reassigning(_) => "reassigning",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum WorkflowError {
    #[error("record {0} cannot replace itself")]
    SelfReassignment(RecordId),
    #[error("no replacement selected")]
    NoCandidate,
    #[error("{operation} not allowed while {state}")]
    InvalidState { operation: &'static str, state: &'static str },
    #[error("workflow was cancelled while the request was in flight")]
    Cancelled,
    #[error(transparent)]
    Request(#[from] ClientError),
}

struct Machine {
    state: WorkflowState,
    /// Bumped on cancel so in-flight responses can tell they are orphaned.
    epoch: u64,
}

impl Machine {
    fn cancel(&mut self) -> bool {
        match self.state {
            WorkflowState::Deleting { .. }
            | WorkflowState::ConflictNeedsReassign(_)
            | WorkflowState::Reassigning(_) => {
                self.state = WorkflowState::Idle;
                self.epoch += 1;
                true
            }
            WorkflowState::Idle | WorkflowState::Deleted { .. } => false,
        }
    }
}

pub struct ReassignmentWorkflow {
    /// The view whose records are being deleted.
    owner: ViewControls,
    /// Views that hold references to the owner's records.
    dependents: Vec<ViewControls>,
    machine: Mutex<Machine>,
}

impl ReassignmentWorkflow {
    /// Build the workflow and register it to be cancelled when the owner
    /// view's sort or filter changes.
    pub fn new(owner: ViewControls, dependents: Vec<ViewControls>) -> Arc<Self> {
        let workflow = Arc::new(Self {
            owner,
            dependents,
            machine: Mutex::new(Machine { state: WorkflowState::Idle, epoch: 0 }),
        });
        let observer: std::sync::Weak<dyn ViewObserver> = Arc::downgrade(&workflow) as _;
        workflow.owner.view().add_observer(observer);
        workflow
    }

    fn collection(&self) -> Collection {
        self.owner.view().collection()
    }

    pub fn state(&self) -> WorkflowState {
        self.machine.lock().state.clone()
    }

    pub fn context(&self) -> Option<ReassignmentContext> {
        self.machine.lock().state.context().cloned()
    }

    /// Try a plain delete of `subject`.
    pub async fn delete(&self, subject: RecordId) -> Result<WorkflowState, WorkflowError> {
        let epoch = {
            let mut machine = self.machine.lock();
            match machine.state {
                WorkflowState::Idle | WorkflowState::Deleted { .. } => {}
                ref other => {
                    return Err(WorkflowError::InvalidState { operation: "delete", state: other.name() });
                }
            }
            machine.state = WorkflowState::Deleting { subject };
            machine.epoch
        };
        info!(collection = %self.collection(), %subject, "deleting");

        let result = self.owner.view().backend().delete_record(self.collection(), subject, None).await;

        let next = {
            let mut machine = self.machine.lock();
            if machine.epoch == epoch {
                machine.state = match &result {
                    Ok(()) => WorkflowState::Deleted { subject },
                    Err(ClientError::Conflict { ref_count, .. }) => {
                        info!(%subject, ref_count, "delete blocked by references");
                        WorkflowState::ConflictNeedsReassign(ReassignmentContext {
                            subject_id: subject,
                            blocking_ref_count: *ref_count,
                            replacement_candidate: None,
                            last_error: None,
                        })
                    }
                    Err(_) => WorkflowState::Idle,
                };
                Some(machine.state.clone())
            } else {
                None
            }
        };
        let Some(next) = next else {
            return self.orphaned(result).await;
        };

        match result {
            Ok(()) => {
                self.refresh_views().await;
                Ok(next)
            }
            Err(ClientError::Conflict { .. }) => Ok(next),
            Err(e) => {
                warn!(%subject, error = %e, "delete failed");
                Err(e.into())
            }
        }
    }

    /// Record the chosen replacement owner.
    pub fn select_replacement(&self, candidate: RecordId) -> Result<(), WorkflowError> {
        let mut machine = self.machine.lock();
        let state = machine.state.name();
        match &mut machine.state {
            WorkflowState::ConflictNeedsReassign(ctx) if candidate == ctx.subject_id => {
                Err(WorkflowError::SelfReassignment(candidate))
            }
            WorkflowState::ConflictNeedsReassign(ctx) => {
                ctx.replacement_candidate = Some(candidate);
                Ok(())
            }
            _ => Err(WorkflowError::InvalidState { operation: "select replacement", state }),
        }
    }

    /// Delete the subject, moving its dependents to the selected replacement.
    pub async fn confirm(&self) -> Result<WorkflowState, WorkflowError> {
        let (ctx, epoch) = {
            let mut machine = self.machine.lock();
            let ctx = match &machine.state {
                WorkflowState::ConflictNeedsReassign(ctx) => ctx.clone(),
                other => return Err(WorkflowError::InvalidState { operation: "confirm", state: other.name() }),
            };
            match ctx.replacement_candidate {
                None => return Err(WorkflowError::NoCandidate),
                Some(candidate) if candidate == ctx.subject_id => {
                    return Err(WorkflowError::SelfReassignment(candidate));
                }
                Some(_) => {}
            }
            machine.state = WorkflowState::Reassigning(ctx.clone());
            (ctx, machine.epoch)
        };
        let subject = ctx.subject_id;
        let target = ctx.replacement_candidate;
        info!(collection = %self.collection(), %subject, reassign_to = ?target, "deleting with reassignment");

        let result = self.owner.view().backend().delete_record(self.collection(), subject, target).await;

        let next = {
            let mut machine = self.machine.lock();
            if machine.epoch == epoch {
                machine.state = match &result {
                    Ok(()) => WorkflowState::Deleted { subject },
                    Err(e) => {
                        let mut ctx = ctx;
                        if let Some(count) = e.conflict_ref_count() {
                            ctx.blocking_ref_count = count;
                        }
                        ctx.last_error = Some(e.clone());
                        WorkflowState::ConflictNeedsReassign(ctx)
                    }
                };
                Some(machine.state.clone())
            } else {
                None
            }
        };
        let Some(next) = next else {
            return self.orphaned(result).await;
        };

        match result {
            Ok(()) => {
                self.refresh_views().await;
                Ok(next)
            }
            Err(e) => {
                warn!(%subject, error = %e, "reassigning delete failed");
                Err(e.into())
            }
        }
    }

    /// Back to `Idle`, discarding the context. Returns whether anything was open.
    pub fn cancel(&self) -> bool {
        let cancelled = self.machine.lock().cancel();
        if cancelled {
            debug!(collection = %self.collection(), "reassignment cancelled");
        }
        cancelled
    }

    /// Replacement candidates matching `query`, excluding the subject.
    pub async fn search_candidates(&self, query: &str) -> Result<Vec<PersonSummary>, WorkflowError> {
        let subject = self.context().map(|ctx| ctx.subject_id);
        let found = self
            .owner
            .view()
            .backend()
            .search_persons(query, constants::PERSON_SEARCH_LIMIT)
            .await?;
        Ok(found.into_iter().filter(|p| Some(p.id) != subject).collect())
    }

    /// A response for a workflow that was cancelled meanwhile. A delete that went
    /// through still changed the server, so the views reload.
    async fn orphaned(&self, result: Result<(), ClientError>) -> Result<WorkflowState, WorkflowError> {
        debug!(collection = %self.collection(), succeeded = result.is_ok(), "response after cancel ignored");
        if result.is_ok() {
            self.refresh_views().await;
        }
        Err(WorkflowError::Cancelled)
    }

    async fn refresh_views(&self) {
        self.owner.refresh().await;
        for view in &self.dependents {
            view.refresh().await;
        }
    }
}

impl ViewObserver for ReassignmentWorkflow {
    fn signature_changed(&self, _collection: Collection) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::num::{NonZeroU64, NonZeroUsize};

    use super::*;
    use crate::testing::{FakeBackend, RecordingSink};
    use crate::view::DataView;
    use fleetgrid_types::{FilterSpec, NumberOp, Predicate};

    fn conflict(ref_count: u64) -> ClientError {
        ClientError::Conflict {
            code: constants::FK_CONSTRAINT_CODE.into(),
            message: "Person is referenced by vehicles".into(),
            ref_count,
        }
    }

    fn setup(backend: &Arc<FakeBackend>) -> (Arc<ReassignmentWorkflow>, ViewControls, ViewControls) {
        let mount = |collection| {
            ViewControls::new(DataView::new(
                collection,
                backend.clone(),
                RecordingSink::new(),
                NonZeroU64::new(50).unwrap(),
                NonZeroUsize::new(2).unwrap(),
            ))
        };
        let persons = mount(Collection::Persons);
        let vehicles = mount(Collection::Vehicles);
        let workflow = ReassignmentWorkflow::new(persons.clone(), vec![vehicles.clone()]);
        (workflow, persons, vehicles)
    }

    #[tokio::test]
    async fn referenced_owner_is_reassigned_then_deleted() {
        let backend = FakeBackend::with_rows(10);
        backend.push_delete_result(Err(conflict(3)));
        let (workflow, _persons, _vehicles) = setup(&backend);

        let state = workflow.delete(RecordId(7)).await.unwrap();
        let ctx = state.context().expect("conflict context");
        assert_eq!(ctx.subject_id, RecordId(7));
        assert_eq!(ctx.blocking_ref_count, 3);
        assert_eq!(backend.query_count(), 0);

        workflow.select_replacement(RecordId(9)).unwrap();
        let state = workflow.confirm().await.unwrap();
        assert_eq!(state, WorkflowState::Deleted { subject: RecordId(7) });
        assert!(workflow.context().is_none());

        assert_eq!(
            backend.deletes(),
            vec![
                (Collection::Persons, RecordId(7), None),
                (Collection::Persons, RecordId(7), Some(RecordId(9))),
            ]
        );
        let refreshed: Vec<Collection> = backend.queries().into_iter().map(|(c, _)| c).collect();
        assert!(refreshed.contains(&Collection::Vehicles));
        assert!(refreshed.contains(&Collection::Persons));
    }

    #[tokio::test]
    async fn self_reassignment_is_rejected_locally() {
        let backend = FakeBackend::with_rows(10);
        backend.push_delete_result(Err(conflict(1)));
        let (workflow, ..) = setup(&backend);
        workflow.delete(RecordId(7)).await.unwrap();

        assert_eq!(workflow.select_replacement(RecordId(7)), Err(WorkflowError::SelfReassignment(RecordId(7))));
        assert_eq!(workflow.confirm().await, Err(WorkflowError::NoCandidate));
        assert_eq!(backend.deletes().len(), 1);
    }

    #[tokio::test]
    async fn failed_reassignment_keeps_the_candidate() {
        let backend = FakeBackend::with_rows(10);
        backend.push_delete_result(Err(conflict(2)));
        backend.push_delete_result(Err(ClientError::NetworkFailure { status: Some(500), message: "boom".into() }));
        let (workflow, ..) = setup(&backend);

        workflow.delete(RecordId(4)).await.unwrap();
        workflow.select_replacement(RecordId(5)).unwrap();
        let err = workflow.confirm().await.unwrap_err();
        assert!(matches!(err, WorkflowError::Request(ClientError::NetworkFailure { status: Some(500), .. })));

        let ctx = workflow.context().expect("still in conflict");
        assert!(matches!(workflow.state(), WorkflowState::ConflictNeedsReassign(_)));
        assert_eq!(ctx.replacement_candidate, Some(RecordId(5)));
        assert!(ctx.last_error.is_some());

        // Retrying with the kept candidate succeeds.
        assert_eq!(workflow.confirm().await.unwrap(), WorkflowState::Deleted { subject: RecordId(4) });
    }

    #[tokio::test]
    async fn unreferenced_delete_goes_straight_to_deleted() {
        let backend = FakeBackend::with_rows(10);
        let (workflow, ..) = setup(&backend);
        assert_eq!(workflow.delete(RecordId(3)).await.unwrap(), WorkflowState::Deleted { subject: RecordId(3) });
        assert!(!workflow.cancel());
        // A new delete may start from the terminal state.
        assert!(workflow.delete(RecordId(4)).await.is_ok());
    }

    #[tokio::test]
    async fn unauthorized_delete_returns_to_idle() {
        let backend = FakeBackend::with_rows(10);
        backend.push_delete_result(Err(ClientError::Unauthorized));
        let (workflow, ..) = setup(&backend);
        assert_eq!(workflow.delete(RecordId(3)).await, Err(WorkflowError::Request(ClientError::Unauthorized)));
        assert_eq!(workflow.state(), WorkflowState::Idle);
    }

    #[tokio::test]
    async fn filter_change_on_owner_cancels_open_conflict() {
        let backend = FakeBackend::with_rows(10);
        backend.push_delete_result(Err(conflict(3)));
        let (workflow, persons, _) = setup(&backend);
        workflow.delete(RecordId(7)).await.unwrap();
        workflow.select_replacement(RecordId(9)).unwrap();

        persons
            .apply_filter(FilterSpec::new().with("id", Predicate::number(NumberOp::GreaterThan, 1.0)))
            .await;
        assert_eq!(workflow.state(), WorkflowState::Idle);
        assert!(matches!(workflow.confirm().await, Err(WorkflowError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn cancel_while_request_in_flight_discards_response() {
        let backend = FakeBackend::with_rows(10);
        backend.hold_deletes();
        backend.push_delete_result(Err(conflict(3)));
        let (workflow, ..) = setup(&backend);

        let task = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.delete(RecordId(7)).await })
        };
        backend.wait_for_deletes(1).await;
        assert!(workflow.cancel());
        backend.release_deletes();

        assert_eq!(task.await.unwrap(), Err(WorkflowError::Cancelled));
        assert_eq!(workflow.state(), WorkflowState::Idle);
    }

    #[tokio::test]
    async fn candidate_search_excludes_subject() {
        let backend = FakeBackend::with_rows(10);
        backend.set_persons(vec![
            PersonSummary { id: RecordId(7), full_name: "Ada".into() },
            PersonSummary { id: RecordId(9), full_name: "Adam".into() },
        ]);
        backend.push_delete_result(Err(conflict(1)));
        let (workflow, ..) = setup(&backend);
        workflow.delete(RecordId(7)).await.unwrap();

        let found = workflow.search_candidates("ad").await.unwrap();
        assert_eq!(found.iter().map(|p| p.id).collect::<Vec<_>>(), vec![RecordId(9)]);
    }
}
