//! Inbound trigger: submit, observe and cancel scheduling requests.
//!
//! Each accepted request gets its own tokio task running the engine. The
//! store's lease guarantees that at most one execution acts on a request,
//! across tasks and across processes sharing a store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::engine::WorkflowEngine;
use crate::error::{Result, SchedulingError};
use crate::model::{RequestStatus, SchedulingRequest, SubmitRequest, WorkflowRecord};

type Execution = JoinHandle<Result<RequestStatus>>;

pub struct SchedulingService {
    engine: Arc<WorkflowEngine>,
    executions: Mutex<HashMap<Uuid, Execution>>,
    /// Lease owner prefix for executions started by this service.
    instance: String,
}

impl SchedulingService {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self {
            engine,
            executions: Mutex::new(HashMap::new()),
            instance: format!("scheduler-{}", Uuid::new_v4()),
        }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    fn executions(&self) -> MutexGuard<'_, HashMap<Uuid, Execution>> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and persist a request, then start executing it.
    ///
    /// Invalid submissions fail with `InvalidRequest` and leave no state
    /// behind. Must be called inside a tokio runtime.
    pub async fn submit_scheduling_request(&self, submission: SubmitRequest) -> Result<Uuid> {
        let config = self.engine.config();
        let duration = submission
            .duration_minutes
            .unwrap_or(config.default_interview_duration_minutes);
        let window_days = submission.window_days.unwrap_or(config.scheduling_window_days);
        let title = submission
            .title
            .unwrap_or_else(|| "Interview".to_string());

        let request = SchedulingRequest::new(
            submission.participants,
            duration,
            window_days,
            title,
            self.engine.clock().now(),
        )?;
        let id = request.id;
        self.engine.store().create(&WorkflowRecord::new(request))?;
        tracing::info!(request_id = %id, duration, window_days, "Scheduling request accepted");

        self.start_execution(id)?;
        Ok(id)
    }

    /// Spawn an execution for `id` unless this service already runs one.
    ///
    /// Finished executions nobody awaited are dropped here; their outcome
    /// stays readable through the store.
    pub fn start_execution(&self, id: Uuid) -> Result<()> {
        let mut executions = self.executions();
        if executions.get(&id).is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        executions.retain(|_, h| !h.is_finished());
        let engine = Arc::clone(&self.engine);
        let owner = format!("{}/{}", self.instance, Uuid::new_v4());
        let handle = tokio::spawn(async move { engine.execute(id, &owner).await });
        executions.insert(id, handle);
        Ok(())
    }

    /// Wait for this service's execution of `id` to end, then report the
    /// stored status.
    pub async fn await_completion(&self, id: Uuid) -> Result<RequestStatus> {
        let handle = self.executions().remove(&id);
        if let Some(handle) = handle {
            match handle.await {
                Ok(result) => {
                    result?;
                }
                Err(join_error) => {
                    tracing::error!(request_id = %id, error = %join_error, "Execution task aborted");
                }
            }
        }
        self.get_request_status(id)
    }

    /// Executions still running in this service.
    pub fn running_executions(&self) -> usize {
        self.executions().values().filter(|h| !h.is_finished()).count()
    }

    /// Executions whose handles this service still holds, finished or not.
    pub fn tracked_executions(&self) -> usize {
        self.executions().len()
    }

    pub fn get_request_status(&self, id: Uuid) -> Result<RequestStatus> {
        Ok(self.get_record(id)?.request.status)
    }

    /// The full record, history included.
    pub fn get_record(&self, id: Uuid) -> Result<WorkflowRecord> {
        self.engine
            .store()
            .load(id)?
            .ok_or(SchedulingError::NotFound(id))
    }

    /// Signal cancellation. The running execution (here or in another
    /// process) picks it up at its next transition; if none is running here,
    /// one is started to carry out the rollback.
    pub fn cancel_request(&self, id: Uuid) -> Result<()> {
        let record = self.get_record(id)?;
        if record.is_terminal() {
            return Err(SchedulingError::Terminal {
                id,
                status: record.status().label().to_string(),
            });
        }
        self.engine.store().request_cancel(id)?;
        tracing::info!(request_id = %id, "Cancellation requested");
        self.start_execution(id)
    }

    /// Start executions for every non-terminal request in the store.
    pub fn resume_pending(&self) -> Result<Vec<Uuid>> {
        let mut resumed = Vec::new();
        for record in self.engine.store().list()? {
            if record.is_terminal() {
                continue;
            }
            tracing::info!(
                request_id = %record.id(),
                state = record.status().label(),
                "Resuming request"
            );
            self.start_execution(record.id())?;
            resumed.push(record.id());
        }
        Ok(resumed)
    }
}
