//! Durable execution workflow
//!
//! Drives one execution from creation to a terminal state:
//! create → mark running → prepare → run container → reconcile → cleanup.
//! Activities run under a retry policy with per-activity deadlines; the
//! container step is additionally heartbeat-monitored. The execution id is
//! minted by the caller, so re-running the workflow after a crash resumes
//! idempotently instead of double-executing.

use crate::activities::{Activities, Prepared};
use crate::heartbeat::Heartbeat;
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use sluice_core::ExecutionStatus;
use sluice_storage::TenantId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Workflow input. `execution_id` is minted by the caller so that retried
/// scheduling cannot double-execute.
#[derive(Debug, Clone)]
pub struct ExecutionParams {
    pub tenant_id: TenantId,
    pub execution_id: Uuid,
    pub job_definition_id: Uuid,
}

/// Per-activity deadlines.
#[derive(Debug, Clone, Copy)]
pub struct ActivityOptions {
    /// Overall deadline for one activity attempt.
    pub start_to_close: Duration,
    /// Maximum silence between heartbeats on monitored activities.
    pub heartbeat_timeout: Duration,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close: Duration::from_secs(300),
            heartbeat_timeout: Duration::from_secs(30),
        }
    }
}

/// The durable execution workflow.
pub struct ExecutionWorkflow {
    activities: Arc<Activities>,
    retry_policy: RetryPolicy,
    options: ActivityOptions,
}

impl ExecutionWorkflow {
    pub fn new(activities: Arc<Activities>) -> Self {
        Self {
            activities,
            retry_policy: RetryPolicy::default(),
            options: ActivityOptions::default(),
        }
    }

    pub fn with_options(
        activities: Arc<Activities>,
        retry_policy: RetryPolicy,
        options: ActivityOptions,
    ) -> Self {
        Self {
            activities,
            retry_policy,
            options,
        }
    }

    /// Run the workflow to completion.
    ///
    /// Failures in prepare, container, or reconcile are recorded on the
    /// execution row before being re-raised; cancellation is propagated
    /// as-is and never rewritten as a failure. The temp-file cleanup runs
    /// on a detached task so it survives cancellation.
    #[instrument(
        skip(self, cancel),
        fields(
            tenant_id = %params.tenant_id,
            execution_id = %params.execution_id,
            job_definition_id = %params.job_definition_id,
        )
    )]
    pub async fn run(&self, params: ExecutionParams, cancel: CancellationToken) -> Result<()> {
        info!("Starting execution workflow");

        // Step 1: create the pending row (replay-safe on duplicate id).
        let execution = self
            .execute("create-execution", || {
                self.activities.create_execution(&params)
            })
            .await?;

        // A terminal row means a previous incarnation of this workflow
        // already finished; resuming is a no-op.
        if let Ok(status) = ExecutionStatus::parse(&execution.status) {
            if status.is_terminal() {
                info!(status = %status, "Execution already terminal, nothing to resume");
                return Ok(());
            }
        }

        // Step 2: mark running.
        self.execute("mark-running", || self.activities.mark_running(&params))
            .await?;

        // Step 3: prepare the isolated runtime.
        let prepared = match self
            .execute("prepare", || self.activities.prepare(&params))
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => {
                if e != Error::Cancelled {
                    self.activities
                        .record_failure(
                            &params,
                            &format!("Failed to prepare execution: {e}"),
                            None,
                        )
                        .await;
                }
                return Err(e);
            }
        };

        let result = self.run_and_reconcile(&params, &prepared, cancel).await;

        // Step 6: cleanup on a detached task so it runs to completion even
        // when this future is being torn down by cancellation.
        let activities = self.activities.clone();
        let config_path = prepared.config_path.clone();
        let cleanup = tokio::spawn(async move {
            if let Err(e) = activities.cleanup(&config_path).await {
                warn!(error = %e, "Failed to clean up temp config file");
            }
        });
        let _ = cleanup.await;

        if result.is_ok() {
            info!("Execution workflow completed");
        }
        result
    }

    /// Steps 4 and 5.
    async fn run_and_reconcile(
        &self,
        params: &ExecutionParams,
        prepared: &Prepared,
        cancel: CancellationToken,
    ) -> Result<()> {
        let output = match self.run_container_step(prepared, cancel).await {
            Ok(output) => output,
            Err(e) => {
                if e != Error::Cancelled {
                    self.activities
                        .record_failure(
                            params,
                            &format!("Failed to run execution container: {e}"),
                            None,
                        )
                        .await;
                }
                return Err(e);
            }
        };

        match self
            .execute("reconcile", || self.activities.reconcile(params, &output))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                if e != Error::Cancelled {
                    self.activities
                        .record_failure(
                            params,
                            &format!("Failed during post-execution processing: {e}"),
                            Some(&output.merged_logs()),
                        )
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Run an activity attempt under the start-to-close deadline, with the
    /// retry policy deciding whether a failed attempt is repeated.
    async fn execute<T, F, Fut>(&self, name: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry_policy
            .execute_with_retry(|| {
                let attempt = f();
                async move {
                    match tokio::time::timeout(self.options.start_to_close, attempt).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout(format!(
                            "activity {name} exceeded start-to-close deadline"
                        ))),
                    }
                }
            })
            .await
    }

    /// The container step gets a fresh heartbeat channel per attempt; a
    /// missed heartbeat fails the attempt and the retry policy takes over.
    async fn run_container_step(
        &self,
        prepared: &Prepared,
        cancel: CancellationToken,
    ) -> Result<crate::container::RunOutput> {
        self.retry_policy
            .execute_with_retry(|| {
                let cancel = cancel.clone();
                async move {
                    let (heartbeat, monitor) = Heartbeat::channel();
                    let attempt = self.activities.run_container(prepared, heartbeat, cancel);

                    tokio::select! {
                        result = tokio::time::timeout(self.options.start_to_close, attempt) => {
                            match result {
                                Ok(output) => output,
                                Err(_) => Err(Error::Timeout(
                                    "activity run-container exceeded start-to-close deadline"
                                        .to_string(),
                                )),
                            }
                        }
                        _ = monitor.expired(self.options.heartbeat_timeout) => {
                            Err(Error::HeartbeatTimeout("run-container".to_string()))
                        }
                    }
                }
            })
            .await
    }
}
