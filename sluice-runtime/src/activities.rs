//! Workflow activities
//!
//! Each activity is one effectful step of the execution workflow. Every
//! step is idempotent or side-effect-free on retry: inserts are keyed by
//! the caller-minted execution id, status moves are predicate-guarded, and
//! cleanup tolerates an already-removed file.

use crate::container::{ContainerRunner, ContainerSpec, RunOutput};
use crate::heartbeat::Heartbeat;
use crate::token::mint_callback_token;
use crate::workflow::ExecutionParams;
use crate::{Error, Result};
use sluice_core::connection::connection_string;
use sluice_core::{build_engine_config, DataFormat, EngineConnection, ExecutionStatus};
use sluice_notify::NotificationService;
use sluice_storage::store::{ConnectionStore, JobStore};
use sluice_storage::{Connection, JobExecution};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Bounded grace window for the engine callback to land after a clean
/// container exit.
pub const CALLBACK_GRACE_WINDOW: Duration = Duration::from_secs(5);

/// Command the engine image expects.
const ENGINE_CMD: [&str; 4] = ["migrate", "--config", "/app/config.json", "--from-ast"];

/// In-container path the merged config is mounted at.
const CONFIG_MOUNT_PATH: &str = "/app/config.json";

/// Runtime settings for launching engine containers.
#[derive(Clone)]
pub struct EngineSettings {
    pub engine_image: String,
    pub temp_dir: PathBuf,
    pub container_cpu_limit: i64,
    pub container_memory_limit: i64,
    /// Host the engine can reach the callback endpoint on. When unset the
    /// outbound-interface heuristic is used.
    pub callback_host: Option<String>,
    pub callback_port: u16,
    pub jwt_secret: Vec<u8>,
}

impl std::fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSettings")
            .field("engine_image", &self.engine_image)
            .field("temp_dir", &self.temp_dir)
            .field("container_cpu_limit", &self.container_cpu_limit)
            .field("container_memory_limit", &self.container_memory_limit)
            .field("callback_host", &self.callback_host)
            .field("callback_port", &self.callback_port)
            .finish_non_exhaustive()
    }
}

/// Output of the prepare step: everything the container step needs.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub config_path: PathBuf,
    pub auth_token: String,
    pub callback_url: String,
}

/// The effectful steps of the execution workflow.
pub struct Activities {
    jobs: Arc<dyn JobStore>,
    connections: Arc<dyn ConnectionStore>,
    runner: Arc<dyn ContainerRunner>,
    notifier: Option<Arc<NotificationService>>,
    settings: EngineSettings,
}

impl Activities {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        connections: Arc<dyn ConnectionStore>,
        runner: Arc<dyn ContainerRunner>,
        notifier: Option<Arc<NotificationService>>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            jobs,
            connections,
            runner,
            notifier,
            settings,
        }
    }

    /// Step 1: insert the pending execution row. Replay-safe; returns the
    /// existing row when the id was already inserted.
    #[instrument(skip(self), fields(execution_id = %params.execution_id))]
    pub async fn create_execution(&self, params: &ExecutionParams) -> Result<JobExecution> {
        self.jobs
            .create_execution(
                &params.tenant_id,
                params.job_definition_id,
                params.execution_id,
            )
            .await
            .map_err(Error::from_storage)
    }

    /// Step 2: move the row to running and announce the start.
    #[instrument(skip(self), fields(execution_id = %params.execution_id))]
    pub async fn mark_running(&self, params: &ExecutionParams) -> Result<()> {
        self.jobs
            .update_execution(
                &params.tenant_id,
                params.execution_id,
                ExecutionStatus::Running,
                None,
                None,
            )
            .await
            .map_err(Error::from_storage)?;

        if let Some(notifier) = &self.notifier {
            let name = self.definition_name(params).await;
            if let Err(e) = notifier
                .notify_execution_started(
                    &params.tenant_id,
                    params.job_definition_id,
                    params.execution_id,
                    &name,
                )
                .await
            {
                warn!(error = %e, "failed to publish execution-started notification");
            }
        }
        Ok(())
    }

    /// Step 3: load the definition and both connections, build the engine
    /// config, write it to a uniquely named temp file, and mint the
    /// callback token.
    #[instrument(skip(self), fields(execution_id = %params.execution_id))]
    pub async fn prepare(&self, params: &ExecutionParams) -> Result<Prepared> {
        let definition = self
            .jobs
            .get_definition(&params.tenant_id, params.job_definition_id)
            .await
            .map_err(Error::from_storage)?;

        let source_id = definition.source_connection_id.ok_or_else(|| {
            Error::Execution("job definition has no source connection".to_string())
        })?;
        let dest_id = definition.destination_connection_id.ok_or_else(|| {
            Error::Execution("job definition has no destination connection".to_string())
        })?;

        let source = self
            .connections
            .get_connection(&params.tenant_id, source_id)
            .await
            .map_err(Error::from_storage)?;
        let dest = self
            .connections
            .get_connection(&params.tenant_id, dest_id)
            .await
            .map_err(Error::from_storage)?;

        let ast = definition
            .ast
            .as_ref()
            .ok_or_else(|| Error::Execution("job definition has no AST".to_string()))?;
        let ast_bytes = serde_json::to_vec(&ast.0)
            .map_err(|e| Error::Execution(format!("failed to serialize AST: {e}")))?;

        let config = build_engine_config(
            &ast_bytes,
            &self.engine_connection(&source)?,
            &self.engine_connection(&dest)?,
        )?;

        let config_path = self.settings.temp_dir.join(format!(
            "migration-{}-{}.json",
            params.job_definition_id,
            Uuid::new_v4()
        ));
        tokio::fs::write(&config_path, &config).await.map_err(|e| {
            Error::Internal(format!(
                "failed to write engine config {}: {e}",
                config_path.display()
            ))
        })?;
        info!(path = %config_path.display(), "Wrote engine config to temp file");

        let auth_token = mint_callback_token(
            params.execution_id,
            params.tenant_id.as_str(),
            &self.settings.jwt_secret,
        )?;

        let host = match &self.settings.callback_host {
            Some(host) => host.clone(),
            None => outbound_host_ip()?,
        };
        let callback_url = callback_url(&host, self.settings.callback_port, params.execution_id);

        Ok(Prepared {
            config_path,
            auth_token,
            callback_url,
        })
    }

    /// Step 4: run the engine container and block until exit.
    #[instrument(skip(self, prepared, heartbeat, cancel))]
    pub async fn run_container(
        &self,
        prepared: &Prepared,
        heartbeat: Heartbeat,
        cancel: CancellationToken,
    ) -> Result<RunOutput> {
        let spec = ContainerSpec {
            image: self.settings.engine_image.clone(),
            cmd: ENGINE_CMD.iter().map(|s| s.to_string()).collect(),
            env: vec![
                (
                    "REPORT_CALLBACK_URL".to_string(),
                    prepared.callback_url.clone(),
                ),
                ("AUTH_TOKEN".to_string(), prepared.auth_token.clone()),
            ],
            binds: vec![(
                prepared.config_path.display().to_string(),
                CONFIG_MOUNT_PATH.to_string(),
            )],
            cpu_shares: self.settings.container_cpu_limit,
            memory_bytes: self.settings.container_memory_limit,
        };

        self.runner.run(spec, heartbeat, cancel).await
    }

    /// Step 5: decide the final status.
    ///
    /// A non-zero exit fails the execution outright. On a clean exit the
    /// engine report gets a bounded grace window; if the row is still
    /// running afterwards the execution is marked succeeded without
    /// metrics, otherwise the callback's terminal status is preserved and
    /// only the logs are merged in.
    #[instrument(skip(self, output), fields(execution_id = %params.execution_id, exit_code = output.exit_code))]
    pub async fn reconcile(&self, params: &ExecutionParams, output: &RunOutput) -> Result<()> {
        let merged = output.merged_logs();

        if output.exit_code != 0 {
            let message = format!("Container exited with non-zero code {}", output.exit_code);
            self.jobs
                .update_execution(
                    &params.tenant_id,
                    params.execution_id,
                    ExecutionStatus::Failed,
                    Some(&message),
                    Some(&merged),
                )
                .await
                .map_err(Error::from_storage)?;
            self.notify_terminal(params, ExecutionStatus::Failed, Some(&message), None)
                .await;
            return Ok(());
        }

        info!("Container succeeded, waiting for engine report");
        tokio::time::sleep(CALLBACK_GRACE_WINDOW).await;

        let execution = self
            .jobs
            .get_execution(&params.tenant_id, params.execution_id)
            .await
            .map_err(Error::from_storage)?;
        let status = ExecutionStatus::parse(&execution.status)?;

        if !status.is_terminal() {
            // The callback did not arrive in time; the workflow takes
            // responsibility, without metrics.
            warn!("Engine report did not arrive in time, marking succeeded without metrics");
            self.jobs
                .update_execution(
                    &params.tenant_id,
                    params.execution_id,
                    ExecutionStatus::Succeeded,
                    None,
                    Some(&merged),
                )
                .await
                .map_err(Error::from_storage)?;
            self.notify_terminal(params, ExecutionStatus::Succeeded, None, None)
                .await;
            return Ok(());
        }

        // The callback already set the terminal status (and emitted its
        // own notification); keep it and persist the container logs.
        info!(status = %status, "Engine report received, preserving its status");
        self.jobs
            .append_logs(&params.tenant_id, params.execution_id, &merged)
            .await
            .map_err(Error::from_storage)?;
        Ok(())
    }

    /// Step 6: remove the temp config file. Tolerates a missing file so
    /// replays and double-cleanup are harmless.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Internal(format!(
                "failed to remove temp file {}: {e}",
                path.display()
            ))),
        }
    }

    /// Record a workflow failure on the execution row and announce it.
    /// Best-effort: recording failures must not mask the original error.
    pub async fn record_failure(
        &self,
        params: &ExecutionParams,
        message: &str,
        logs: Option<&str>,
    ) {
        if let Err(e) = self
            .jobs
            .update_execution(
                &params.tenant_id,
                params.execution_id,
                ExecutionStatus::Failed,
                Some(message),
                logs,
            )
            .await
        {
            warn!(error = %e, "failed to record execution failure");
        }
        self.notify_terminal(params, ExecutionStatus::Failed, Some(message), None)
            .await;
    }

    fn engine_connection(&self, connection: &Connection) -> Result<EngineConnection> {
        let format = DataFormat::parse(&connection.data_format)?;
        let password = self
            .connections
            .decrypt_password(connection)
            .map_err(Error::from_storage)?;
        let conn_str = connection_string(
            format,
            &connection.username,
            &password,
            &connection.host,
            connection.port as u16,
            &connection.db_name,
        )?;
        Ok(EngineConnection { format, conn_str })
    }

    async fn definition_name(&self, params: &ExecutionParams) -> String {
        self.jobs
            .get_definition(&params.tenant_id, params.job_definition_id)
            .await
            .map(|definition| definition.name)
            .unwrap_or_default()
    }

    async fn notify_terminal(
        &self,
        params: &ExecutionParams,
        status: ExecutionStatus,
        reason: Option<&str>,
        metrics: Option<(i64, i64)>,
    ) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let name = self.definition_name(params).await;
        let result = match status {
            ExecutionStatus::Succeeded => {
                let (records, bytes) = metrics.unwrap_or((0, 0));
                notifier
                    .notify_execution_succeeded(
                        &params.tenant_id,
                        params.job_definition_id,
                        params.execution_id,
                        &name,
                        records,
                        bytes,
                    )
                    .await
            }
            ExecutionStatus::Failed => {
                notifier
                    .notify_execution_failed(
                        &params.tenant_id,
                        params.job_definition_id,
                        params.execution_id,
                        &name,
                        reason.unwrap_or_default(),
                    )
                    .await
            }
            _ => return,
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to publish execution notification");
        }
    }
}

/// Callback URL the engine reports completion to.
pub(crate) fn callback_url(host: &str, port: u16, execution_id: Uuid) -> String {
    format!("http://{host}:{port}/api/jobs/executions/{execution_id}/complete")
}

/// Discover the host address the engine container can reach by asking the
/// kernel which interface routes to a well-known endpoint. No packet is
/// sent.
pub(crate) fn outbound_host_ip() -> Result<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| Error::Internal(format!("failed to bind discovery socket: {e}")))?;
    socket
        .connect("8.8.8.8:80")
        .map_err(|e| Error::Internal(format!("failed to resolve outbound interface: {e}")))?;
    let addr = socket
        .local_addr()
        .map_err(|e| Error::Internal(format!("failed to read local endpoint: {e}")))?;
    Ok(addr.ip().to_string())
}
