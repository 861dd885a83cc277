//! Single-shot isolated container execution
//!
//! Runs one engine container to completion: pull-if-absent, create, start,
//! stream and demultiplex logs, wait for exit. Containers auto-remove on
//! exit; cancellation issues a best-effort stop under a detached timeout.

use crate::heartbeat::Heartbeat;
use crate::{Error, Result};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, LogsOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures_util::stream::TryStreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deadline for the best-effort stop issued on cancellation.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between liveness pings while waiting on a container.
const WAIT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Everything needed to run one engine container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Bind mounts as `(host_path, container_path)` pairs.
    pub binds: Vec<(String, String)>,
    pub cpu_shares: i64,
    pub memory_bytes: i64,
}

/// Captured output of a finished container.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    /// Combined stream contents surfaced on the execution row. The
    /// individual buffers stay available for diagnostics.
    pub fn merged_logs(&self) -> String {
        let mut merged = String::with_capacity(self.stdout.len() + self.stderr.len());
        merged.push_str(&self.stdout);
        merged.push_str(&self.stderr);
        merged
    }
}

/// Contract for running one container to completion.
#[async_trait]
pub trait ContainerRunner: Send + Sync {
    async fn run(
        &self,
        spec: ContainerSpec,
        heartbeat: Heartbeat,
        cancel: CancellationToken,
    ) -> Result<RunOutput>;
}

/// Container runner backed by the local Docker daemon.
pub struct DockerRunner {
    docker: Docker,
}

impl DockerRunner {
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Internal(format!("failed to connect to Docker daemon: {e}")))?;
        Ok(Self { docker })
    }

    pub fn with_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Pull the image unless it is already present locally.
    async fn ensure_image(
        &self,
        image: &str,
        heartbeat: &Heartbeat,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!(image, "Image not found locally, pulling");
        let options = Some(CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        });
        let mut pull_stream = self.docker.create_image(options, None, None);

        loop {
            tokio::select! {
                next = pull_stream.try_next() => match next {
                    Ok(Some(progress)) => {
                        heartbeat.ping("pulling-image");
                        if let Some(status) = progress.status {
                            debug!(image, status, "Pull progress");
                        }
                    }
                    Ok(None) => return Ok(()),
                    Err(e) => return Err(Error::PullFailed(e.to_string())),
                },
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    fn build_create_body(spec: &ContainerSpec) -> ContainerCreateBody {
        let env = spec
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        let binds = spec
            .binds
            .iter()
            .map(|(host, container)| format!("{host}:{container}"))
            .collect::<Vec<_>>();

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            cpu_shares: Some(spec.cpu_shares),
            memory: Some(spec.memory_bytes),
            auto_remove: Some(true),
            ..Default::default()
        };

        ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(env),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Follow the multiplexed log stream, splitting it into stdout and
    /// stderr buffers. The stream ends when the container exits.
    async fn collect_logs(docker: Docker, container_id: String) -> Result<(String, String)> {
        let options = Some(LogsOptions {
            stdout: true,
            stderr: true,
            since: 0,
            until: 0,
            timestamps: false,
            follow: true,
            tail: "all".to_string(),
        });

        let mut log_stream = docker.logs(&container_id, options);
        let mut stdout = String::new();
        let mut stderr = String::new();

        loop {
            match log_stream.try_next().await {
                Ok(Some(LogOutput::StdOut { message })) => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(Some(LogOutput::StdErr { message })) => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(Some(_)) => {}
                Ok(None) => return Ok((stdout, stderr)),
                Err(e) => return Err(Error::LogsFailed(e.to_string())),
            }
        }
    }

    /// Block until the container exits, pinging the heartbeat while
    /// waiting.
    async fn wait_for_exit(&self, container_id: &str, heartbeat: &Heartbeat) -> Result<i64> {
        heartbeat.ping("waiting-for-container");
        let mut wait_stream = self
            .docker
            .wait_container(container_id, Some(WaitContainerOptions::default()));
        let mut ticker = tokio::time::interval(WAIT_HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                next = wait_stream.try_next() => {
                    return match next {
                        Ok(Some(status)) => Ok(status.status_code),
                        Ok(None) => Err(Error::WaitFailed(
                            "wait stream ended without a status".to_string(),
                        )),
                        Err(e) => Err(Error::WaitFailed(e.to_string())),
                    };
                }
                _ = ticker.tick() => heartbeat.ping("waiting-for-container"),
            }
        }
    }

    /// Best-effort stop on a detached task so it survives caller
    /// cancellation; bounded by `STOP_TIMEOUT`.
    async fn stop_detached(&self, container_id: &str) {
        warn!(container_id, "Cancellation requested, stopping container");
        let docker = self.docker.clone();
        let id = container_id.to_string();
        let stop = tokio::spawn(async move {
            let options = Some(StopContainerOptions {
                t: Some(STOP_TIMEOUT.as_secs() as i32),
                ..Default::default()
            });
            if let Err(e) = docker.stop_container(&id, options).await {
                warn!(container_id = %id, error = %e, "Failed to stop container");
            }
        });
        let _ = tokio::time::timeout(STOP_TIMEOUT, stop).await;
    }
}

#[async_trait]
impl ContainerRunner for DockerRunner {
    async fn run(
        &self,
        spec: ContainerSpec,
        heartbeat: Heartbeat,
        cancel: CancellationToken,
    ) -> Result<RunOutput> {
        self.ensure_image(&spec.image, &heartbeat, &cancel).await?;

        let body = Self::build_create_body(&spec);
        let options = Some(CreateContainerOptions {
            name: None,
            platform: String::new(),
        });
        let created = self
            .docker
            .create_container(options, body)
            .await
            .map_err(|e| Error::CreateFailed(e.to_string()))?;
        let container_id = created.id;
        debug!(container_id, image = %spec.image, "Container created");

        self.docker
            .start_container(&container_id, None::<StartContainerOptions>)
            .await
            .map_err(|e| Error::StartFailed(e.to_string()))?;
        info!(container_id, image = %spec.image, "Container started");

        // Logs are followed on their own task: the stream only closes on
        // container exit, while the wait below can end first.
        let log_task = tokio::spawn(Self::collect_logs(self.docker.clone(), container_id.clone()));

        let exit_code = tokio::select! {
            exit = self.wait_for_exit(&container_id, &heartbeat) => exit?,
            _ = cancel.cancelled() => {
                log_task.abort();
                self.stop_detached(&container_id).await;
                return Err(Error::Cancelled);
            }
        };

        let (stdout, stderr) = log_task
            .await
            .map_err(|e| Error::LogsFailed(format!("log collection task failed: {e}")))??;

        info!(container_id, exit_code, "Container finished");
        Ok(RunOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_logs_orders_stdout_first() {
        let output = RunOutput {
            exit_code: 0,
            stdout: "out\n".to_string(),
            stderr: "err\n".to_string(),
        };
        assert_eq!(output.merged_logs(), "out\nerr\n");
    }

    #[test]
    fn test_create_body_carries_resources_and_binds() {
        let spec = ContainerSpec {
            image: "sluice/engine:latest".to_string(),
            cmd: vec!["migrate".to_string()],
            env: vec![("AUTH_TOKEN".to_string(), "t".to_string())],
            binds: vec![("/tmp/cfg.json".to_string(), "/app/config.json".to_string())],
            cpu_shares: 1000,
            memory_bytes: 512 * 1024 * 1024,
        };

        let body = DockerRunner::build_create_body(&spec);
        assert_eq!(body.image.as_deref(), Some("sluice/engine:latest"));
        assert_eq!(body.env.unwrap(), vec!["AUTH_TOKEN=t".to_string()]);

        let host_config = body.host_config.unwrap();
        assert_eq!(host_config.cpu_shares, Some(1000));
        assert_eq!(host_config.memory, Some(512 * 1024 * 1024));
        assert_eq!(host_config.auto_remove, Some(true));
        assert_eq!(
            host_config.binds.unwrap(),
            vec!["/tmp/cfg.json:/app/config.json".to_string()]
        );
    }
}
