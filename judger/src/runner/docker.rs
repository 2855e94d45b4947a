//! [`ContainerRuntime`] backed by a Docker daemon.

use anyhow::Context;
use async_trait::async_trait;
use bollard::{
    container::{
        AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
        KillContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
        StatsOptions,
    },
    image::CreateImageOptions,
    models::HostConfig,
    Docker,
};
use futures::{stream::BoxStream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;

use super::{
    model::{AttachedIo, OutputFrame, UnitSpec},
    runtime::ContainerRuntime,
    util::{is_container_gone, is_recoverable_error, is_status},
};

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        DockerRuntime { docker }
    }

    /// Connect with the local defaults: `DOCKER_HOST`, or the platform's
    /// default socket.
    pub fn connect() -> anyhow::Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self::new(docker))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_present(&self, image: &str) -> anyhow::Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to inspect image {}", image))),
        }
    }

    async fn pull_image(&self, image: &str) -> anyhow::Result<()> {
        let pull = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );
        futures::pin_mut!(pull);
        while let Some(info) = pull.next().await {
            match info {
                Ok(info) => {
                    tracing::trace!(%image, status = ?info.status, progress = ?info.progress, "Pulling");
                }
                Err(e) if is_recoverable_error(&e) => {
                    tracing::warn!(%image, "Undecodable pull progress: {}", e);
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!("Failed to pull image {}", image)))
                }
            }
        }
        Ok(())
    }

    async fn create_unit(&self, spec: &UnitSpec) -> anyhow::Result<String> {
        let res = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.as_str(),
                    platform: None,
                }),
                Config {
                    image: Some(spec.image.as_str()),
                    cmd: Some(spec.command.iter().map(String::as_str).collect()),
                    working_dir: Some(spec.work_dir.as_str()),
                    labels: Some(
                        spec.labels
                            .iter()
                            .map(|(k, v)| (k.as_str(), v.as_str()))
                            .collect(),
                    ),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    open_stdin: Some(true),
                    // close stdin once the attached writer hangs up
                    stdin_once: Some(true),
                    // a tty would merge stdout and stderr
                    tty: Some(false),
                    network_disabled: Some(!spec.network_enabled),
                    host_config: Some(HostConfig {
                        mounts: Some(spec.mounts.iter().map(|m| m.to_mount()).collect()),
                        memory: Some(spec.memory_limit),
                        memory_swap: Some(spec.memory_limit),
                        cpu_period: Some(spec.cpu_period),
                        cpu_quota: Some(spec.cpu_quota),
                        pids_limit: spec.pids_limit,
                        network_mode: (!spec.network_enabled).then(|| "none".to_owned()),
                        auto_remove: Some(spec.auto_remove),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("Failed to create container {}", spec.name))?;
        for warning in &res.warnings {
            tracing::warn!(container = %spec.name, "Docker: {}", warning);
        }
        Ok(res.id)
    }

    async fn attach_unit(&self, id: &str) -> anyhow::Result<AttachedIo> {
        let AttachContainerResults { output, input } = self
            .docker
            .attach_container(
                id,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(true),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(false),
                    detach_keys: None,
                }),
            )
            .await
            .with_context(|| format!("Failed to attach to container {}", id))?;

        let output = output
            .filter_map(|item| async move {
                match item {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(OutputFrame::Stdout(message)))
                    }
                    Ok(LogOutput::StdErr { message }) => Some(Ok(OutputFrame::Stderr(message))),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) if is_recoverable_error(&e) => {
                        tracing::warn!("Skipping undecodable output frame: {}", e);
                        None
                    }
                    Err(e) => Some(Err(anyhow::Error::from(e))),
                }
            })
            .boxed();

        Ok(AttachedIo { output, input })
    }

    async fn start_unit(&self, id: &str) -> anyhow::Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .with_context(|| format!("Failed to start container {}", id))
    }

    async fn kill_unit(&self, id: &str) -> anyhow::Result<()> {
        match self
            .docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_container_gone(&e) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to kill container {}", id))),
        }
    }

    async fn remove_unit(&self, id: &str) -> anyhow::Result<()> {
        match self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_container_gone(&e) => Ok(()),
            Err(e) => {
                Err(anyhow::Error::new(e).context(format!("Failed to remove container {}", id)))
            }
        }
    }

    fn memory_samples(&self, id: &str) -> BoxStream<'static, u64> {
        let docker = self.docker.clone();
        let id = id.to_owned();
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tokio::spawn(async move {
            let stats = docker.stats(
                &id,
                Some(StatsOptions {
                    stream: true,
                    one_shot: false,
                }),
            );
            futures::pin_mut!(stats);
            while let Some(Ok(sample)) = stats.next().await {
                let mem = &sample.memory_stats;
                // cgroup v1 reports a peak, v2 only the current usage
                let usage = mem.max_usage.or(mem.usage).unwrap_or(0);
                if tx.send(usage).await.is_err() {
                    break;
                }
            }
        });
        ReceiverStream::new(rx).boxed()
    }
}
