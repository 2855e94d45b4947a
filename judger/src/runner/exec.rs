//! Running one piece of code against one input inside a fresh container.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use anyhow::Context;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::{stream::BoxStream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    lang::LanguageSpec,
    prelude::{CancellationToken, FlowSnake},
    util::AsyncTeardown,
};

use super::{
    model::{AttachedIo, BindMount, OutputFrame, RunOutcome, SandboxOptions, UnitSpec},
    runtime::ContainerRuntime,
};

/// Label carrying the run id on every container this crate creates.
pub const RUN_ID_LABEL: &str = "ojudge.run-id";

/// Runs submitted code in isolated, resource-capped, network-less containers.
///
/// Each [`Sandbox::run`] call creates its own code artifact and container and
/// releases both before returning, whatever the outcome. The sandbox holds no
/// per-run state, so concurrent runs are independent.
pub struct Sandbox {
    runtime: Arc<dyn ContainerRuntime>,
    opt: Arc<SandboxOptions>,
}

impl Sandbox {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, opt: SandboxOptions) -> Self {
        Sandbox {
            runtime,
            opt: Arc::new(opt),
        }
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.opt
    }

    /// Run `code` once with `input` on stdin.
    ///
    /// # Error Handling
    ///
    /// `Err(_)` is only returned for failures of the sandbox itself (file
    /// system, container runtime). Whatever the submitted program does is
    /// reported through [`RunOutcome`].
    pub async fn run(
        &self,
        code: &str,
        lang: &LanguageSpec,
        input: &str,
        cancel: CancellationToken,
    ) -> anyhow::Result<RunOutcome> {
        self.run_capped(code, lang, input, self.opt.stdout_size_limit, cancel)
            .await
    }

    /// Like [`Self::run`], but keeps up to `stdout_size_limit` bytes of stdout
    /// instead of the configured amount.
    pub async fn run_capped(
        &self,
        code: &str,
        lang: &LanguageSpec,
        input: &str,
        stdout_size_limit: usize,
        cancel: CancellationToken,
    ) -> anyhow::Result<RunOutcome> {
        self.run_as(FlowSnake::generate(), code, lang, input, stdout_size_limit, cancel)
            .await
    }

    #[tracing::instrument(skip(self, code, lang, input, cancel), fields(lang = %lang.language))]
    async fn run_as(
        &self,
        run_id: FlowSnake,
        code: &str,
        lang: &LanguageSpec,
        input: &str,
        stdout_size_limit: usize,
        cancel: CancellationToken,
    ) -> anyhow::Result<RunOutcome> {
        let mut artifact =
            CodeArtifact::materialize(&self.opt.temp_folder, run_id, &lang.file_name(), code)
                .await?;
        let res = self
            .run_with_artifact(run_id, lang, &artifact, input, stdout_size_limit, cancel)
            .await;
        artifact.teardown().await;
        res
    }

    async fn run_with_artifact(
        &self,
        run_id: FlowSnake,
        lang: &LanguageSpec,
        artifact: &CodeArtifact,
        input: &str,
        stdout_size_limit: usize,
        cancel: CancellationToken,
    ) -> anyhow::Result<RunOutcome> {
        let spec = self.unit_spec(run_id, lang, artifact.path())?;
        let mut unit = ExecutionUnit::create(self.runtime.clone(), &spec).await?;
        let res = self.drive(&unit, input, stdout_size_limit, cancel).await;
        unit.teardown().await;
        res
    }

    fn unit_spec(
        &self,
        run_id: FlowSnake,
        lang: &LanguageSpec,
        code_path: &Path,
    ) -> anyhow::Result<UnitSpec> {
        let target = format!(
            "{}/{}",
            self.opt.work_dir.trim_end_matches('/'),
            lang.file_name()
        );
        let spec = UnitSpec::builder()
            .name(format!("ojudge-{}-{}", lang.language, run_id))
            .image(lang.image.clone())
            .command(lang.command.clone())
            .work_dir(self.opt.work_dir.clone())
            .mounts(vec![BindMount {
                source: code_path.to_owned(),
                target,
            }])
            .labels(HashMap::from([(RUN_ID_LABEL.to_owned(), run_id.to_string())]))
            .memory_limit(self.opt.memory_limit)
            .cpu_period(self.opt.cpu_period)
            .cpu_quota(self.opt.cpu_quota)
            .pids_limit(self.opt.pids_limit)
            .network_enabled(false)
            .auto_remove(true)
            .build()?;
        Ok(spec)
    }

    /// Attach, feed input, start, then race output collection against the
    /// deadline and `cancel`.
    async fn drive(
        &self,
        unit: &ExecutionUnit,
        input: &str,
        stdout_size_limit: usize,
        mut cancel: CancellationToken,
    ) -> anyhow::Result<RunOutcome> {
        let AttachedIo {
            output,
            input: stdin,
        } = self.runtime.attach_unit(unit.id()).await?;

        // Every spawned helper is aborted when this function returns, on any path.
        let mut drain = scopeguard::guard(
            tokio::spawn(drain_output(
                output,
                stdout_size_limit,
                self.opt.stderr_size_limit,
            )),
            |h| h.abort(),
        );
        let _feed = scopeguard::guard(tokio::spawn(feed_input(stdin, input.to_owned())), |h| {
            h.abort()
        });

        self.runtime.start_unit(unit.id()).await?;
        let started = Instant::now();
        tracing::debug!(unit = %unit.name(), "Unit started");

        let peak_memory = Arc::new(AtomicU64::new(0));
        let _sampler = self.opt.sample_memory.then(|| {
            scopeguard::guard(
                tokio::spawn(sample_memory(
                    self.runtime.memory_samples(unit.id()),
                    peak_memory.clone(),
                )),
                |h| h.abort(),
            )
        });

        let deadline = tokio::time::sleep(self.opt.time_limit);
        tokio::pin!(deadline);

        let outcome = tokio::select! {
            res = &mut *drain => {
                let elapsed = started.elapsed();
                let (stdout, stderr) = res.context("Output drain task panicked")??;
                let memory = match peak_memory.load(Ordering::SeqCst) {
                    0 => None,
                    n => Some(n),
                };
                tracing::debug!(?elapsed, ?memory, "Unit exited");
                RunOutcome::Completed { stdout, stderr, elapsed, memory }
            }
            _ = &mut deadline => {
                tracing::debug!(time_limit = ?self.opt.time_limit, "Deadline expired, killing unit");
                self.kill(unit).await;
                RunOutcome::TimedOut { elapsed: self.opt.time_limit }
            }
            _ = &mut cancel => {
                tracing::debug!("Run cancelled, killing unit");
                self.kill(unit).await;
                RunOutcome::Cancelled
            }
        };
        Ok(outcome)
    }

    async fn kill(&self, unit: &ExecutionUnit) {
        if let Err(e) = self.runtime.kill_unit(unit.id()).await {
            // removal is forced anyway
            tracing::warn!(unit = %unit.name(), "Failed to kill unit: {:#}", e);
        }
    }
}

/// Collect output frames into separate stdout and stderr buffers until the
/// channel closes.
async fn drain_output(
    mut output: BoxStream<'static, anyhow::Result<OutputFrame>>,
    stdout_size_limit: usize,
    stderr_size_limit: usize,
) -> anyhow::Result<(String, String)> {
    let mut stdout = SizeConstraintBytesMut::new(stdout_size_limit);
    let mut stderr = SizeConstraintBytesMut::new(stderr_size_limit);

    while let Some(frame) = output.next().await {
        match frame.context("Failed to read unit output")? {
            OutputFrame::Stdout(message) => stdout.append(&message),
            OutputFrame::Stderr(message) => stderr.append(&message),
        }
    }

    Ok((stdout.into_string(), stderr.into_string()))
}

/// Write `input` (plus a trailing newline) unless it is blank, then signal
/// end-of-input.
async fn feed_input(mut stdin: Pin<Box<dyn AsyncWrite + Send>>, input: String) {
    let res = async {
        if !input.trim().is_empty() {
            stdin.write_all(input.as_bytes()).await?;
            if !input.ends_with('\n') {
                stdin.write_all(b"\n").await?;
            }
        }
        stdin.shutdown().await
    }
    .await;
    if let Err(e) = res {
        // the program may exit without reading everything
        tracing::debug!("Failed to feed stdin: {}", e);
    }
}

async fn sample_memory(mut samples: BoxStream<'static, u64>, peak: Arc<AtomicU64>) {
    while let Some(usage) = samples.next().await {
        peak.fetch_max(usage, Ordering::SeqCst);
    }
}

/// The submitted code, written to a per-run directory on the host.
#[derive(Debug)]
pub struct CodeArtifact {
    dir: PathBuf,
    file: PathBuf,
    removed: bool,
}

impl CodeArtifact {
    pub async fn materialize(
        temp_folder: &Path,
        run_id: FlowSnake,
        file_name: &str,
        code: &str,
    ) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(temp_folder)
            .await
            .with_context(|| format!("Failed to create temp folder {}", temp_folder.display()))?;
        let dir = temp_folder.join(run_id.to_string());
        // `create_dir` fails if the run id was ever reused
        tokio::fs::create_dir(&dir)
            .await
            .with_context(|| format!("Failed to create run folder {}", dir.display()))?;

        let artifact = CodeArtifact {
            file: dir.join(file_name),
            dir,
            removed: false,
        };
        tokio::fs::write(&artifact.file, code)
            .await
            .with_context(|| format!("Failed to write code to {}", artifact.file.display()))?;
        Ok(artifact)
    }

    pub fn path(&self) -> &Path {
        &self.file
    }
}

#[async_trait]
impl AsyncTeardown for CodeArtifact {
    async fn teardown(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            tracing::warn!(dir = %self.dir.display(), "Failed to remove code artifact: {}", e);
        }
    }
}

impl Drop for CodeArtifact {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }
}

/// A created container. Must be torn down, which force-removes it.
pub struct ExecutionUnit {
    runtime: Arc<dyn ContainerRuntime>,
    id: String,
    name: String,
    removed: bool,
}

impl ExecutionUnit {
    pub async fn create(runtime: Arc<dyn ContainerRuntime>, spec: &UnitSpec) -> anyhow::Result<Self> {
        let id = runtime.create_unit(spec).await?;
        tracing::debug!(%id, name = %spec.name, "Unit created");
        Ok(ExecutionUnit {
            runtime,
            id,
            name: spec.name.clone(),
            removed: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("removed", &self.removed)
            .finish()
    }
}

#[async_trait]
impl AsyncTeardown for ExecutionUnit {
    async fn teardown(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match self.runtime.remove_unit(&self.id).await {
            Ok(()) => tracing::debug!(name = %self.name, "Unit removed"),
            Err(e) => tracing::warn!(name = %self.name, "Failed to remove unit: {:#}", e),
        }
    }
}

impl Drop for ExecutionUnit {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        tracing::warn!(name = %self.name, "Unit dropped without teardown, removing in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let runtime = self.runtime.clone();
                let id = std::mem::take(&mut self.id);
                let name = std::mem::take(&mut self.name);
                handle.spawn(async move {
                    if let Err(e) = runtime.remove_unit(&id).await {
                        tracing::error!(%name, "Failed to remove leaked unit: {:#}", e);
                    }
                });
            }
            Err(_) => tracing::error!(name = %self.name, "No async runtime left, unit leaked"),
        }
    }
}

/// A byte buffer that silently stops growing at `size_limit`.
struct SizeConstraintBytesMut {
    size_limit: usize,
    bytes: BytesMut,
    truncated: bool,
}

impl SizeConstraintBytesMut {
    pub fn new(size_limit: usize) -> Self {
        SizeConstraintBytesMut {
            size_limit,
            bytes: BytesMut::new(),
            truncated: false,
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        let room = self.size_limit.saturating_sub(self.bytes.len());
        if bytes.len() > room {
            self.bytes.extend_from_slice(&bytes[..room]);
            self.truncated = true;
        } else {
            self.bytes.extend_from_slice(bytes);
        }
    }

    pub fn into_string(self) -> String {
        let mut s = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            s.push_str(&format!(
                "\n--- output buffer capped out at {} bytes ---\n",
                self.size_limit
            ));
        }
        s
    }
}
