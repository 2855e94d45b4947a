use std::{collections::HashMap, path::PathBuf, pin::Pin, time::Duration};

use bytes::Bytes;
use derive_builder::Builder;
use futures::stream::BoxStream;
use tokio::io::AsyncWrite;

/// Limits and locations applied to every sandbox run.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct SandboxOptions {
    /// Wall-clock deadline of one run, measured from container start.
    #[builder(default = "Duration::from_secs(5)")]
    pub time_limit: Duration,

    /// Memory ceiling in bytes; swap is capped to the same amount.
    #[builder(default = "128 * 1024 * 1024")]
    pub memory_limit: i64,

    /// CFS period in microseconds.
    #[builder(default = "100_000")]
    pub cpu_period: i64,

    /// CFS quota in microseconds per [`Self::cpu_period`].
    #[builder(default = "50_000")]
    pub cpu_quota: i64,

    #[builder(default = "Some(128)")]
    pub pids_limit: Option<i64>,

    /// Working directory inside the container. The code file is mounted here.
    #[builder(default = "\"/app\".into()")]
    pub work_dir: String,

    #[builder(default = "100*1024")]
    pub stdout_size_limit: usize,

    #[builder(default = "100*1024")]
    pub stderr_size_limit: usize,

    /// Host folder for code artifacts. Must be absolute.
    pub temp_folder: PathBuf,

    #[builder(default = "true")]
    pub sample_memory: bool,
}

impl SandboxOptions {
    pub fn builder() -> SandboxOptionsBuilder {
        SandboxOptionsBuilder::default()
    }
}

/// A read-only host-to-container file binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Absolute path on the host.
    pub source: PathBuf,
    /// Absolute path inside the container.
    pub target: String,
}

impl BindMount {
    pub fn to_mount(&self) -> bollard::models::Mount {
        bollard::models::Mount {
            target: Some(self.target.clone()),
            source: Some(self.source.display().to_string()),
            typ: Some(bollard::models::MountTypeEnum::BIND),
            // submitted code must never be writable from inside
            read_only: Some(true),
            ..Default::default()
        }
    }
}

/// Everything needed to create one execution unit.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct UnitSpec {
    /// Container name, unique per run.
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub work_dir: String,
    #[builder(default)]
    pub mounts: Vec<BindMount>,
    #[builder(default)]
    pub labels: HashMap<String, String>,
    pub memory_limit: i64,
    pub cpu_period: i64,
    pub cpu_quota: i64,
    #[builder(default)]
    pub pids_limit: Option<i64>,
    #[builder(default = "false")]
    pub network_enabled: bool,
    /// Ask the runtime to remove the unit by itself once it exits.
    #[builder(default = "true")]
    pub auto_remove: bool,
}

impl UnitSpec {
    pub fn builder() -> UnitSpecBuilder {
        UnitSpecBuilder::default()
    }
}

/// One demultiplexed chunk of container output.
///
/// On the wire, each frame carries a stream tag (1 for stdout, 2 for stderr)
/// followed by its payload; runtimes hand frames over already split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFrame {
    Stdout(Bytes),
    Stderr(Bytes),
}

/// The single bidirectional channel attached to an execution unit.
pub struct AttachedIo {
    /// Frames of stdout and stderr, in arrival order. Ends when the unit's
    /// process exits and the channel closes.
    pub output: BoxStream<'static, anyhow::Result<OutputFrame>>,
    /// The unit's stdin. Shutting it down signals end-of-input.
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

impl std::fmt::Debug for AttachedIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedIo").finish_non_exhaustive()
    }
}

/// The raw result of one sandbox run. Classification into verdicts is up to
/// the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The output channel closed before the deadline.
    Completed {
        stdout: String,
        stderr: String,
        /// From container start to channel close.
        elapsed: Duration,
        /// Peak sampled memory usage in bytes, if any sample arrived.
        memory: Option<u64>,
    },
    /// The deadline expired first and the unit was killed.
    TimedOut {
        /// The time limit that expired.
        elapsed: Duration,
    },
    /// The run was cancelled from outside and the unit was killed.
    Cancelled,
}
