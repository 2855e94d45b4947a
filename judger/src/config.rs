//! Judger configuration, read from a TOML file.
//!
//! Every field has a default, so an empty file (or no file at all) yields the
//! reference policy: 5 seconds per test case, 128 MiB of memory, half a CPU
//! core and no network.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};

use crate::runner::model::SandboxOptions;

pub const CONFIG_FILE_NAME: &str = "judger.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgerConfig {
    /// Folder holding the per-run code artifacts that get bind-mounted into
    /// containers. Must be visible to the container runtime at the same path.
    pub temp_folder: PathBuf,

    pub docker: DockerConfig,

    /// Per-language overrides of the built-in image and command, keyed by
    /// language identifier.
    pub languages: HashMap<String, LanguageOverride>,
}

impl Default for JudgerConfig {
    fn default() -> Self {
        JudgerConfig {
            temp_folder: std::env::temp_dir().join("ojudge"),
            docker: Default::default(),
            languages: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Wall-clock limit of every test case run, in seconds.
    pub time_limit: f64,

    /// Memory ceiling of the container, in bytes. Swap is capped to the same
    /// value, so the container gets no swap at all.
    pub memory_limit: i64,

    /// CFS accounting period, in microseconds.
    pub cpu_period: i64,

    /// CPU share available for running use. This field will result in allowing
    /// the container to run `run_cpu_share * cpu_period` in every `cpu_period`.
    pub run_cpu_share: f64,

    /// Maximum number of processes/threads inside the container.
    pub pids_limit: Option<i64>,

    /// Working directory inside the container, where the code file is mounted.
    pub work_dir: String,

    pub stdout_size_limit: usize,

    pub stderr_size_limit: usize,

    /// Sample the container's memory usage while it runs.
    pub sample_memory: bool,
}

impl Default for DockerConfig {
    fn default() -> Self {
        DockerConfig {
            time_limit: 5.0,
            memory_limit: 128 * 1024 * 1024,
            cpu_period: 100_000,
            run_cpu_share: 0.5,
            pids_limit: Some(128),
            work_dir: "/app".into(),
            stdout_size_limit: 100 * 1024,
            stderr_size_limit: 100 * 1024,
            sample_memory: true,
        }
    }
}

/// Replacement image and/or command for one language.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageOverride {
    pub image: Option<String>,
    pub command: Option<Vec<String>>,
}

impl JudgerConfig {
    /// Read the config at `path`.
    pub async fn load(path: &Path) -> anyhow::Result<JudgerConfig> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    /// Read the config at `path` if given, otherwise the one in the default
    /// location, otherwise use defaults.
    pub async fn load_or_default(path: Option<&Path>) -> anyhow::Result<JudgerConfig> {
        if let Some(path) = path {
            return Self::load(path).await;
        }
        match default_config_path() {
            Some(path) if tokio::fs::metadata(&path).await.is_ok() => Self::load(&path).await,
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(JudgerConfig::default())
            }
        }
    }

    /// CPU quota, in microseconds per [`DockerConfig::cpu_period`].
    pub fn cpu_quota(&self) -> i64 {
        (self.docker.run_cpu_share * self.docker.cpu_period as f64).floor() as i64
    }

    pub fn time_limit(&self) -> anyhow::Result<Duration> {
        parse_time_limit(self.docker.time_limit)
    }

    /// Resolve everything the sandbox needs from this config.
    pub fn sandbox_options(&self) -> anyhow::Result<SandboxOptions> {
        let temp_folder = self
            .temp_folder
            .absolutize()
            .with_context(|| {
                format!(
                    "Failed to absolutize temp folder {}",
                    self.temp_folder.display()
                )
            })?
            .into_owned();

        Ok(SandboxOptions {
            time_limit: self.time_limit()?,
            memory_limit: self.docker.memory_limit,
            cpu_period: self.docker.cpu_period,
            cpu_quota: self.cpu_quota(),
            pids_limit: self.docker.pids_limit,
            work_dir: self.docker.work_dir.clone(),
            stdout_size_limit: self.docker.stdout_size_limit,
            stderr_size_limit: self.docker.stderr_size_limit,
            temp_folder,
            sample_memory: self.docker.sample_memory,
        })
    }
}

/// Convert a time limit in seconds. Negative values mean no time at all;
/// values too large for a [`Duration`] are rejected.
pub fn parse_time_limit(secs: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(secs.max(0.0))
        .with_context(|| format!("Time limit of {} seconds is out of range", secs))
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ojudge").join(CONFIG_FILE_NAME))
}
