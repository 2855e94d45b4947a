//! A scripted in-process [`ContainerRuntime`] and other test helpers.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use tokio::{
    io::{AsyncReadExt, DuplexStream},
    sync::{mpsc, Notify},
};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    prelude::FlowSnake,
    runner::{
        model::{AttachedIo, OutputFrame, SandboxOptions, UnitSpec},
        ContainerRuntime,
    },
};

/// A runtime call, in the order the fake received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Inspect(String),
    Pull(String),
    Create(String),
    Attach(String),
    Start(String),
    Kill(String),
    Remove(String),
}

#[derive(Debug, Clone, Default)]
struct Rule {
    code: String,
    input: Option<String>,
    frames: Vec<OutputFrame>,
    echo_stdin: bool,
    hang: bool,
    memory: Option<u64>,
}

struct Unit {
    code: String,
    memory: Option<u64>,
    output: Option<mpsc::Sender<anyhow::Result<OutputFrame>>>,
    stdin: Option<DuplexStream>,
    killed: Arc<Notify>,
    sampled: Arc<Notify>,
}

/// Pretends to run containers. Each unit picks the first rule whose code
/// pattern occurs in the mounted source file and whose input (if set) equals
/// the trimmed stdin.
#[derive(Default)]
pub struct FakeRuntime {
    rules: Vec<Rule>,
    images: Mutex<HashSet<String>>,
    failing_pulls: AtomicUsize,
    pull_delay: Duration,
    units: Mutex<HashMap<String, Unit>>,
    next_id: AtomicUsize,
    calls: Mutex<Vec<Call>>,
    specs: Mutex<Vec<UnitSpec>>,
    stdins: Arc<Mutex<Vec<String>>>,
}

pub struct RuleBuilder<'a> {
    runtime: &'a mut FakeRuntime,
    rule: Rule,
}

impl RuleBuilder<'_> {
    pub fn input(mut self, input: &str) -> Self {
        self.rule.input = Some(input.trim().to_owned());
        self
    }

    pub fn stdout(mut self, s: &str) -> Self {
        self.rule
            .frames
            .push(OutputFrame::Stdout(Bytes::copy_from_slice(s.as_bytes())));
        self
    }

    pub fn stderr(mut self, s: &str) -> Self {
        self.rule
            .frames
            .push(OutputFrame::Stderr(Bytes::copy_from_slice(s.as_bytes())));
        self
    }

    /// Print whatever arrived on stdin, verbatim.
    pub fn echo_stdin(mut self) -> Self {
        self.rule.echo_stdin = true;
        self
    }

    /// Never exit until killed.
    pub fn hangs(mut self) -> Self {
        self.rule.hang = true;
        self
    }

    pub fn memory(mut self, bytes: u64) -> Self {
        self.rule.memory = Some(bytes);
        self
    }

    pub fn finish(self) {
        self.runtime.rules.push(self.rule);
    }
}

impl FakeRuntime {
    pub fn new() -> FakeRuntime {
        FakeRuntime::default()
    }

    pub fn when(&mut self, code: &str) -> RuleBuilder<'_> {
        RuleBuilder {
            runtime: self,
            rule: Rule {
                code: code.to_owned(),
                ..Default::default()
            },
        }
    }

    /// Mark `image` as already present.
    pub fn with_image(&mut self, image: &str) -> &mut Self {
        self.images.get_mut().unwrap().insert(image.to_owned());
        self
    }

    /// Make the next `n` pulls fail.
    pub fn fail_pulls(&mut self, n: usize) -> &mut Self {
        self.failing_pulls = AtomicUsize::new(n);
        self
    }

    pub fn pull_delay(&mut self, delay: Duration) -> &mut Self {
        self.pull_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn specs(&self) -> Vec<UnitSpec> {
        self.specs.lock().unwrap().clone()
    }

    /// What each started unit received on stdin.
    pub fn stdins(&self) -> Vec<String> {
        self.stdins.lock().unwrap().clone()
    }

    /// Units created and not yet removed.
    pub fn live_units(&self) -> usize {
        self.units.lock().unwrap().len()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_present(&self, image: &str) -> anyhow::Result<bool> {
        self.record(Call::Inspect(image.to_owned()));
        Ok(self.images.lock().unwrap().contains(image))
    }

    async fn pull_image(&self, image: &str) -> anyhow::Result<()> {
        self.record(Call::Pull(image.to_owned()));
        if !self.pull_delay.is_zero() {
            tokio::time::sleep(self.pull_delay).await;
        }
        let failing = self
            .failing_pulls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(anyhow!("registry unavailable"));
        }
        self.images.lock().unwrap().insert(image.to_owned());
        Ok(())
    }

    async fn create_unit(&self, spec: &UnitSpec) -> anyhow::Result<String> {
        let mount = spec
            .mounts
            .first()
            .ok_or_else(|| anyhow!("no code mounted"))?;
        let code = tokio::fs::read_to_string(&mount.source).await?;
        let id = format!("unit-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let memory = self
            .rules
            .iter()
            .find(|r| code.contains(&r.code))
            .and_then(|r| r.memory);

        self.record(Call::Create(id.clone()));
        self.specs.lock().unwrap().push(spec.clone());
        self.units.lock().unwrap().insert(
            id.clone(),
            Unit {
                code,
                memory,
                output: None,
                stdin: None,
                killed: Arc::new(Notify::new()),
                sampled: Arc::new(Notify::new()),
            },
        );
        Ok(id)
    }

    async fn attach_unit(&self, id: &str) -> anyhow::Result<AttachedIo> {
        self.record(Call::Attach(id.to_owned()));
        let (tx, rx) = mpsc::channel(16);
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        {
            let mut units = self.units.lock().unwrap();
            let unit = units
                .get_mut(id)
                .ok_or_else(|| anyhow!("no such unit {}", id))?;
            unit.output = Some(tx);
            unit.stdin = Some(reader);
        }
        Ok(AttachedIo {
            output: ReceiverStream::new(rx).boxed(),
            input: Box::pin(writer),
        })
    }

    async fn start_unit(&self, id: &str) -> anyhow::Result<()> {
        self.record(Call::Start(id.to_owned()));
        let (code, memory, output, stdin, killed, sampled) = {
            let mut units = self.units.lock().unwrap();
            let unit = units
                .get_mut(id)
                .ok_or_else(|| anyhow!("no such unit {}", id))?;
            (
                unit.code.clone(),
                unit.memory,
                unit.output.take().ok_or_else(|| anyhow!("not attached"))?,
                unit.stdin.take().ok_or_else(|| anyhow!("not attached"))?,
                unit.killed.clone(),
                unit.sampled.clone(),
            )
        };
        let rules = self.rules.clone();
        let stdins = self.stdins.clone();

        tokio::spawn(async move {
            let mut stdin = stdin;
            let mut input = String::new();
            let _ = stdin.read_to_string(&mut input).await;
            stdins.lock().unwrap().push(input.clone());

            let rule = rules.iter().find(|r| {
                code.contains(&r.code) && r.input.as_ref().map_or(true, |i| *i == input.trim())
            });
            let rule = match rule {
                Some(rule) => rule,
                None => {
                    let _ = output
                        .send(Ok(OutputFrame::Stderr(Bytes::from_static(b"no rule matched"))))
                        .await;
                    return;
                }
            };

            if rule.hang {
                killed.notified().await;
                return;
            }
            if rule.echo_stdin {
                let _ = output.send(Ok(OutputFrame::Stdout(Bytes::from(input)))).await;
            }
            for frame in &rule.frames {
                let _ = output.send(Ok(frame.clone())).await;
            }
            if memory.is_some() {
                // stay alive until the sampler has seen us
                let _ = tokio::time::timeout(Duration::from_secs(1), sampled.notified()).await;
            }
        });
        Ok(())
    }

    async fn kill_unit(&self, id: &str) -> anyhow::Result<()> {
        self.record(Call::Kill(id.to_owned()));
        if let Some(unit) = self.units.lock().unwrap().get(id) {
            unit.killed.notify_one();
        }
        Ok(())
    }

    async fn remove_unit(&self, id: &str) -> anyhow::Result<()> {
        self.record(Call::Remove(id.to_owned()));
        if let Some(unit) = self.units.lock().unwrap().remove(id) {
            unit.killed.notify_one();
        }
        Ok(())
    }

    fn memory_samples(&self, id: &str) -> BoxStream<'static, u64> {
        let units = self.units.lock().unwrap();
        let (memory, sampled) = match units.get(id) {
            Some(unit) => (unit.memory, unit.sampled.clone()),
            None => return futures::stream::empty().boxed(),
        };
        futures::stream::unfold((memory, sampled), |(memory, sampled)| async move {
            match memory {
                Some(m) => Some((m, (None, sampled))),
                None => {
                    sampled.notify_one();
                    None
                }
            }
        })
        .boxed()
    }
}

/// A fresh temp folder, removed on drop.
pub struct TempFolder(PathBuf);

impl TempFolder {
    pub fn new() -> TempFolder {
        TempFolder(std::env::temp_dir().join(format!("ojudge-test-{}", FlowSnake::generate())))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Whether nothing is left inside.
    pub fn is_clean(&self) -> bool {
        std::fs::read_dir(&self.0)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }
}

impl Drop for TempFolder {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

pub fn sandbox_options(temp: &TempFolder, time_limit: Duration) -> SandboxOptions {
    SandboxOptions::builder()
        .time_limit(time_limit)
        .temp_folder(temp.path())
        .sample_memory(false)
        .build()
        .unwrap()
}
