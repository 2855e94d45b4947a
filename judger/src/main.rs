use anyhow::Context;
use clap::Parser;
use ojudge_judger::{
    config::{parse_time_limit, JudgerConfig},
    judge::{Judge, TestCase},
    lang::LanguageRegistry,
    prelude::CancellationTokenHandle,
    runner::{ContainerRuntime, DockerRuntime, ImageProvisioner},
};
use std::{
    process::exit,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing_subscriber::EnvFilter;

mod opt;

static CTRL_C: AtomicBool = AtomicBool::new(false);

#[tokio::main]
async fn main() {
    let opt = opt::Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationTokenHandle::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || handle_ctrl_c(&cancel))
            .expect("Failed to set termination handler!");
    }

    if let Err(e) = run(opt, cancel).await {
        tracing::error!("{:?}", e);
        exit(1);
    }
}

async fn run(opt: opt::Opts, cancel: CancellationTokenHandle) -> anyhow::Result<()> {
    let cfg = JudgerConfig::load_or_default(opt.opt.config.as_deref()).await?;
    let registry = Arc::new(LanguageRegistry::from_config(&cfg.languages)?);

    match opt.cmd {
        opt::SubCmd::Run(cmd) => judge_one(cmd, &cfg, registry, &cancel).await,
        opt::SubCmd::Pull(cmd) => pull(cmd, &registry).await,
        opt::SubCmd::Languages => {
            for spec in registry.iter() {
                println!(
                    "{:<12}{:<32}{}",
                    spec.language.id(),
                    spec.image,
                    spec.command.join(" ")
                );
            }
            Ok(())
        }
    }
}

async fn judge_one(
    cmd: opt::RunSubCmd,
    cfg: &JudgerConfig,
    registry: Arc<LanguageRegistry>,
    cancel: &CancellationTokenHandle,
) -> anyhow::Result<()> {
    let code = tokio::fs::read_to_string(&cmd.source)
        .await
        .with_context(|| format!("Failed to read source file {}", cmd.source.display()))?;
    let raw_cases = tokio::fs::read_to_string(&cmd.cases)
        .await
        .with_context(|| format!("Failed to read test cases {}", cmd.cases.display()))?;
    let cases: Vec<TestCase> = serde_json::from_str(&raw_cases)
        .with_context(|| format!("Failed to parse test cases {}", cmd.cases.display()))?;

    let mut sandbox_opt = cfg.sandbox_options()?;
    if let Some(secs) = cmd.time_limit {
        sandbox_opt.time_limit = parse_time_limit(secs)?;
    }

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect()?);
    let judge = Judge::new(runtime, registry, sandbox_opt);
    let report = judge.judge(&code, &cmd.language, &cases, cancel).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn pull(cmd: opt::PullSubCmd, registry: &LanguageRegistry) -> anyhow::Result<()> {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect()?);
    let images = ImageProvisioner::new(runtime);
    if cmd.languages.is_empty() {
        return images.provision_all(registry).await;
    }
    for id in &cmd.languages {
        let spec = registry.resolve(id)?;
        images.ensure_available(&spec.image).await?;
    }
    Ok(())
}

fn handle_ctrl_c(cancel: &CancellationTokenHandle) {
    if !CTRL_C.swap(true, Ordering::SeqCst) {
        tracing::warn!("Cancelling... Press Ctrl-C again to force quit.");
        cancel.cancel();
    } else {
        tracing::error!("Force quit!");
        exit(101);
    }
}
