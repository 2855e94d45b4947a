//! Tests to verify that [`crate::runner`] drives execution units correctly.

use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use test_env_log::test;

use crate::{
    lang::{Language, LanguageRegistry, LanguageSpec},
    prelude::CancellationTokenHandle,
    runner::{
        exec::RUN_ID_LABEL,
        model::{RunOutcome, SandboxOptions},
        Sandbox,
    },
};

use super::util::{sandbox_options, Call, FakeRuntime, TempFolder};

fn python() -> LanguageSpec {
    LanguageRegistry::builtin()
        .get(Language::Python)
        .unwrap()
        .clone()
}

async fn run_once(
    runtime: Arc<FakeRuntime>,
    opt: SandboxOptions,
    code: &str,
    input: &str,
) -> RunOutcome {
    let sandbox = Sandbox::new(runtime, opt);
    sandbox
        .run(code, &python(), input, CancellationTokenHandle::empty().get_token())
        .await
        .expect("Sandbox failed")
}

#[test(tokio::test)]
async fn test_run_collects_separated_output() {
    let temp = TempFolder::new();
    let mut runtime = FakeRuntime::new();
    runtime
        .when("add")
        .stdout("3")
        .stderr("warning: ")
        .stdout("\n")
        .stderr("deprecated")
        .finish();
    let runtime = Arc::new(runtime);

    let outcome = run_once(
        runtime.clone(),
        sandbox_options(&temp, Duration::from_secs(5)),
        "add()",
        "1 2",
    )
    .await;

    match outcome {
        RunOutcome::Completed {
            stdout,
            stderr,
            memory,
            ..
        } => {
            assert_eq!(stdout, "3\n");
            assert_eq!(stderr, "warning: deprecated");
            assert_eq!(memory, None);
        }
        other => panic!("Expected a completed run, got {:?}", other),
    }

    assert_eq!(
        runtime.calls(),
        vec![
            Call::Create("unit-0".into()),
            Call::Attach("unit-0".into()),
            Call::Start("unit-0".into()),
            Call::Remove("unit-0".into()),
        ]
    );
    assert_eq!(runtime.live_units(), 0);
    assert!(temp.is_clean());
}

#[test(tokio::test)]
async fn test_unit_is_created_with_limits() {
    let temp = TempFolder::new();
    let mut runtime = FakeRuntime::new();
    runtime.when("print").stdout("hi").finish();
    let runtime = Arc::new(runtime);

    let opt = sandbox_options(&temp, Duration::from_secs(5));
    run_once(runtime.clone(), opt.clone(), "print('hi')", "").await;

    let specs = runtime.specs();
    assert_eq!(specs.len(), 1);
    let spec = &specs[0];
    assert!(spec.name.starts_with("ojudge-python-"));
    assert_eq!(spec.image, "python:3.9-alpine");
    assert_eq!(spec.command, vec!["python", "solution.py"]);
    assert_eq!(spec.work_dir, "/app");
    assert_eq!(spec.memory_limit, 128 * 1024 * 1024);
    assert_eq!(spec.cpu_period, 100_000);
    assert_eq!(spec.cpu_quota, 50_000);
    assert_eq!(spec.pids_limit, Some(128));
    assert!(!spec.network_enabled);
    assert!(spec.auto_remove);
    assert!(spec.labels.contains_key(RUN_ID_LABEL));

    assert_eq!(spec.mounts.len(), 1);
    let mount = &spec.mounts[0];
    assert_eq!(mount.target, "/app/solution.py");
    assert!(mount.source.starts_with(temp.path()));
    assert!(mount.source.ends_with("solution.py"));
    assert_eq!(mount.to_mount().read_only, Some(true));
}

#[test(tokio::test)]
async fn test_stdin_gets_trailing_newline() {
    let temp = TempFolder::new();
    let mut runtime = FakeRuntime::new();
    runtime.when("echo").echo_stdin().finish();
    let runtime = Arc::new(runtime);
    let opt = sandbox_options(&temp, Duration::from_secs(5));

    for input in ["1 2", "1 2\n", "  \n", ""] {
        run_once(runtime.clone(), opt.clone(), "echo", input).await;
    }

    assert_eq!(runtime.stdins(), vec!["1 2\n", "1 2\n", "", ""]);
}

#[test(tokio::test)]
async fn test_deadline_kills_unit() {
    let temp = TempFolder::new();
    let mut runtime = FakeRuntime::new();
    runtime.when("while True").hangs().finish();
    let runtime = Arc::new(runtime);

    let started = std::time::Instant::now();
    let outcome = run_once(
        runtime.clone(),
        sandbox_options(&temp, Duration::from_millis(200)),
        "while True: pass",
        "",
    )
    .await;

    assert_eq!(
        outcome,
        RunOutcome::TimedOut {
            elapsed: Duration::from_millis(200)
        }
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(runtime.count(|c| matches!(c, Call::Kill(_))), 1);
    assert_eq!(runtime.count(|c| matches!(c, Call::Remove(_))), 1);
    assert_eq!(runtime.live_units(), 0);
    assert!(temp.is_clean());
}

#[test(tokio::test)]
async fn test_cancellation_kills_unit() {
    let temp = TempFolder::new();
    let mut runtime = FakeRuntime::new();
    runtime.when("while True").hangs().finish();
    let runtime = Arc::new(runtime);
    let sandbox = Sandbox::new(runtime.clone(), sandbox_options(&temp, Duration::from_secs(30)));

    let handle = CancellationTokenHandle::new();
    let canceller = {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        })
    };

    let outcome = sandbox
        .run("while True: pass", &python(), "", handle.get_token())
        .await
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(runtime.count(|c| matches!(c, Call::Kill(_))), 1);
    assert_eq!(runtime.live_units(), 0);
    assert!(temp.is_clean());
}

#[test(tokio::test)]
async fn test_memory_peak_is_reported() {
    let temp = TempFolder::new();
    let mut runtime = FakeRuntime::new();
    runtime.when("alloc").stdout("ok").memory(4096).finish();
    let runtime = Arc::new(runtime);

    let mut opt = sandbox_options(&temp, Duration::from_secs(5));
    opt.sample_memory = true;
    let outcome = run_once(runtime, opt, "alloc()", "").await;

    match outcome {
        RunOutcome::Completed { memory, .. } => assert_eq!(memory, Some(4096)),
        other => panic!("Expected a completed run, got {:?}", other),
    }
}

#[test(tokio::test)]
async fn test_output_is_capped() {
    let temp = TempFolder::new();
    let mut runtime = FakeRuntime::new();
    runtime.when("spam").stdout("123456").stdout("789").finish();
    let runtime = Arc::new(runtime);

    let mut opt = sandbox_options(&temp, Duration::from_secs(5));
    opt.stdout_size_limit = 4;
    let outcome = run_once(runtime, opt, "spam()", "").await;

    match outcome {
        RunOutcome::Completed { stdout, .. } => {
            assert!(stdout.starts_with("1234\n"), "got {:?}", stdout);
            assert!(stdout.contains("capped out at 4 bytes"));
        }
        other => panic!("Expected a completed run, got {:?}", other),
    }
}

#[test(tokio::test)]
async fn test_concurrent_runs_are_isolated() {
    let temp = TempFolder::new();
    let mut runtime = FakeRuntime::new();
    runtime.when("first").stdout("1").finish();
    runtime.when("second").stdout("2").finish();
    let runtime = Arc::new(runtime);
    let sandbox = Sandbox::new(runtime.clone(), sandbox_options(&temp, Duration::from_secs(5)));
    let lang = python();

    let (a, b) = tokio::join!(
        sandbox.run("first", &lang, "", CancellationTokenHandle::empty().get_token()),
        sandbox.run("second", &lang, "", CancellationTokenHandle::empty().get_token()),
    );

    let stdout = |outcome: RunOutcome| match outcome {
        RunOutcome::Completed { stdout, .. } => stdout,
        other => panic!("Expected a completed run, got {:?}", other),
    };
    assert_eq!(stdout(a.unwrap()), "1");
    assert_eq!(stdout(b.unwrap()), "2");

    let specs = runtime.specs();
    assert_eq!(specs.len(), 2);
    assert_ne!(specs[0].name, specs[1].name);
    assert_ne!(specs[0].mounts[0].source, specs[1].mounts[0].source);
    assert!(temp.is_clean());
}
