//! 启动监管集成测试
//!
//! 使用真实进程、本地TCP监听器以及模拟检测验证就绪判定

use async_trait::async_trait;
use launch_vitals::health::{
    supervise, supervise_blocking, Check, CheckKind, CheckSet, HealthSupervisor, ProbeOutcome,
    RunOutcome, RunSpec, SupervisedRun, SupervisorState,
};
use launch_vitals::process::LineSink;
use launch_vitals::{HttpCheckConfig, TcpCheckConfig, VitalsError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

/// 记录每次探测时间点的检测
struct RecordingCheck {
    outcome: ProbeOutcome,
    attempts: Mutex<Vec<Instant>>,
}

impl RecordingCheck {
    fn new(outcome: ProbeOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            attempts: Mutex::new(Vec::new()),
        })
    }

    fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Check for RecordingCheck {
    fn name(&self) -> &str {
        "recording"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::Http
    }

    fn target(&self) -> String {
        "mock".to_string()
    }

    async fn attempt(&self, _timeout: Duration) -> launch_vitals::Result<ProbeOutcome> {
        self.attempts.lock().unwrap().push(Instant::now());
        Ok(self.outcome.clone())
    }
}

/// 无视超时参数的检测
struct StallingCheck;

#[async_trait]
impl Check for StallingCheck {
    fn name(&self) -> &str {
        "stalling"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::Tcp
    }

    fn target(&self) -> String {
        "mock".to_string()
    }

    async fn attempt(&self, _timeout: Duration) -> launch_vitals::Result<ProbeOutcome> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(ProbeOutcome::Success)
    }
}

fn tcp_checks(port: u16) -> CheckSet {
    CheckSet::from_config(
        &[],
        &[TcpCheckConfig {
            name: "port".to_string(),
            port: Some(port),
            ..Default::default()
        }],
    )
    .unwrap()
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn collecting_sink() -> (LineSink, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&lines);
    let sink: LineSink = Arc::new(move |line: &str| {
        captured.lock().unwrap().push(line.to_string());
    });
    (sink, lines)
}

#[cfg(unix)]
#[tokio::test]
async fn test_listening_port_is_healthy_after_one_cycle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let spec = RunSpec::new("/bin/true", Vec::new(), tcp_checks(port))
        .with_grace(Duration::ZERO)
        .with_timeout(Duration::from_secs(1))
        .with_interval(Duration::from_secs(1))
        .with_failures(3);
    let supervisor = HealthSupervisor::new(spec);

    let SupervisedRun { report, process } = supervisor.run().await;

    assert!(matches!(report.outcome, RunOutcome::Healthy { cycles: 1 }));
    assert_eq!(report.polls.len(), 1);
    assert!(report.elapsed < Duration::from_secs(1));
    assert!(process.is_some());
    assert_eq!(supervisor.state(), SupervisorState::Healthy);
}

#[cfg(unix)]
#[tokio::test]
async fn test_closed_port_is_unhealthy_after_threshold() {
    let spec = RunSpec::new("/bin/true", Vec::new(), tcp_checks(closed_port()))
        .with_timeout(Duration::from_secs(1))
        .with_interval(Duration::ZERO)
        .with_failures(2);

    let SupervisedRun { report, .. } = HealthSupervisor::new(spec).run().await;

    match &report.outcome {
        RunOutcome::Unhealthy { reason, cycles } => {
            assert_eq!(*cycles, 2);
            assert!(reason.contains("connection refused"), "reason: {reason}");
        }
        other => panic!("expected unhealthy, got {other:?}"),
    }
    assert_eq!(report.polls.len(), 2);
}

#[tokio::test]
async fn test_missing_executable_is_errored_without_polling() {
    let check = RecordingCheck::new(ProbeOutcome::Success);
    let spec = RunSpec::new(
        "/definitely/not/a/binary",
        Vec::new(),
        CheckSet::new(vec![check.clone() as Arc<dyn Check>]),
    );
    let supervisor = HealthSupervisor::new(spec);

    let SupervisedRun { report, process } = supervisor.run().await;

    match &report.outcome {
        RunOutcome::Errored(VitalsError::Launch { path, .. }) => {
            assert_eq!(path, "/definitely/not/a/binary")
        }
        other => panic!("expected launch error, got {other:?}"),
    }
    assert!(report.polls.is_empty());
    assert!(process.is_none());
    assert!(check.attempts().is_empty());
    assert_eq!(supervisor.state(), SupervisorState::Errored);
}

#[cfg(unix)]
#[tokio::test]
async fn test_threshold_counts_every_failed_cycle() {
    for failures in [1, 3, 5] {
        let check = RecordingCheck::new(ProbeOutcome::Failure("HTTP 503 Service Unavailable".to_string()));
        let spec = RunSpec::new(
            "/bin/true",
            Vec::new(),
            CheckSet::new(vec![check.clone() as Arc<dyn Check>]),
        )
        .with_interval(Duration::ZERO)
        .with_failures(failures);

        let outcome = supervise(spec).await;

        assert!(matches!(outcome, RunOutcome::Unhealthy { cycles, .. } if cycles == failures));
        assert_eq!(check.attempts().len() as u32, failures);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_first_cycle_success_skips_interval() {
    let check = RecordingCheck::new(ProbeOutcome::Success);
    let spec = RunSpec::new(
        "/bin/true",
        Vec::new(),
        CheckSet::new(vec![check.clone() as Arc<dyn Check>]),
    )
    .with_interval(Duration::from_secs(30));

    let outcome = tokio::time::timeout(Duration::from_secs(5), supervise(spec))
        .await
        .expect("a first-cycle success must not wait for the interval");

    assert!(matches!(outcome, RunOutcome::Healthy { cycles: 1 }));
    assert_eq!(check.attempts().len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_no_attempt_before_grace_elapses() {
    let grace = Duration::from_millis(300);
    let check = RecordingCheck::new(ProbeOutcome::Success);
    let spec = RunSpec::new(
        "/bin/true",
        Vec::new(),
        CheckSet::new(vec![check.clone() as Arc<dyn Check>]),
    )
    .with_grace(grace);

    let started = Instant::now();
    let outcome = supervise(spec).await;

    assert!(outcome.is_healthy());
    let attempts = check.attempts();
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].duration_since(started) >= grace);
}

#[cfg(unix)]
#[tokio::test]
async fn test_interval_separates_failed_cycles() {
    let interval = Duration::from_millis(150);
    let check = RecordingCheck::new(ProbeOutcome::TimedOut);
    let spec = RunSpec::new(
        "/bin/true",
        Vec::new(),
        CheckSet::new(vec![check.clone() as Arc<dyn Check>]),
    )
    .with_interval(interval)
    .with_failures(3);

    let outcome = supervise(spec).await;

    assert!(matches!(outcome, RunOutcome::Unhealthy { cycles: 3, .. }));
    let attempts = check.attempts();
    assert_eq!(attempts.len(), 3);
    for pair in attempts.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= interval);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_invalid_header_errors_without_retrying() {
    let mut headers = HashMap::new();
    headers.insert("bad header\n".to_string(), "x".to_string());
    let checks = CheckSet::from_config(
        &[HttpCheckConfig {
            name: "h".to_string(),
            url: "http://127.0.0.1:1/".to_string(),
            method: "GET".to_string(),
            expect: Vec::new(),
            body: None,
            headers,
        }],
        &[],
    )
    .unwrap();
    let spec = RunSpec::new("/bin/true", Vec::new(), checks)
        .with_interval(Duration::ZERO)
        .with_failures(2);
    let supervisor = HealthSupervisor::new(spec);

    let SupervisedRun { report, .. } = supervisor.run().await;

    assert!(
        matches!(report.outcome, RunOutcome::Errored(ref e) if e.is_fatal()),
        "outcome: {:?}",
        report.outcome
    );
    assert!(report.polls.is_empty());
    assert_eq!(supervisor.state(), SupervisorState::Errored);
}

#[cfg(unix)]
#[tokio::test]
async fn test_stalling_check_is_timed_out() {
    let spec = RunSpec::new(
        "/bin/true",
        Vec::new(),
        CheckSet::new(vec![Arc::new(StallingCheck) as Arc<dyn Check>]),
    )
    .with_timeout(Duration::from_millis(200))
    .with_interval(Duration::ZERO)
    .with_failures(2);

    let started = Instant::now();
    let SupervisedRun { report, .. } = HealthSupervisor::new(spec).run().await;

    assert!(matches!(report.outcome, RunOutcome::Unhealthy { cycles: 2, .. }));
    assert!(report.outcome.reason().unwrap().contains("timed out"));
    assert!(report
        .polls
        .iter()
        .all(|poll| poll.results[0].outcome == ProbeOutcome::TimedOut));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[cfg(unix)]
#[tokio::test]
async fn test_same_configuration_gives_same_verdict() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().port();
    let closed = closed_port();

    for _ in 0..2 {
        let healthy = RunSpec::new("/bin/true", Vec::new(), tcp_checks(open));
        assert!(supervise(healthy).await.is_healthy());

        let unhealthy = RunSpec::new("/bin/true", Vec::new(), tcp_checks(closed))
            .with_interval(Duration::ZERO)
            .with_failures(1);
        assert!(matches!(
            supervise(unhealthy).await,
            RunOutcome::Unhealthy { .. }
        ));
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_output_lines_reach_sink() {
    let (sink, lines) = collecting_sink();
    let spec = RunSpec::new(
        "/bin/sh",
        vec![
            "-c".to_string(),
            "echo starting; echo warming up >&2; echo ready".to_string(),
        ],
        CheckSet::default(),
    )
    .with_sink(sink);

    let SupervisedRun { report, process } = HealthSupervisor::new(spec).run().await;
    assert!(report.outcome.is_healthy());

    let status = process.unwrap().wait().await.unwrap();
    assert!(status.success());

    let lines = lines.lock().unwrap().clone();
    assert_eq!(lines.len(), 3);
    let stdout: Vec<&String> = lines.iter().filter(|line| *line != "warming up").collect();
    assert_eq!(stdout, vec!["starting", "ready"]);
    assert!(lines.contains(&"warming up".to_string()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_early_exit_does_not_abort_polling() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let spec = RunSpec::new("/bin/sh", vec!["-c".to_string(), "exit 7".to_string()], tcp_checks(port))
        .with_grace(Duration::from_millis(200));

    let SupervisedRun { report, process } = HealthSupervisor::new(spec).run().await;

    assert!(report.outcome.is_healthy());
    let status = process.unwrap().wait().await.unwrap();
    assert_eq!(status.code(), Some(7));
}

#[cfg(unix)]
#[tokio::test]
async fn test_unhealthy_run_terminates_process() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("survived");
    let script = format!("sleep 1; touch {}", marker.display());

    let spec = RunSpec::new(
        "/bin/sh",
        vec!["-c".to_string(), script],
        tcp_checks(closed_port()),
    )
    .with_interval(Duration::ZERO)
    .with_failures(1);

    let outcome = supervise(spec).await;
    assert!(matches!(outcome, RunOutcome::Unhealthy { .. }));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_state_watch_reaches_terminal_state() {
    let spec = RunSpec::new("/bin/true", Vec::new(), CheckSet::default())
        .with_grace(Duration::from_millis(100));
    let supervisor = HealthSupervisor::new(spec);
    let mut states = supervisor.subscribe();
    let initial = *states.borrow_and_update();

    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            seen.push(state);
            if state.is_terminal() {
                break;
            }
        }
        seen
    });

    let SupervisedRun { report, .. } = supervisor.run().await;
    assert!(report.outcome.is_healthy());

    let seen = watcher.await.unwrap();
    assert_eq!(initial, SupervisorState::Idle);
    assert!(seen.contains(&SupervisorState::Grace));
    assert_eq!(seen.last(), Some(&SupervisorState::Healthy));
}

#[test]
fn test_blocking_entry_point() {
    let errored = supervise_blocking(RunSpec::new(
        "/definitely/not/a/binary",
        Vec::new(),
        CheckSet::default(),
    ));
    assert_eq!(errored.exit_code(), 2);

    #[cfg(unix)]
    {
        let healthy = supervise_blocking(RunSpec::new("/bin/true", Vec::new(), CheckSet::default()));
        assert!(healthy.is_healthy());
    }
}
