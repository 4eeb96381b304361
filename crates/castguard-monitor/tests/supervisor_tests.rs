use async_trait::async_trait;
use castguard_config::SupervisorConfig;
use castguard_monitor::{
    MonitorError, PipelineController, PipelineEvent, PipelineState, RecoveryState, ServiceManager,
    ServiceStatus, Supervisor,
};
use castguard_notify::AlertDispatcher;
use castguard_shutdown::SignalHandler;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::{broadcast, Notify};

struct MockPipeline {
    state: Mutex<String>,
    restarts: AtomicUsize,
    events: broadcast::Sender<PipelineEvent>,
    gate: Option<Arc<Notify>>,
}

impl MockPipeline {
    fn new(state: &str) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(state.to_string()),
            restarts: AtomicUsize::new(0),
            events,
            gate: None,
        }
    }

    fn gated(state: &str, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(state)
        }
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl PipelineController for MockPipeline {
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn restart(&self) -> anyhow::Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(())
    }

    async fn poll_state(&self) -> anyhow::Result<String> {
        Ok(self.state.lock().unwrap().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &str {
        "mock-pipeline"
    }
}

#[derive(Default)]
struct MockService {
    reboots: AtomicUsize,
}

#[async_trait]
impl ServiceManager for MockService {
    async fn reboot(&self) -> anyhow::Result<()> {
        self.reboots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self) -> anyhow::Result<ServiceStatus> {
        Ok(ServiceStatus::default())
    }
}

fn test_config(dir: &Path) -> SupervisorConfig {
    let mut config = SupervisorConfig::default();
    config.check_interval = 1;
    config.stream.output_dir = dir.to_path_buf();
    config.scheduler.pipeline_poll_ms = 20;
    config.scheduler.orchestrator_tick_ms = 20;
    config.scheduler.stream_check_ms = 50;
    config.scheduler.error_sweep_ms = 100;
    config.scheduler.resource_sample_ms = 500;
    config.scheduler.drain_timeout_ms = 2000;
    // 测试机负载不应触发资源告警
    config.resources.cpu_percent = 101.0;
    config.resources.memory_percent = 101.0;
    config.resources.disk_percent = 101.0;
    config
}

async fn wait_until(check: impl Fn() -> bool, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test]
async fn test_error_burst_triggers_single_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.stream.max_errors = 5;
    config.stream.burst_interval = 0;
    config.stream.restart_delay = 0;
    config.stream.recovery_grace = 600;
    config.auto_recovery.stream_restart = false;

    let pipeline = Arc::new(MockPipeline::new("active"));
    let service = Arc::new(MockService::default());
    let supervisor = Arc::new(
        Supervisor::new(
            config,
            pipeline.clone(),
            service.clone(),
            Arc::new(AlertDispatcher::new(5, 300)),
        )
        .unwrap(),
    );

    let handler = SignalHandler::new();
    let runner = {
        let supervisor = supervisor.clone();
        let token = handler.subscribe();
        tokio::spawn(async move { supervisor.run(token).await })
    };

    let health = supervisor.health();
    assert!(
        wait_until(
            || health.pipeline().state == PipelineState::Playing,
            Duration::from_secs(2)
        )
        .await
    );
    assert!(health.snapshot(chrono::Utc::now()).monitoring_active);

    let reporter = supervisor.error_reporter();
    for i in 0..6 {
        reporter.report(format!("ERROR: hlssink write failed #{}", i));
    }

    assert!(
        wait_until(
            || pipeline.restarts.load(Ordering::SeqCst) >= 1,
            Duration::from_secs(5)
        )
        .await
    );

    // 重启后的宽限期内，新的信号都合并进同一次恢复
    reporter.report("ERROR: encoder stalled");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pipeline.restarts.load(Ordering::SeqCst), 1);

    let detailed = health.detailed(chrono::Utc::now());
    assert_eq!(detailed.health.restart_count, 1);
    assert_eq!(detailed.health.recovery_state, RecoveryState::Restarting);
    assert_eq!(detailed.health.total_errors, 7);
    assert_eq!(service.reboots.load(Ordering::SeqCst), 0);

    handler.trigger_shutdown();
    runner.await.unwrap().unwrap();
    assert!(!health.snapshot(chrono::Utc::now()).monitoring_active);
    assert_eq!(
        health.snapshot(chrono::Utc::now()).recovery_state,
        RecoveryState::Idle
    );
}

#[tokio::test]
async fn test_repeated_failures_escalate_to_reboot() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.stream.max_restarts = 3;
    config.stream.restart_delay = 0;
    config.stream.recovery_grace = 0;
    config.auto_recovery.system_reboot = true;

    let pipeline = Arc::new(MockPipeline::new("active"));
    let service = Arc::new(MockService::default());
    let supervisor = Arc::new(
        Supervisor::new(
            config,
            pipeline.clone(),
            service.clone(),
            Arc::new(AlertDispatcher::new(5, 300)),
        )
        .unwrap(),
    );

    let handler = SignalHandler::new();
    let runner = {
        let supervisor = supervisor.clone();
        let token = handler.subscribe();
        tokio::spawn(async move { supervisor.run(token).await })
    };

    let health = supervisor.health();
    assert!(
        wait_until(
            || health.pipeline().state == PipelineState::Playing,
            Duration::from_secs(2)
        )
        .await
    );
    assert!(health.snapshot(chrono::Utc::now()).monitoring_active);

    pipeline.emit(PipelineEvent::Exited { code: Some(1) });

    assert!(
        wait_until(
            || health.snapshot(chrono::Utc::now()).recovery_state == RecoveryState::Escalated,
            Duration::from_secs(5)
        )
        .await
    );
    assert!(
        wait_until(
            || service.reboots.load(Ordering::SeqCst) == 1,
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(pipeline.restarts.load(Ordering::SeqCst), 3);

    let detailed = health.detailed(chrono::Utc::now());
    assert_eq!(detailed.escalations, 1);
    assert_eq!(detailed.attempts_in_window, 3);
    assert_eq!(
        detailed.last_fault.map(|f| f.kind),
        Some("restart_budget_exceeded".to_string())
    );

    handler.trigger_shutdown();
    runner.await.unwrap().unwrap();
    assert_eq!(service.reboots.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_manual_restart_rejected_while_in_flight() {
    let dir = TempDir::new().unwrap();
    let gate = Arc::new(Notify::new());
    let pipeline = Arc::new(MockPipeline::gated("active", gate.clone()));
    let supervisor = Supervisor::new(
        test_config(dir.path()),
        pipeline.clone(),
        Arc::new(MockService::default()),
        Arc::new(AlertDispatcher::new(5, 300)),
    )
    .unwrap();

    let control = supervisor.control();
    let first = {
        let control = control.clone();
        tokio::spawn(async move { control.restart_now().await })
    };
    assert!(
        wait_until(
            || pipeline.restarts.load(Ordering::SeqCst) == 1,
            Duration::from_secs(2)
        )
        .await
    );

    let second = control.restart_now().await;
    assert!(matches!(second, Err(MonitorError::RecoveryInFlight)));

    gate.notify_one();
    first.await.unwrap().unwrap();
    assert_eq!(pipeline.restarts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_manual_restart_rejected_during_automatic_recovery() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.stream.max_errors = 5;
    config.stream.burst_interval = 0;
    config.stream.restart_delay = 0;
    config.stream.recovery_grace = 600;
    config.auto_recovery.stream_restart = false;

    let pipeline = Arc::new(MockPipeline::new("active"));
    let supervisor = Arc::new(
        Supervisor::new(
            config,
            pipeline.clone(),
            Arc::new(MockService::default()),
            Arc::new(AlertDispatcher::new(5, 300)),
        )
        .unwrap(),
    );

    let handler = SignalHandler::new();
    let runner = {
        let supervisor = supervisor.clone();
        let token = handler.subscribe();
        tokio::spawn(async move { supervisor.run(token).await })
    };

    let health = supervisor.health();
    assert!(
        wait_until(
            || health.pipeline().state == PipelineState::Playing,
            Duration::from_secs(2)
        )
        .await
    );

    let reporter = supervisor.error_reporter();
    for i in 0..5 {
        reporter.report(format!("ERROR: hlssink write failed #{}", i));
    }
    assert!(
        wait_until(
            || health.snapshot(chrono::Utc::now()).recovery_state == RecoveryState::Restarting
                && pipeline.restarts.load(Ordering::SeqCst) == 1,
            Duration::from_secs(5)
        )
        .await
    );

    let manual = supervisor.control().restart_now().await;
    assert!(matches!(manual, Err(MonitorError::RecoveryInFlight)));
    assert_eq!(pipeline.restarts.load(Ordering::SeqCst), 1);
    assert_eq!(health.snapshot(chrono::Utc::now()).restart_count, 1);

    handler.trigger_shutdown();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_manual_restart_recorded_in_history() {
    let dir = TempDir::new().unwrap();
    let pipeline = Arc::new(MockPipeline::new("active"));
    let supervisor = Supervisor::new(
        test_config(dir.path()),
        pipeline.clone(),
        Arc::new(MockService::default()),
        Arc::new(AlertDispatcher::new(5, 300)),
    )
    .unwrap();

    supervisor.control().restart_now().await.unwrap();

    let detailed = supervisor.health().detailed(chrono::Utc::now());
    assert_eq!(pipeline.restarts.load(Ordering::SeqCst), 1);
    assert_eq!(detailed.health.restart_count, 1);
    assert_eq!(detailed.health.recovery_state, RecoveryState::Restarting);
    assert_eq!(detailed.restart_history[0].reason, "manual restart requested");
}

#[tokio::test]
async fn test_stopped_service_alerts_and_restarts() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.stream.restart_delay = 0;
    config.stream.recovery_grace = 600;

    let pipeline = Arc::new(MockPipeline::new("inactive"));
    let dispatcher = Arc::new(AlertDispatcher::new(5, 300));
    let supervisor = Arc::new(
        Supervisor::new(
            config,
            pipeline.clone(),
            Arc::new(MockService::default()),
            dispatcher.clone(),
        )
        .unwrap(),
    );

    let handler = SignalHandler::new();
    let runner = {
        let supervisor = supervisor.clone();
        let token = handler.subscribe();
        tokio::spawn(async move { supervisor.run(token).await })
    };

    assert!(
        wait_until(
            || pipeline.restarts.load(Ordering::SeqCst) == 1,
            Duration::from_secs(5)
        )
        .await
    );

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut alerted = false;
    while Instant::now() < deadline && !alerted {
        alerted = dispatcher
            .recent(10)
            .await
            .iter()
            .any(|alert| alert.category == "service_down");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(alerted);
    assert_eq!(
        supervisor.health().pipeline().state,
        PipelineState::Stopped
    );

    handler.trigger_shutdown();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_manual_cleanup_keeps_newest_segments() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.stream.live_streaming.max_segments = 2;

    for i in 0..4 {
        std::fs::write(dir.path().join(format!("segment{:05}.ts", i)), b"data").unwrap();
        std::thread::sleep(Duration::from_millis(20));
    }

    let supervisor = Supervisor::new(
        config,
        Arc::new(MockPipeline::new("active")),
        Arc::new(MockService::default()),
        Arc::new(AlertDispatcher::new(5, 300)),
    )
    .unwrap();

    let report = supervisor.control().cleanup_now().await.unwrap();
    assert_eq!(report.before, 4);
    assert_eq!(report.removed, 2);
    assert!(!dir.path().join("segment00000.ts").exists());
    assert!(dir.path().join("segment00003.ts").exists());
}

#[tokio::test]
async fn test_supervisor_runs_only_once() {
    let dir = TempDir::new().unwrap();
    let supervisor = Supervisor::new(
        test_config(dir.path()),
        Arc::new(MockPipeline::new("inactive")),
        Arc::new(MockService::default()),
        Arc::new(AlertDispatcher::new(5, 300)),
    )
    .unwrap();

    let handler = SignalHandler::new();
    handler.trigger_shutdown();
    supervisor.run(handler.subscribe()).await.unwrap();

    let again = supervisor.run(handler.subscribe()).await;
    assert!(matches!(again, Err(MonitorError::AlreadyRunning)));
}
