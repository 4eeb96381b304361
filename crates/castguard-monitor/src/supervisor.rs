use crate::controller::{PipelineController, ServiceManager};
use crate::error::{MonitorError, Result};
use crate::error_tracker::{ErrorEvent, ErrorTracker};
use crate::health::{HealthAssembler, SnapshotReceivers};
use crate::metrics::SupervisorMetrics;
use crate::orchestrator::{RecoveryOrchestrator, RecoveryPolicy};
use crate::pipeline::PipelineStateMonitor;
use crate::resources::{GpuProbe, NvidiaSmiProbe, ResourceMonitor};
use crate::runtime::{self, publish_recovery, ErrorCommand, OrchestratorTask, Publishers};
use crate::stream::{RetentionReport, StreamActivityMonitor};
use castguard_config::SupervisorConfig;
use castguard_notify::{alert_channel, AlertDispatcher};
use castguard_shutdown::{ShutdownToken, SignalHandler, TaskTracker};
use chrono::Utc;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

const ERROR_QUEUE_CAPACITY: usize = 1024;
const ALERT_QUEUE_CAPACITY: usize = 64;

/// 外部上报错误的入口，不阻塞调用方
#[derive(Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<ErrorCommand>,
}

impl ErrorReporter {
    pub fn report(&self, message: impl Into<String>) {
        self.report_event(ErrorEvent::new(message, Utc::now()));
    }

    pub fn report_event(&self, event: ErrorEvent) {
        if let Err(e) = self.tx.try_send(ErrorCommand::Record(event)) {
            warn!("Error tracker unavailable, dropping error: {}", e);
        }
    }
}

/// 手动恢复操作
///
/// 与自动恢复共用编排器和在途锁，手动重启同样计入重启历史。
#[derive(Clone)]
pub struct RecoveryControl {
    controller: Arc<dyn PipelineController>,
    orchestrator: Arc<Mutex<RecoveryOrchestrator>>,
    inflight: Arc<Mutex<()>>,
    errors: mpsc::Sender<ErrorCommand>,
    stream: StreamActivityMonitor,
    receivers: SnapshotReceivers,
    publishers: Arc<Publishers>,
    metrics: Arc<SupervisorMetrics>,
    command_timeout: Duration,
}

impl RecoveryControl {
    /// 立即重启管道
    ///
    /// 编排器处于 AwaitingRestart/Restarting，或有命令正在执行时返回 `RecoveryInFlight`。
    pub async fn restart_now(&self) -> Result<()> {
        let guard = {
            let mut orchestrator = self.orchestrator.lock().await;
            let guard = self
                .inflight
                .clone()
                .try_lock_owned()
                .map_err(|_| MonitorError::RecoveryInFlight)?;
            let attempt = orchestrator
                .begin_manual_restart(Utc::now())
                .ok_or(MonitorError::RecoveryInFlight)?;
            info!(pipeline = %self.controller.name(), attempt, "Manual restart requested");
            guard
        };
        self.publish().await;

        let result = runtime::run_restart(self.controller.as_ref(), self.command_timeout).await;
        drop(guard);

        self.metrics.record_restart();
        match result {
            Ok(()) => {
                if let Err(e) = self.errors.try_send(ErrorCommand::Acknowledge(Utc::now())) {
                    warn!("Failed to acknowledge errors after restart: {}", e);
                }
                Ok(())
            }
            Err(e) => {
                self.metrics.record_restart_failure();
                self.orchestrator
                    .lock()
                    .await
                    .report_restart_error(&e.to_string(), Utc::now());
                self.publish().await;
                Err(e.into())
            }
        }
    }

    async fn publish(&self) {
        publish_recovery(&self.orchestrator, &self.publishers, &self.metrics, Utc::now()).await;
    }

    /// 立即执行一次分片保留
    pub async fn cleanup_now(&self) -> Result<RetentionReport> {
        let disk = self
            .receivers
            .resources
            .borrow()
            .latest
            .as_ref()
            .map_or(0.0, |sample| sample.disk_percent);

        let report = self.stream.enforce_retention(disk).await?;
        self.metrics.record_segments_removed(report.removed);
        Ok(report)
    }
}

/// 监督器
///
/// 把各个监控、错误跟踪、恢复编排和告警发送组装成一组任务，
/// 对外只暴露快照读取和手动恢复入口。
pub struct Supervisor {
    config: Arc<SupervisorConfig>,
    controller: Arc<dyn PipelineController>,
    service: Arc<dyn ServiceManager>,
    dispatcher: Arc<AlertDispatcher>,
    gpu_probe: Option<Arc<dyn GpuProbe>>,
    metrics: Arc<SupervisorMetrics>,
    publishers: Arc<Publishers>,
    receivers: SnapshotReceivers,
    orchestrator: Arc<Mutex<RecoveryOrchestrator>>,
    errors_tx: mpsc::Sender<ErrorCommand>,
    errors_rx: StdMutex<Option<mpsc::Receiver<ErrorCommand>>>,
    inflight: Arc<Mutex<()>>,
    shutdown: SignalHandler,
    started: Instant,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        controller: Arc<dyn PipelineController>,
        service: Arc<dyn ServiceManager>,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Result<Self> {
        let now = Utc::now();
        let metrics = Arc::new(SupervisorMetrics::new()?);
        let initial = PipelineStateMonitor::new(&config.stream, now).snapshot();
        let (publishers, receivers) = Publishers::channel(initial, now);
        let orchestrator = RecoveryOrchestrator::new(RecoveryPolicy::from_config(&config), now);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_QUEUE_CAPACITY);

        let gpu_probe: Option<Arc<dyn GpuProbe>> = config
            .resources
            .gpu_memory_mb
            .map(|_| Arc::new(NvidiaSmiProbe::default()) as Arc<dyn GpuProbe>);

        Ok(Self {
            config: Arc::new(config),
            controller,
            service,
            dispatcher,
            gpu_probe,
            metrics,
            publishers: Arc::new(publishers),
            receivers,
            orchestrator: Arc::new(Mutex::new(orchestrator)),
            errors_tx,
            errors_rx: StdMutex::new(Some(errors_rx)),
            inflight: Arc::new(Mutex::new(())),
            shutdown: SignalHandler::new(),
            started: Instant::now(),
        })
    }

    pub fn with_gpu_probe(mut self, probe: Arc<dyn GpuProbe>) -> Self {
        self.gpu_probe = Some(probe);
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn health(&self) -> HealthAssembler {
        HealthAssembler::new(self.receivers.clone(), self.started)
    }

    pub fn metrics(&self) -> Arc<SupervisorMetrics> {
        self.metrics.clone()
    }

    pub fn dispatcher(&self) -> Arc<AlertDispatcher> {
        self.dispatcher.clone()
    }

    pub fn service(&self) -> Arc<dyn ServiceManager> {
        self.service.clone()
    }

    pub fn error_reporter(&self) -> ErrorReporter {
        ErrorReporter {
            tx: self.errors_tx.clone(),
        }
    }

    pub fn control(&self) -> RecoveryControl {
        RecoveryControl {
            controller: self.controller.clone(),
            orchestrator: self.orchestrator.clone(),
            inflight: self.inflight.clone(),
            errors: self.errors_tx.clone(),
            stream: StreamActivityMonitor::new(&self.config.stream),
            receivers: self.receivers.clone(),
            publishers: self.publishers.clone(),
            metrics: self.metrics.clone(),
            command_timeout: Duration::from_secs(self.config.service.command_timeout),
        }
    }

    /// 触发内部停止
    pub fn shutdown(&self) {
        self.shutdown.trigger_shutdown();
    }

    /// 启动全部任务，直到外部或内部停止信号到来
    ///
    /// 每个监督器只能运行一次。
    pub async fn run(&self, mut external: ShutdownToken) -> Result<()> {
        let errors_rx = self
            .errors_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or(MonitorError::AlreadyRunning)?;

        let config = self.config.clone();
        let scheduler = &config.scheduler;
        let now = Utc::now();

        info!(
            pipeline = %self.controller.name(),
            output_dir = %config.stream.output_dir.display(),
            "Supervisor starting"
        );
        self.publishers.active.send_replace(true);

        let tasks = TaskTracker::new();
        let (alerts, alert_worker) = alert_channel(self.dispatcher.clone(), ALERT_QUEUE_CAPACITY);

        tasks.spawn(
            "pipeline-monitor",
            runtime::run_pipeline_monitor(
                self.controller.clone(),
                PipelineStateMonitor::new(&config.stream, now),
                self.publishers.clone(),
                self.errors_tx.clone(),
                self.metrics.clone(),
                Duration::from_millis(scheduler.pipeline_poll_ms),
                self.shutdown.subscribe(),
            ),
        );

        tasks.spawn(
            "error-tracker",
            runtime::run_error_tracker(
                ErrorTracker::new(config.stream.error_window, config.stream.burst_interval),
                errors_rx,
                self.publishers.clone(),
                self.metrics.clone(),
                config.stream.max_errors,
                Duration::from_millis(scheduler.error_sweep_ms),
                Duration::from_millis(scheduler.orchestrator_tick_ms),
                self.shutdown.subscribe(),
            ),
        );

        tasks.spawn(
            "stream-monitor",
            runtime::run_stream_monitor(
                StreamActivityMonitor::new(&config.stream),
                self.publishers.clone(),
                self.metrics.clone(),
                Duration::from_millis(scheduler.stream_check_ms),
                self.shutdown.subscribe(),
            ),
        );

        let mut resource_monitor = ResourceMonitor::new(&config.resources, &config.stream.output_dir);
        if let Some(probe) = &self.gpu_probe {
            resource_monitor = resource_monitor.with_gpu_probe(probe.clone());
        }
        tasks.spawn(
            "resource-monitor",
            runtime::run_resource_monitor(
                resource_monitor,
                config.clone(),
                self.publishers.clone(),
                self.metrics.clone(),
                Duration::from_millis(scheduler.resource_sample_ms),
                self.shutdown.subscribe(),
            ),
        );

        let orchestrator = OrchestratorTask::new(
            self.orchestrator.clone(),
            config.clone(),
            self.receivers.clone(),
            self.publishers.clone(),
            self.controller.clone(),
            self.service.clone(),
            self.dispatcher.clone(),
            alerts,
            self.errors_tx.clone(),
            self.inflight.clone(),
            self.metrics.clone(),
        );
        tasks.spawn("recovery-orchestrator", orchestrator.run(self.shutdown.subscribe()));

        // 编排器退出后释放 AlertHandle，发送任务处理完队列再结束
        tasks.spawn("alert-sender", alert_worker.run());

        let mut internal = self.shutdown.subscribe();
        let signal = tokio::select! {
            signal = external.cancelled() => signal,
            signal = internal.cancelled() => signal,
        };
        info!(signal = ?signal, "Supervisor stopping");

        self.shutdown.trigger_shutdown();
        let aborted = tasks
            .drain(Duration::from_millis(scheduler.drain_timeout_ms))
            .await;
        if aborted > 0 {
            warn!(aborted, "Some supervisor tasks did not stop in time");
        }

        self.publishers.active.send_replace(false);
        info!("Supervisor stopped");
        Ok(())
    }
}
