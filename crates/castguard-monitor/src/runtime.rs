use crate::controller::{PipelineController, PipelineEvent, ServiceManager};
use crate::error::SupervisorFault;
use crate::error_tracker::{ErrorEvent, ErrorSnapshot, ErrorTracker};
use crate::health::SnapshotReceivers;
use crate::metrics::SupervisorMetrics;
use crate::orchestrator::{
    HealthSignal, Observation, RecoveryAction, RecoveryOrchestrator, RecoveryState, RecoveryStatus,
};
use crate::pipeline::{PipelineSnapshot, PipelineState, PipelineStateMonitor};
use crate::resources::{ResourceMonitor, ResourceSnapshot};
use crate::stream::{RetentionReport, StreamActivityMonitor, StreamCheck};
use castguard_config::SupervisorConfig;
use castguard_notify::{AlertDispatcher, AlertHandle, AlertSeverity};
use castguard_shutdown::ShutdownToken;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// 发往错误跟踪任务的命令
#[derive(Debug, Clone)]
pub enum ErrorCommand {
    Record(ErrorEvent),
    /// 重启后确认此前的错误
    Acknowledge(DateTime<Utc>),
}

/// 各监控快照的发送端
///
/// 监控快照各由一个任务写入；恢复状态只在持有编排器锁时发布。
pub(crate) struct Publishers {
    pub pipeline: watch::Sender<PipelineSnapshot>,
    pub errors: watch::Sender<ErrorSnapshot>,
    pub stream: watch::Sender<StreamCheck>,
    pub resources: watch::Sender<ResourceSnapshot>,
    pub recovery: watch::Sender<RecoveryStatus>,
    pub active: watch::Sender<bool>,
}

impl Publishers {
    pub fn channel(pipeline: PipelineSnapshot, now: DateTime<Utc>) -> (Self, SnapshotReceivers) {
        let (pipeline_tx, pipeline_rx) = watch::channel(pipeline);
        let (errors_tx, errors_rx) = watch::channel(ErrorSnapshot::default());
        let (stream_tx, stream_rx) = watch::channel(StreamCheck::default());
        let (resources_tx, resources_rx) = watch::channel(ResourceSnapshot::default());
        let (recovery_tx, recovery_rx) = watch::channel(RecoveryStatus {
            state_since: Some(now),
            ..Default::default()
        });
        let (active_tx, active_rx) = watch::channel(false);

        (
            Self {
                pipeline: pipeline_tx,
                errors: errors_tx,
                stream: stream_tx,
                resources: resources_tx,
                recovery: recovery_tx,
                active: active_tx,
            },
            SnapshotReceivers {
                pipeline: pipeline_rx,
                errors: errors_rx,
                stream: stream_rx,
                resources: resources_rx,
                recovery: recovery_rx,
                active: active_rx,
            },
        )
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// 在持有编排器锁时发布恢复状态
pub(crate) async fn publish_recovery(
    orchestrator: &Mutex<RecoveryOrchestrator>,
    publishers: &Publishers,
    metrics: &SupervisorMetrics,
    now: DateTime<Utc>,
) {
    let orchestrator = orchestrator.lock().await;
    let status = orchestrator.status(now);
    metrics.set_recovery_state(status.state);
    publishers.recovery.send_replace(status);
}

/// 执行一次重启命令，超时按失败处理
pub(crate) async fn run_restart(
    controller: &dyn PipelineController,
    limit: Duration,
) -> anyhow::Result<()> {
    match timeout(limit, controller.restart()).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("restart timed out after {}s", limit.as_secs())),
    }
}

fn restart_in_progress(recovery: &watch::Receiver<RecoveryStatus>) -> bool {
    recovery.borrow().state == RecoveryState::Restarting
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<PipelineEvent>>,
) -> Result<PipelineEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// 管道状态监控循环：轮询 + 事件推送
pub(crate) async fn run_pipeline_monitor(
    controller: Arc<dyn PipelineController>,
    mut monitor: PipelineStateMonitor,
    publishers: Arc<Publishers>,
    errors: mpsc::Sender<ErrorCommand>,
    metrics: Arc<SupervisorMetrics>,
    poll_interval: Duration,
    mut token: ShutdownToken,
) {
    info!(pipeline = %controller.name(), "Pipeline monitor started");
    let recovery = publishers.recovery.subscribe();
    let mut events = Some(controller.subscribe());
    let mut ticker = ticker(poll_interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => match controller.poll_state().await {
                Ok(raw) => {
                    monitor.set_planned_stop(restart_in_progress(&recovery));
                    monitor.observe(&raw, Utc::now());
                }
                Err(e) => warn!(monitor = "pipeline", "Monitor tick failed: {}", e),
            },
            event = next_event(&mut events) => match event {
                Ok(PipelineEvent::StateChanged(raw)) => {
                    monitor.set_planned_stop(restart_in_progress(&recovery));
                    monitor.observe(&raw, Utc::now());
                }
                Ok(PipelineEvent::Error { message, category }) => {
                    let mut event = ErrorEvent::new(message, Utc::now());
                    if let Some(category) = category {
                        event = event.with_category(category);
                    }
                    if let Err(e) = errors.try_send(ErrorCommand::Record(event)) {
                        warn!("Error tracker unavailable, dropping error: {}", e);
                    }
                }
                Ok(PipelineEvent::Exited { code }) => {
                    if monitor.record_exit(code, Utc::now()) {
                        warn!(code = ?code, "Pipeline process exited unexpectedly");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Pipeline event stream lagged");
                }
                Err(RecvError::Closed) => {
                    debug!("Pipeline event stream closed, polling only");
                    events = None;
                }
            },
        }

        metrics.set_pipeline_state(monitor.state());
        publishers.pipeline.send_replace(monitor.snapshot());
    }

    info!("Pipeline monitor stopped");
}

/// 错误跟踪循环，唯一持有 ErrorTracker
pub(crate) async fn run_error_tracker(
    mut tracker: ErrorTracker,
    mut commands: mpsc::Receiver<ErrorCommand>,
    publishers: Arc<Publishers>,
    metrics: Arc<SupervisorMetrics>,
    max_errors: usize,
    sweep_interval: Duration,
    refresh_interval: Duration,
    mut token: ShutdownToken,
) {
    info!("Error tracker started");
    let mut sweep = ticker(sweep_interval);
    // 窗口按时间滑动，没有新命令时也要刷新快照
    let mut refresh = ticker(refresh_interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            command = commands.recv() => match command {
                Some(ErrorCommand::Record(event)) => {
                    metrics.record_error(event.category);
                    tracker.record(event);
                }
                Some(ErrorCommand::Acknowledge(at)) => tracker.acknowledge(at),
                None => break,
            },
            _ = sweep.tick() => {
                let removed = tracker.sweep(Utc::now());
                if removed > 0 {
                    debug!(removed, "Expired errors swept");
                }
            }
            _ = refresh.tick() => {}
        }

        publishers
            .errors
            .send_replace(tracker.snapshot(max_errors, Utc::now()));
    }

    info!("Error tracker stopped");
}

/// 输出目录活跃度检查循环
pub(crate) async fn run_stream_monitor(
    monitor: StreamActivityMonitor,
    publishers: Arc<Publishers>,
    metrics: Arc<SupervisorMetrics>,
    check_interval: Duration,
    mut token: ShutdownToken,
) {
    info!(output_dir = %monitor.output_dir().display(), "Stream monitor started");
    let mut ticker = ticker(check_interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => match monitor.check(Utc::now()).await {
                Ok(check) => {
                    if !check.fresh {
                        debug!(segments = check.segment_count, "No fresh segments");
                    }
                    metrics.set_stream(&check);
                    publishers.stream.send_replace(check);
                }
                // 保留上一次快照
                Err(e) => warn!(monitor = "stream", "Monitor tick failed: {}", e),
            },
        }
    }

    info!("Stream monitor stopped");
}

/// 资源采样循环
pub(crate) async fn run_resource_monitor(
    mut monitor: ResourceMonitor,
    config: Arc<SupervisorConfig>,
    publishers: Arc<Publishers>,
    metrics: Arc<SupervisorMetrics>,
    sample_interval: Duration,
    mut token: ShutdownToken,
) {
    info!("Resource monitor started");
    let mut ticker = ticker(sample_interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let sample = monitor.sample(Utc::now()).await;
                metrics.set_resources(&sample);
                publishers
                    .resources
                    .send_replace(monitor.snapshot(&config.resources));
            }
        }
    }

    info!("Resource monitor stopped");
}

/// 编排器任务：汇总快照得出信号，驱动状态机并执行动作
pub(crate) struct OrchestratorTask {
    orchestrator: Arc<Mutex<RecoveryOrchestrator>>,
    config: Arc<SupervisorConfig>,
    receivers: SnapshotReceivers,
    publishers: Arc<Publishers>,
    controller: Arc<dyn PipelineController>,
    service: Arc<dyn ServiceManager>,
    dispatcher: Arc<AlertDispatcher>,
    alerts: AlertHandle,
    errors: mpsc::Sender<ErrorCommand>,
    inflight: Arc<Mutex<()>>,
    stream: StreamActivityMonitor,
    metrics: Arc<SupervisorMetrics>,
    seen_exits: u64,
    emergency_cycles: u32,
    exhaustion_alerted: bool,
    seen_delivery_failures: u64,
}

impl OrchestratorTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orchestrator: Arc<Mutex<RecoveryOrchestrator>>,
        config: Arc<SupervisorConfig>,
        receivers: SnapshotReceivers,
        publishers: Arc<Publishers>,
        controller: Arc<dyn PipelineController>,
        service: Arc<dyn ServiceManager>,
        dispatcher: Arc<AlertDispatcher>,
        alerts: AlertHandle,
        errors: mpsc::Sender<ErrorCommand>,
        inflight: Arc<Mutex<()>>,
        metrics: Arc<SupervisorMetrics>,
    ) -> Self {
        let stream = StreamActivityMonitor::new(&config.stream);
        let seen_delivery_failures = dispatcher.delivery_failures();
        Self {
            orchestrator,
            config,
            receivers,
            publishers,
            controller,
            service,
            dispatcher,
            alerts,
            errors,
            inflight,
            stream,
            metrics,
            seen_exits: 0,
            emergency_cycles: 0,
            exhaustion_alerted: false,
            seen_delivery_failures,
        }
    }

    pub async fn run(mut self, mut token: ShutdownToken) {
        info!("Recovery orchestrator started");
        let mut tick = ticker(Duration::from_millis(self.config.scheduler.orchestrator_tick_ms));
        let mut maintenance = ticker(Duration::from_secs(self.config.check_interval));

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => self.evaluate(Utc::now()).await,
                _ = maintenance.tick() => self.maintain(Utc::now()).await,
            }
        }

        // 未完成的恢复不再继续
        let now = Utc::now();
        self.orchestrator.lock().await.abort_to_idle(now);
        self.publish(now).await;
        info!("Recovery orchestrator stopped");
    }

    /// 从最新快照推导健康信号
    pub fn collect_signals(&mut self, now: DateTime<Utc>) -> Vec<HealthSignal> {
        let pipeline = self.receivers.pipeline.borrow().clone();
        let stream = self.receivers.stream.borrow().clone();
        let errors = self.receivers.errors.borrow().clone();
        let freshness = self.stream.freshness_window();
        let mut signals = Vec::new();

        if pipeline.unexpected_exits > self.seen_exits {
            self.seen_exits = pipeline.unexpected_exits;
            signals.push(HealthSignal::ProcessExited {
                code: pipeline.last_exit.as_ref().and_then(|exit| exit.code),
            });
        }

        if errors.threshold_exceeded {
            signals.push(HealthSignal::ErrorThresholdExceeded {
                units: errors.burst_units,
                last_message: errors.last_error.as_ref().map(|e| e.message.clone()),
            });
        }

        // 刚进入 Playing 时还没有分片，留出一个新鲜度窗口
        let settled = pipeline.state == PipelineState::Playing
            && now - pipeline.last_transition > freshness;
        if stream.checked_at.is_some() && !stream.fresh && settled {
            signals.push(HealthSignal::StreamInactive {
                last_update: stream.last_update,
            });
        }

        if pipeline.is_stuck(
            now,
            chrono::Duration::seconds(self.config.stream.stuck_grace as i64),
            freshness,
            stream.last_update,
        ) {
            signals.push(HealthSignal::StuckPipeline);
        }

        signals
    }

    /// 停止或出错超过一个检查周期
    pub fn service_down_signal(&self, now: DateTime<Utc>) -> Option<HealthSignal> {
        let pipeline = self.receivers.pipeline.borrow();
        let after = chrono::Duration::seconds(self.config.check_interval as i64);
        pipeline.down_for(now, after).then(|| HealthSignal::ServiceDown {
            state: pipeline.state,
        })
    }

    async fn evaluate(&mut self, now: DateTime<Utc>) {
        let signals = self.collect_signals(now);
        let observation = Observation {
            state: self.receivers.pipeline.borrow().state,
            latest_artifact: self.receivers.stream.borrow().last_update,
        };

        let actions = {
            let mut orchestrator = self.orchestrator.lock().await;
            for signal in signals {
                let decision = orchestrator.handle_signal(signal, now);
                debug!(decision = ?decision, "Health signal handled");
            }
            orchestrator.poll(now, &observation)
        };

        // 先发布 Restarting，管道监控据此识别计划内的停止
        self.publish(now).await;
        if !actions.is_empty() {
            self.execute(actions).await;
            self.publish(Utc::now()).await;
        }
    }

    async fn execute(&mut self, actions: Vec<RecoveryAction>) {
        for action in actions {
            match action {
                RecoveryAction::Restart { reason, attempt } => self.restart(&reason, attempt).await,
                RecoveryAction::Escalate { attempts } => self.escalate(attempts).await,
                RecoveryAction::Cleanup => {
                    self.enforce_retention().await;
                }
                RecoveryAction::Alert {
                    category,
                    severity,
                    message,
                } => self.alerts.raise(&category, severity, message),
            }
        }
    }

    async fn restart(&mut self, reason: &str, attempt: usize) {
        let _guard = self.inflight.lock().await;
        info!(attempt, reason = %reason, "Restarting pipeline");

        let limit = Duration::from_secs(self.config.service.command_timeout);
        let result = run_restart(self.controller.as_ref(), limit).await;

        self.metrics.record_restart();
        match result {
            Ok(()) => {
                if let Err(e) = self.errors.try_send(ErrorCommand::Acknowledge(Utc::now())) {
                    warn!("Failed to acknowledge errors after restart: {}", e);
                }
            }
            Err(e) => {
                error!(attempt, "Pipeline restart failed: {}", e);
                self.metrics.record_restart_failure();
                self.orchestrator
                    .lock()
                    .await
                    .report_restart_error(&e.to_string(), Utc::now());
            }
        }
    }

    async fn escalate(&mut self, attempts: usize) {
        self.metrics.record_escalation();
        error!(attempts, "Restart budget exhausted, automatic recovery escalated");

        if !self.config.auto_recovery.system_reboot {
            warn!("System reboot disabled, escalation is alert-only");
            return;
        }

        let _guard = self.inflight.lock().await;
        if let Err(e) = self.service.reboot().await {
            error!("System reboot failed: {}", e);
            self.alerts.raise(
                "system_reboot_failed",
                AlertSeverity::Critical,
                format!("System reboot failed: {}", e),
            );
        }
    }

    fn disk_usage(&self) -> f64 {
        self.receivers
            .resources
            .borrow()
            .latest
            .as_ref()
            .map_or(0.0, |sample| sample.disk_percent)
    }

    async fn enforce_retention(&mut self) -> Option<RetentionReport> {
        match self.stream.enforce_retention(self.disk_usage()).await {
            Ok(report) => {
                self.metrics.record_segments_removed(report.removed);
                Some(report)
            }
            Err(e) => {
                warn!(monitor = "retention", "Monitor tick failed: {}", e);
                None
            }
        }
    }

    /// 看门狗周期：服务存活、资源信号、分片保留、告警簿记
    async fn maintain(&mut self, now: DateTime<Utc>) {
        let mut signals: Vec<HealthSignal> = self.service_down_signal(now).into_iter().collect();

        let resources = self.receivers.resources.borrow().clone();
        if let Some(latest) = resources.latest.as_ref() {
            for kind in &resources.exceeded {
                if let Some(value) = kind.value(latest) {
                    signals.push(HealthSignal::ResourceThresholdExceeded { kind: *kind, value });
                }
            }
        }

        if !signals.is_empty() {
            let mut orchestrator = self.orchestrator.lock().await;
            for signal in signals {
                let decision = orchestrator.handle_signal(signal, now);
                debug!(decision = ?decision, "Watchdog signal handled");
            }
        }

        let live = self.config.stream.live_streaming.clone();
        if live.enabled {
            if let Some(report) = self.enforce_retention().await {
                self.track_exhaustion(report.emergency, now).await;
            }

            let disk = self.disk_usage();
            if disk >= live.cleanup_threshold_percent {
                self.alerts.raise(
                    "disk_pressure",
                    AlertSeverity::Warning,
                    format!("Disk usage at {:.1}%, segment retention tightened", disk),
                );
            }
        }

        let failures = self.dispatcher.delivery_failures();
        if failures > self.seen_delivery_failures {
            let delta = failures - self.seen_delivery_failures;
            self.seen_delivery_failures = failures;
            warn!(failed = delta, "Alert deliveries failed");
            self.orchestrator.lock().await.record_fault(
                SupervisorFault::SinkDeliveryFailure(format!(
                    "{} alert deliveries failed",
                    delta
                )),
                now,
            );
        }

        self.dispatcher.cleanup_expired(now).await;
        self.publish(now).await;
    }

    /// 连续多个紧急清理周期后上报一次资源耗尽
    pub async fn track_exhaustion(&mut self, emergency: bool, now: DateTime<Utc>) {
        if !emergency {
            self.emergency_cycles = 0;
            self.exhaustion_alerted = false;
            return;
        }

        self.emergency_cycles += 1;
        let limit = self.config.stream.live_streaming.resource_escalation_cycles;
        if self.emergency_cycles >= limit && !self.exhaustion_alerted {
            self.exhaustion_alerted = true;
            let message = format!(
                "Disk usage above emergency threshold for {} cleanup cycles",
                self.emergency_cycles
            );
            error!("{}", message);
            self.orchestrator
                .lock()
                .await
                .record_fault(SupervisorFault::ResourceExhaustion(message.clone()), now);
            self.alerts
                .raise("resource_exhaustion", AlertSeverity::Critical, message);
        }
    }

    async fn publish(&self, now: DateTime<Utc>) {
        publish_recovery(&self.orchestrator, &self.publishers, &self.metrics, now).await;
    }
}
