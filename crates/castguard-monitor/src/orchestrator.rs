use crate::error::{FaultRecord, SupervisorFault};
use crate::pipeline::PipelineState;
use crate::resources::ResourceKind;
use castguard_config::{AutoRecoveryConfig, SupervisorConfig};
use castguard_notify::AlertSeverity;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// 恢复状态机
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    #[default]
    Idle,
    AwaitingRestart,
    Restarting,
    Cooldown,
    Escalated,
}

/// 监控侧产生的健康信号
#[derive(Debug, Clone, PartialEq)]
pub enum HealthSignal {
    StuckPipeline,
    ErrorThresholdExceeded {
        units: usize,
        last_message: Option<String>,
    },
    StreamInactive {
        last_update: Option<DateTime<Utc>>,
    },
    ProcessExited {
        code: Option<i32>,
    },
    /// 服务持续处于停止或错误状态
    ServiceDown {
        state: PipelineState,
    },
    ResourceThresholdExceeded {
        kind: ResourceKind,
        value: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryKind {
    Stream,
    Service,
    Resource,
}

impl HealthSignal {
    fn recovery_kind(&self) -> RecoveryKind {
        match self {
            HealthSignal::StuckPipeline | HealthSignal::StreamInactive { .. } => RecoveryKind::Stream,
            HealthSignal::ErrorThresholdExceeded { .. }
            | HealthSignal::ProcessExited { .. }
            | HealthSignal::ServiceDown { .. } => RecoveryKind::Service,
            HealthSignal::ResourceThresholdExceeded { .. } => RecoveryKind::Resource,
        }
    }

    /// 告警类别
    pub fn alert_category(&self) -> String {
        match self {
            HealthSignal::StuckPipeline => "pipeline_stuck".to_string(),
            HealthSignal::ErrorThresholdExceeded { .. } => "error_threshold".to_string(),
            HealthSignal::StreamInactive { .. } => "stream_inactive".to_string(),
            HealthSignal::ProcessExited { .. } | HealthSignal::ServiceDown { .. } => {
                "service_down".to_string()
            }
            HealthSignal::ResourceThresholdExceeded { kind, .. } => format!("high_{}_usage", kind),
        }
    }

    pub fn severity(&self) -> AlertSeverity {
        match self {
            HealthSignal::ProcessExited { .. } | HealthSignal::ServiceDown { .. } => {
                AlertSeverity::Critical
            }
            _ => AlertSeverity::Warning,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            HealthSignal::StuckPipeline => {
                "Pipeline is playing but has produced no new segments".to_string()
            }
            HealthSignal::ErrorThresholdExceeded { units, last_message } => match last_message {
                Some(message) => format!("{} error bursts within window, last: {}", units, message),
                None => format!("{} error bursts within window", units),
            },
            HealthSignal::StreamInactive { last_update } => match last_update {
                Some(at) => format!("No new segments since {}", at.to_rfc3339()),
                None => "No segments have been published".to_string(),
            },
            HealthSignal::ProcessExited { code } => match code {
                Some(code) => format!("Pipeline process exited with code {}", code),
                None => "Pipeline process exited without a status".to_string(),
            },
            HealthSignal::ServiceDown { state } => format!("Service is not running: {}", state),
            HealthSignal::ResourceThresholdExceeded { kind, value } => match kind {
                ResourceKind::GpuMemory => format!("High GPU memory usage: {:.0}MB", value),
                _ => format!("High {} usage: {:.1}%", kind, value),
            },
        }
    }

    pub fn fault(&self) -> SupervisorFault {
        match self.recovery_kind() {
            RecoveryKind::Stream => SupervisorFault::StreamStalled(self.describe()),
            RecoveryKind::Service => SupervisorFault::TransientPipelineError(self.describe()),
            RecoveryKind::Resource => SupervisorFault::ResourceExhaustion(self.describe()),
        }
    }
}

/// 信号处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// 已安排重启
    Scheduled,
    /// 已有恢复动作在途，合并
    Coalesced,
    /// 自动恢复关闭，只告警
    AlertOnly,
    /// 触发分片清理
    CleanupRequested,
    /// 冷却或升级期间忽略
    Ignored,
}

/// 编排器要求执行的动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    Restart { reason: String, attempt: usize },
    Escalate { attempts: usize },
    Cleanup,
    Alert {
        category: String,
        severity: AlertSeverity,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestartAttempt {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub outcome: AttemptOutcome,
}

/// 判断重启是否生效所需的观测
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub state: PipelineState,
    pub latest_artifact: Option<DateTime<Utc>>,
}

impl Observation {
    /// 处于 Playing 且有晚于 `since` 的新分片
    pub fn healthy_since(&self, since: DateTime<Utc>) -> bool {
        self.state == PipelineState::Playing
            && self.latest_artifact.map_or(false, |at| at > since)
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    pub restart_delay: Duration,
    pub recovery_grace: Duration,
    pub recovery_cooldown: Duration,
    pub restart_window: Duration,
    pub max_restarts: usize,
    pub auto_recovery: AutoRecoveryConfig,
}

impl RecoveryPolicy {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        let stream = &config.stream;
        Self {
            restart_delay: Duration::seconds(stream.restart_delay as i64),
            recovery_grace: Duration::seconds(stream.recovery_grace as i64),
            recovery_cooldown: Duration::seconds(stream.recovery_cooldown as i64),
            restart_window: Duration::seconds(stream.restart_window as i64),
            max_restarts: stream.max_restarts as usize,
            auto_recovery: config.auto_recovery.clone(),
        }
    }
}

/// 编排器对外发布的状态
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryStatus {
    pub state: RecoveryState,
    pub state_since: Option<DateTime<Utc>>,
    /// 累计发出的重启次数
    pub restart_count: u64,
    pub attempts_in_window: usize,
    pub escalations: u64,
    pub history: Vec<RestartAttempt>,
    pub last_fault: Option<FaultRecord>,
}

/// 恢复编排器
///
/// 纯状态机，时间由调用方传入；动作通过 `poll` 取出后由运行时执行。
pub struct RecoveryOrchestrator {
    policy: RecoveryPolicy,
    state: RecoveryState,
    state_since: DateTime<Utc>,
    pending_reason: Option<String>,
    history: VecDeque<RestartAttempt>,
    restart_count: u64,
    escalations: u64,
    last_fault: Option<FaultRecord>,
    outbox: Vec<RecoveryAction>,
}

impl RecoveryOrchestrator {
    pub fn new(policy: RecoveryPolicy, now: DateTime<Utc>) -> Self {
        Self {
            policy,
            state: RecoveryState::Idle,
            state_since: now,
            pending_reason: None,
            history: VecDeque::new(),
            restart_count: 0,
            escalations: 0,
            last_fault: None,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn restart_count(&self) -> u64 {
        self.restart_count
    }

    pub fn handle_signal(&mut self, signal: HealthSignal, now: DateTime<Utc>) -> Decision {
        let kind = signal.recovery_kind();

        if kind == RecoveryKind::Resource {
            self.record_fault(signal.fault(), now);
            self.push_alert(signal.alert_category(), signal.severity(), signal.describe());

            let is_disk = matches!(
                signal,
                HealthSignal::ResourceThresholdExceeded {
                    kind: ResourceKind::Disk,
                    ..
                }
            );
            if self.policy.auto_recovery.resource_monitoring && is_disk {
                self.outbox.push(RecoveryAction::Cleanup);
                return Decision::CleanupRequested;
            }
            return Decision::AlertOnly;
        }

        match self.state {
            RecoveryState::Idle => {
                self.record_fault(signal.fault(), now);
                self.push_alert(signal.alert_category(), signal.severity(), signal.describe());

                if !self.recovery_enabled(kind) {
                    debug!(signal = ?signal, "Automatic recovery disabled, alert only");
                    return Decision::AlertOnly;
                }

                let reason = signal.describe();
                info!(reason = %reason, "Recovery scheduled");
                self.pending_reason = Some(reason);
                self.enter(RecoveryState::AwaitingRestart, now);
                Decision::Scheduled
            }
            RecoveryState::AwaitingRestart | RecoveryState::Restarting => {
                debug!(signal = ?signal, state = ?self.state, "Signal coalesced into in-flight recovery");
                Decision::Coalesced
            }
            RecoveryState::Cooldown | RecoveryState::Escalated => {
                debug!(signal = ?signal, state = ?self.state, "Signal ignored");
                Decision::Ignored
            }
        }
    }

    /// 推进状态机，返回需要执行的动作
    pub fn poll(&mut self, now: DateTime<Utc>, observation: &Observation) -> Vec<RecoveryAction> {
        self.prune_history(now);

        match self.state {
            RecoveryState::AwaitingRestart if now - self.state_since >= self.policy.restart_delay => {
                let attempts = self.attempts_in_window(now);
                if attempts >= self.policy.max_restarts {
                    self.escalate(attempts, now);
                } else {
                    self.begin_restart(now);
                }
            }
            RecoveryState::Restarting => {
                if observation.healthy_since(self.state_since) {
                    self.finish_attempt(AttemptOutcome::Succeeded);
                    info!("Recovery succeeded, entering cooldown");
                    self.push_alert(
                        "stream_recovered".to_string(),
                        AlertSeverity::Info,
                        "Stream recovered after restart".to_string(),
                    );
                    self.enter(RecoveryState::Cooldown, now);
                } else if now - self.state_since >= self.policy.recovery_grace {
                    self.finish_attempt(AttemptOutcome::Failed);
                    warn!(
                        state = %observation.state,
                        "Pipeline not healthy within recovery grace period"
                    );
                    self.push_alert(
                        "restart_failed".to_string(),
                        AlertSeverity::Warning,
                        "Pipeline did not recover after restart".to_string(),
                    );
                    self.enter(RecoveryState::AwaitingRestart, now);
                }
            }
            RecoveryState::Cooldown if now - self.state_since >= self.policy.recovery_cooldown => {
                self.pending_reason = None;
                self.enter(RecoveryState::Idle, now);
            }
            RecoveryState::Escalated if self.attempts_in_window(now) < self.policy.max_restarts => {
                info!("Restart window rolled over, automatic recovery re-armed");
                self.pending_reason = None;
                self.enter(RecoveryState::Idle, now);
            }
            _ => {}
        }

        std::mem::take(&mut self.outbox)
    }

    /// 手动重启：已有恢复在途时返回 None，否则记一次重启并进入 Restarting
    ///
    /// 重启命令由调用方执行，不进入 outbox。
    pub fn begin_manual_restart(&mut self, now: DateTime<Utc>) -> Option<usize> {
        if matches!(
            self.state,
            RecoveryState::AwaitingRestart | RecoveryState::Restarting
        ) {
            return None;
        }

        self.pending_reason = Some("manual restart requested".to_string());
        let (_, attempt) = self.record_attempt(now);
        Some(attempt)
    }

    /// 重启命令本身执行失败
    pub fn report_restart_error(&mut self, message: &str, now: DateTime<Utc>) {
        if self.state != RecoveryState::Restarting {
            return;
        }

        self.finish_attempt(AttemptOutcome::Failed);
        self.record_fault(
            SupervisorFault::TransientPipelineError(format!("Restart failed: {}", message)),
            now,
        );
        self.push_alert(
            "restart_failed".to_string(),
            AlertSeverity::Critical,
            format!("Failed to restart pipeline: {}", message),
        );
        self.enter(RecoveryState::AwaitingRestart, now);
    }

    /// 关闭时放弃进行中的恢复，只停在 Idle 或 Escalated
    pub fn abort_to_idle(&mut self, now: DateTime<Utc>) {
        match self.state {
            RecoveryState::Restarting => {
                self.finish_attempt(AttemptOutcome::Failed);
                self.enter(RecoveryState::Idle, now);
            }
            RecoveryState::AwaitingRestart | RecoveryState::Cooldown => {
                self.enter(RecoveryState::Idle, now);
            }
            RecoveryState::Idle | RecoveryState::Escalated => {}
        }
        self.pending_reason = None;
        self.outbox.clear();
    }

    pub fn record_fault(&mut self, fault: SupervisorFault, now: DateTime<Utc>) {
        self.last_fault = Some(FaultRecord::new(&fault, now));
    }

    /// 窗口 `[now - restart_window, now]` 内的重启次数
    pub fn attempts_in_window(&self, now: DateTime<Utc>) -> usize {
        self.history
            .iter()
            .filter(|a| a.timestamp <= now && now - a.timestamp <= self.policy.restart_window)
            .count()
    }

    pub fn status(&self, now: DateTime<Utc>) -> RecoveryStatus {
        RecoveryStatus {
            state: self.state,
            state_since: Some(self.state_since),
            restart_count: self.restart_count,
            attempts_in_window: self.attempts_in_window(now),
            escalations: self.escalations,
            history: self.history.iter().cloned().collect(),
            last_fault: self.last_fault.clone(),
        }
    }

    fn begin_restart(&mut self, now: DateTime<Utc>) {
        let (reason, attempt) = self.record_attempt(now);
        self.outbox.push(RecoveryAction::Restart { reason, attempt });
    }

    /// 记录一次待定的重启并进入 Restarting，返回原因和窗口内的序号
    fn record_attempt(&mut self, now: DateTime<Utc>) -> (String, usize) {
        let reason = self
            .pending_reason
            .clone()
            .unwrap_or_else(|| "recovery requested".to_string());

        self.history.push_back(RestartAttempt {
            timestamp: now,
            reason: reason.clone(),
            outcome: AttemptOutcome::Pending,
        });
        self.restart_count += 1;
        let attempt = self.attempts_in_window(now);

        info!(attempt, max = self.policy.max_restarts, reason = %reason, "Issuing pipeline restart");
        self.enter(RecoveryState::Restarting, now);
        (reason, attempt)
    }

    fn escalate(&mut self, attempts: usize, now: DateTime<Utc>) {
        error!(
            attempts,
            window_secs = self.policy.restart_window.num_seconds(),
            "Restart budget exhausted, escalating"
        );

        self.escalations += 1;
        self.record_fault(SupervisorFault::RestartBudgetExceeded { attempts }, now);
        self.push_alert(
            "restart_budget_exceeded".to_string(),
            AlertSeverity::Critical,
            format!(
                "{} restarts within {}s did not recover the stream, escalating",
                attempts,
                self.policy.restart_window.num_seconds()
            ),
        );
        self.outbox.push(RecoveryAction::Escalate { attempts });
        self.enter(RecoveryState::Escalated, now);
    }

    fn finish_attempt(&mut self, outcome: AttemptOutcome) {
        if let Some(attempt) = self
            .history
            .iter_mut()
            .rev()
            .find(|a| a.outcome == AttemptOutcome::Pending)
        {
            attempt.outcome = outcome;
        }
    }

    fn prune_history(&mut self, now: DateTime<Utc>) {
        let window = self.policy.restart_window;
        while let Some(front) = self.history.front() {
            if front.outcome != AttemptOutcome::Pending && now - front.timestamp > window {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    fn recovery_enabled(&self, kind: RecoveryKind) -> bool {
        let auto = &self.policy.auto_recovery;
        match kind {
            RecoveryKind::Stream => auto.stream_restart,
            RecoveryKind::Service => auto.service_restart,
            RecoveryKind::Resource => auto.resource_monitoring,
        }
    }

    fn push_alert(&mut self, category: String, severity: AlertSeverity, message: String) {
        self.outbox.push(RecoveryAction::Alert {
            category,
            severity,
            message,
        });
    }

    fn enter(&mut self, state: RecoveryState, now: DateTime<Utc>) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Recovery state changed");
        }
        self.state = state;
        self.state_since = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_tracker::{ErrorEvent, ErrorTracker};

    fn policy(max_restarts: usize, restart_delay: i64, recovery_grace: i64) -> RecoveryPolicy {
        RecoveryPolicy {
            restart_delay: Duration::seconds(restart_delay),
            recovery_grace: Duration::seconds(recovery_grace),
            recovery_cooldown: Duration::seconds(60),
            restart_window: Duration::seconds(600),
            max_restarts,
            auto_recovery: AutoRecoveryConfig::default(),
        }
    }

    fn unhealthy() -> Observation {
        Observation {
            state: PipelineState::Error,
            latest_artifact: None,
        }
    }

    fn count_restarts(actions: &[RecoveryAction]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, RecoveryAction::Restart { .. }))
            .count()
    }

    fn count_escalations(actions: &[RecoveryAction]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, RecoveryAction::Escalate { .. }))
            .count()
    }

    fn error_signal() -> HealthSignal {
        HealthSignal::ErrorThresholdExceeded {
            units: 5,
            last_message: None,
        }
    }

    #[test]
    fn test_error_burst_triggers_single_restart() {
        let start = Utc::now();
        let mut tracker = ErrorTracker::new(300, 5);
        let mut orchestrator = RecoveryOrchestrator::new(policy(5, 30, 600), start);
        let mut actions = Vec::new();
        let mut decisions = Vec::new();

        for (i, offset) in [0, 20, 40, 60, 80, 100].iter().enumerate() {
            let now = start + Duration::seconds(*offset);
            tracker.record(ErrorEvent::new(format!("pipeline error {}", i), now));
            if tracker.threshold_exceeded(5, now) {
                let units = tracker.burst_units(now);
                decisions.push(orchestrator.handle_signal(
                    HealthSignal::ErrorThresholdExceeded {
                        units,
                        last_message: None,
                    },
                    now,
                ));
            }
            actions.extend(orchestrator.poll(now, &unhealthy()));
        }

        for offset in 101..300 {
            actions.extend(orchestrator.poll(start + Duration::seconds(offset), &unhealthy()));
        }

        // 第 5 条安排重启，第 6 条被合并
        assert_eq!(decisions, vec![Decision::Scheduled, Decision::Coalesced]);
        assert_eq!(count_restarts(&actions), 1);
        assert_eq!(orchestrator.state(), RecoveryState::Restarting);
    }

    #[test]
    fn test_restart_budget_escalates_exactly_once() {
        let start = Utc::now();
        let mut orchestrator = RecoveryOrchestrator::new(policy(10, 0, 10), start);
        let mut actions = Vec::new();

        assert_eq!(orchestrator.handle_signal(error_signal(), start), Decision::Scheduled);
        for offset in 0..590 {
            let now = start + Duration::seconds(offset);
            // 故障持续存在
            orchestrator.handle_signal(error_signal(), now);
            actions.extend(orchestrator.poll(now, &unhealthy()));
        }

        assert_eq!(count_restarts(&actions), 10);
        assert_eq!(count_escalations(&actions), 1);
        assert_eq!(orchestrator.state(), RecoveryState::Escalated);

        let status = orchestrator.status(start + Duration::seconds(589));
        assert_eq!(status.restart_count, 10);
        assert_eq!(status.escalations, 1);
        assert!(status
            .history
            .iter()
            .all(|a| a.outcome == AttemptOutcome::Failed));
        assert_eq!(
            status.last_fault.map(|f| f.kind),
            Some("restart_budget_exceeded".to_string())
        );
    }

    #[test]
    fn test_escalated_rearms_after_window_rolls() {
        let start = Utc::now();
        let mut orchestrator = RecoveryOrchestrator::new(policy(2, 0, 10), start);

        orchestrator.handle_signal(error_signal(), start);
        let mut offset = 0;
        while orchestrator.state() != RecoveryState::Escalated {
            orchestrator.poll(start + Duration::seconds(offset), &unhealthy());
            offset += 1;
            assert!(offset < 100);
        }

        // 窗口内保持升级状态
        let inside = start + Duration::seconds(300);
        assert_eq!(orchestrator.handle_signal(error_signal(), inside), Decision::Ignored);
        assert!(orchestrator.poll(inside, &unhealthy()).is_empty());

        // 首次重启滑出窗口后恢复
        let after = start + Duration::seconds(620);
        orchestrator.poll(after, &unhealthy());
        assert_eq!(orchestrator.state(), RecoveryState::Idle);
        assert_eq!(orchestrator.handle_signal(error_signal(), after), Decision::Scheduled);
    }

    #[test]
    fn test_healthy_restart_enters_cooldown_then_idle() {
        let start = Utc::now();
        let mut orchestrator = RecoveryOrchestrator::new(policy(5, 0, 60), start);

        orchestrator.handle_signal(HealthSignal::StuckPipeline, start);
        let actions = orchestrator.poll(start, &unhealthy());
        assert_eq!(count_restarts(&actions), 1);

        let healthy = Observation {
            state: PipelineState::Playing,
            latest_artifact: Some(start + Duration::seconds(4)),
        };
        orchestrator.poll(start + Duration::seconds(5), &healthy);
        assert_eq!(orchestrator.state(), RecoveryState::Cooldown);

        // 冷却期间信号被忽略
        assert_eq!(
            orchestrator.handle_signal(HealthSignal::StuckPipeline, start + Duration::seconds(10)),
            Decision::Ignored
        );

        orchestrator.poll(start + Duration::seconds(65), &healthy);
        assert_eq!(orchestrator.state(), RecoveryState::Idle);
        assert_eq!(
            orchestrator.status(start + Duration::seconds(65)).history[0].outcome,
            AttemptOutcome::Succeeded
        );
    }

    #[test]
    fn test_stale_artifact_is_not_healthy() {
        let start = Utc::now();
        let observation = Observation {
            state: PipelineState::Playing,
            latest_artifact: Some(start - Duration::seconds(1)),
        };
        assert!(!observation.healthy_since(start));
    }

    #[test]
    fn test_disabled_category_only_alerts() {
        let start = Utc::now();
        let mut policy = policy(5, 0, 60);
        policy.auto_recovery.stream_restart = false;
        let mut orchestrator = RecoveryOrchestrator::new(policy, start);

        let decision = orchestrator.handle_signal(HealthSignal::StreamInactive { last_update: None }, start);
        assert_eq!(decision, Decision::AlertOnly);

        let actions = orchestrator.poll(start, &unhealthy());
        assert_eq!(count_restarts(&actions), 0);
        assert!(matches!(
            &actions[0],
            RecoveryAction::Alert { category, .. } if category == "stream_inactive"
        ));
        assert_eq!(orchestrator.state(), RecoveryState::Idle);
    }

    #[test]
    fn test_disk_pressure_requests_cleanup_without_restart() {
        let start = Utc::now();
        let mut orchestrator = RecoveryOrchestrator::new(policy(5, 0, 60), start);

        let decision = orchestrator.handle_signal(
            HealthSignal::ResourceThresholdExceeded {
                kind: ResourceKind::Disk,
                value: 93.0,
            },
            start,
        );
        assert_eq!(decision, Decision::CleanupRequested);

        let cpu = orchestrator.handle_signal(
            HealthSignal::ResourceThresholdExceeded {
                kind: ResourceKind::Cpu,
                value: 97.0,
            },
            start,
        );
        assert_eq!(cpu, Decision::AlertOnly);

        let actions = orchestrator.poll(start, &unhealthy());
        assert!(actions.contains(&RecoveryAction::Cleanup));
        assert_eq!(count_restarts(&actions), 0);
        assert_eq!(orchestrator.state(), RecoveryState::Idle);
    }

    #[test]
    fn test_restart_error_counts_as_failed_attempt() {
        let start = Utc::now();
        let mut orchestrator = RecoveryOrchestrator::new(policy(5, 0, 60), start);

        orchestrator.handle_signal(HealthSignal::ProcessExited { code: Some(1) }, start);
        orchestrator.poll(start, &unhealthy());
        assert_eq!(orchestrator.state(), RecoveryState::Restarting);

        orchestrator.report_restart_error("systemctl exited with status 1", start);
        assert_eq!(orchestrator.state(), RecoveryState::AwaitingRestart);
        assert_eq!(
            orchestrator.status(start).history[0].outcome,
            AttemptOutcome::Failed
        );
    }

    #[test]
    fn test_abort_leaves_idle() {
        let start = Utc::now();
        let mut orchestrator = RecoveryOrchestrator::new(policy(5, 0, 60), start);

        orchestrator.handle_signal(HealthSignal::StuckPipeline, start);
        orchestrator.poll(start, &unhealthy());
        assert_eq!(orchestrator.state(), RecoveryState::Restarting);

        orchestrator.abort_to_idle(start);
        assert_eq!(orchestrator.state(), RecoveryState::Idle);
        assert_eq!(
            orchestrator.status(start).history[0].outcome,
            AttemptOutcome::Failed
        );
    }

    #[test]
    fn test_manual_restart_recorded_and_blocks_while_in_flight() {
        let start = Utc::now();
        let mut orchestrator = RecoveryOrchestrator::new(policy(5, 0, 600), start);

        assert_eq!(orchestrator.begin_manual_restart(start), Some(1));
        assert_eq!(orchestrator.state(), RecoveryState::Restarting);
        assert_eq!(orchestrator.restart_count(), 1);
        // 手动重启由调用方执行，不产生 Restart 动作
        assert_eq!(count_restarts(&orchestrator.poll(start, &unhealthy())), 0);

        assert_eq!(orchestrator.begin_manual_restart(start), None);
        assert_eq!(
            orchestrator.handle_signal(HealthSignal::StuckPipeline, start),
            Decision::Coalesced
        );
    }

    #[test]
    fn test_manual_restart_rejected_during_automatic_recovery() {
        let start = Utc::now();
        let mut orchestrator = RecoveryOrchestrator::new(policy(5, 30, 600), start);

        orchestrator.handle_signal(HealthSignal::ProcessExited { code: Some(1) }, start);
        assert_eq!(orchestrator.state(), RecoveryState::AwaitingRestart);
        assert_eq!(orchestrator.begin_manual_restart(start), None);

        let later = start + Duration::seconds(30);
        orchestrator.poll(later, &unhealthy());
        assert_eq!(orchestrator.state(), RecoveryState::Restarting);
        assert_eq!(orchestrator.begin_manual_restart(later), None);
        assert_eq!(orchestrator.status(later).history.len(), 1);
    }

    #[test]
    fn test_service_down_schedules_restart() {
        let start = Utc::now();
        let mut orchestrator = RecoveryOrchestrator::new(policy(5, 0, 60), start);

        let signal = HealthSignal::ServiceDown {
            state: PipelineState::Stopped,
        };
        assert_eq!(signal.alert_category(), "service_down");
        assert_eq!(signal.severity(), AlertSeverity::Critical);
        assert_eq!(orchestrator.handle_signal(signal, start), Decision::Scheduled);

        let actions = orchestrator.poll(start, &unhealthy());
        assert_eq!(count_restarts(&actions), 1);
        assert!(actions.iter().any(|a| matches!(
            a,
            RecoveryAction::Alert { category, .. } if category == "service_down"
        )));
    }
}
