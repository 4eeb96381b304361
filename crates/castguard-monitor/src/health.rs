use crate::error::FaultRecord;
use crate::error_tracker::{ErrorCategory, ErrorSnapshot};
use crate::orchestrator::{RecoveryState, RecoveryStatus, RestartAttempt};
use crate::pipeline::{PipelineSnapshot, PipelineState};
use crate::resources::{ResourceSample, ResourceSnapshot};
use crate::stream::StreamCheck;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::sync::watch;

/// 健康概要
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub monitoring_active: bool,
    pub total_errors: u64,
    pub recent_errors: usize,
    pub current_state: PipelineState,
    pub stream_active: bool,
    pub restart_count: u64,
    pub last_error: Option<String>,
    pub uptime_minutes: f64,
    pub error_counts: BTreeMap<ErrorCategory, usize>,
    pub recovery_state: RecoveryState,
    pub segment_count: usize,
    pub resources: Option<ResourceSample>,
    pub timestamp: DateTime<Utc>,
}

/// 带历史的健康详情
#[derive(Debug, Clone, Serialize)]
pub struct DetailedHealth {
    #[serde(flatten)]
    pub health: HealthSnapshot,
    pub resource_history: Vec<ResourceSample>,
    pub restart_history: Vec<RestartAttempt>,
    pub attempts_in_window: usize,
    pub escalations: u64,
    pub last_fault: Option<FaultRecord>,
}

/// 各监控发布的快照接收端
#[derive(Clone)]
pub struct SnapshotReceivers {
    pub pipeline: watch::Receiver<PipelineSnapshot>,
    pub errors: watch::Receiver<ErrorSnapshot>,
    pub stream: watch::Receiver<StreamCheck>,
    pub resources: watch::Receiver<ResourceSnapshot>,
    pub recovery: watch::Receiver<RecoveryStatus>,
    pub active: watch::Receiver<bool>,
}

/// 健康快照组装
///
/// 只读取已发布的快照，不触碰任何监控的内部状态。
#[derive(Clone)]
pub struct HealthAssembler {
    receivers: SnapshotReceivers,
    started: Instant,
}

impl HealthAssembler {
    pub fn new(receivers: SnapshotReceivers, started: Instant) -> Self {
        Self { receivers, started }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> HealthSnapshot {
        let pipeline = self.receivers.pipeline.borrow().clone();
        let errors = self.receivers.errors.borrow().clone();
        let stream = self.receivers.stream.borrow().clone();
        let recovery = self.receivers.recovery.borrow().clone();
        let resources = self.receivers.resources.borrow().latest.clone();

        // 编排器记录的故障优先，其次是最近一条错误日志
        let last_error = recovery
            .last_fault
            .as_ref()
            .map(|fault| fault.message.clone())
            .or_else(|| errors.last_error.as_ref().map(|e| e.message.clone()));

        HealthSnapshot {
            monitoring_active: *self.receivers.active.borrow(),
            total_errors: errors.total_errors,
            recent_errors: errors.recent_errors,
            current_state: pipeline.state,
            stream_active: stream.fresh,
            restart_count: recovery.restart_count,
            last_error,
            uptime_minutes: self.started.elapsed().as_secs_f64() / 60.0,
            error_counts: errors.counts,
            recovery_state: recovery.state,
            segment_count: stream.segment_count,
            resources,
            timestamp: now,
        }
    }

    pub fn detailed(&self, now: DateTime<Utc>) -> DetailedHealth {
        let health = self.snapshot(now);
        let recovery = self.receivers.recovery.borrow().clone();
        let resource_history = self.receivers.resources.borrow().history.clone();

        DetailedHealth {
            health,
            resource_history,
            restart_history: recovery.history,
            attempts_in_window: recovery.attempts_in_window,
            escalations: recovery.escalations,
            last_fault: recovery.last_fault,
        }
    }

    pub fn stream(&self) -> StreamCheck {
        self.receivers.stream.borrow().clone()
    }

    pub fn pipeline(&self) -> PipelineSnapshot {
        self.receivers.pipeline.borrow().clone()
    }
}
