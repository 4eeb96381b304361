use crate::stream::FRESHNESS_SEGMENTS;
use castguard_config::StreamConfig;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// 推流管道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Starting,
    Playing,
    Paused,
    Error,
    Stopped,
    Unknown,
}

/// 原始状态名 -> 管道状态
///
/// 同时覆盖媒体引擎状态（去掉 `GST_STATE_` 前缀后）和 systemd 的 ActiveState。
const STATE_TABLE: &[(&str, PipelineState)] = &[
    // 自身名称
    ("idle", PipelineState::Idle),
    ("starting", PipelineState::Starting),
    ("playing", PipelineState::Playing),
    ("paused", PipelineState::Paused),
    ("error", PipelineState::Error),
    ("stopped", PipelineState::Stopped),
    // 媒体引擎
    ("null", PipelineState::Stopped),
    ("ready", PipelineState::Idle),
    ("void_pending", PipelineState::Starting),
    // systemd
    ("active", PipelineState::Playing),
    ("activating", PipelineState::Starting),
    ("reloading", PipelineState::Starting),
    ("deactivating", PipelineState::Stopped),
    ("inactive", PipelineState::Stopped),
    ("failed", PipelineState::Error),
];

impl PipelineState {
    /// 查表，未收录的名称返回 None
    pub fn from_raw(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let key = normalized
            .strip_prefix("gst_state_")
            .unwrap_or(normalized.as_str());

        STATE_TABLE
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, state)| *state)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Starting => "starting",
            PipelineState::Playing => "playing",
            PipelineState::Paused => "paused",
            PipelineState::Error => "error",
            PipelineState::Stopped => "stopped",
            PipelineState::Unknown => "unknown",
        }
    }

    /// 服务已不在运行
    pub fn is_down(&self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Error)
    }

    fn is_running(&self) -> bool {
        matches!(self, PipelineState::Playing | PipelineState::Paused)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 进程退出记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub at: DateTime<Utc>,
}

/// 管道状态快照
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    pub last_transition: DateTime<Utc>,
    pub last_raw: Option<String>,
    pub transitions: u64,
    /// 非正常退出次数，编排器据此只响应一次
    pub unexpected_exits: u64,
    pub last_exit: Option<ProcessExit>,
}

impl PipelineSnapshot {
    /// Playing 且超过 `grace` 没有状态变化，同时最新分片已超出新鲜度窗口
    pub fn is_stuck(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
        freshness: Duration,
        latest_artifact: Option<DateTime<Utc>>,
    ) -> bool {
        if self.state != PipelineState::Playing {
            return false;
        }
        if now - self.last_transition <= grace {
            return false;
        }

        match latest_artifact {
            Some(at) => now - at > freshness,
            None => true,
        }
    }

    /// 停止或出错持续时间超过 `after`
    pub fn down_for(&self, now: DateTime<Utc>, after: Duration) -> bool {
        self.state.is_down() && now - self.last_transition >= after
    }
}

/// 管道状态监控
pub struct PipelineStateMonitor {
    state: PipelineState,
    last_transition: DateTime<Utc>,
    last_raw: Option<String>,
    transitions: u64,
    unexpected_exits: u64,
    last_exit: Option<ProcessExit>,
    /// 本次停止已计入非正常退出
    down_counted: bool,
    /// 停止由监督器自己发起（重启中）
    planned_stop: bool,
    stuck_grace: Duration,
    freshness: Duration,
}

impl PipelineStateMonitor {
    pub fn new(config: &StreamConfig, now: DateTime<Utc>) -> Self {
        Self {
            state: PipelineState::Unknown,
            last_transition: now,
            last_raw: None,
            transitions: 0,
            unexpected_exits: 0,
            last_exit: None,
            down_counted: false,
            planned_stop: false,
            stuck_grace: Duration::seconds(config.stuck_grace as i64),
            freshness: Duration::seconds(config.segment_duration as i64) * FRESHNESS_SEGMENTS,
        }
    }

    /// 重启进行中时置位，期间的停止不算非正常退出
    pub fn set_planned_stop(&mut self, planned: bool) {
        self.planned_stop = planned;
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// 处理一条原始状态通知；未知名称记为 Unknown，不报错
    pub fn observe(&mut self, raw: &str, now: DateTime<Utc>) -> PipelineState {
        let state = match PipelineState::from_raw(raw) {
            Some(state) => state,
            None => {
                warn!(raw_state = raw, "Unmapped pipeline state, treating as unknown");
                PipelineState::Unknown
            }
        };

        if self.state.is_running() && state.is_down() && !self.planned_stop && !self.down_counted {
            warn!(from = %self.state, to = %state, "Pipeline went down without a restart in progress");
            self.unexpected_exits += 1;
            self.down_counted = true;
            self.last_exit = Some(ProcessExit { code: None, at: now });
        }

        self.last_raw = Some(raw.to_string());
        self.transition(state, now);
        state
    }

    /// 记录进程退出，返回是否属于非正常退出
    pub fn record_exit(&mut self, code: Option<i32>, now: DateTime<Utc>) -> bool {
        let unexpected = code != Some(0);

        // 轮询已经把这次停止计过一次
        if self.down_counted && self.state.is_down() {
            if let Some(exit) = self.last_exit.as_mut() {
                exit.code = code;
            }
            return false;
        }

        self.last_exit = Some(ProcessExit { code, at: now });
        if unexpected {
            self.unexpected_exits += 1;
            self.down_counted = true;
            warn!(exit_code = ?code, "Pipeline process exited unexpectedly");
            self.transition(PipelineState::Error, now);
        } else {
            info!("Pipeline process exited cleanly");
            self.transition(PipelineState::Stopped, now);
        }

        unexpected
    }

    pub fn is_stuck(&self, now: DateTime<Utc>, latest_artifact: Option<DateTime<Utc>>) -> bool {
        self.snapshot()
            .is_stuck(now, self.stuck_grace, self.freshness, latest_artifact)
    }


    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            state: self.state,
            last_transition: self.last_transition,
            last_raw: self.last_raw.clone(),
            transitions: self.transitions,
            unexpected_exits: self.unexpected_exits,
            last_exit: self.last_exit.clone(),
        }
    }

    fn transition(&mut self, state: PipelineState, now: DateTime<Utc>) {
        if state == self.state {
            return;
        }

        info!(from = %self.state, to = %state, "Pipeline state changed");
        if matches!(state, PipelineState::Playing | PipelineState::Starting) {
            self.down_counted = false;
        }
        self.state = state;
        self.last_transition = now;
        self.transitions += 1;
    }
}
