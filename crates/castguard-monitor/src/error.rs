use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Command `{command}` timed out after {timeout_secs}s")]
    CommandTimeout { command: String, timeout_secs: u64 },

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Metrics encoding error: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("A recovery action is already in flight")]
    RecoveryInFlight,

    #[error("Supervisor is already running")]
    AlreadyRunning,

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

/// 监督器可见的故障分类
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SupervisorFault {
    #[error("Transient pipeline error: {0}")]
    TransientPipelineError(String),

    #[error("Stream stalled: {0}")]
    StreamStalled(String),

    #[error("Resource exhaustion: {0}")]
    ResourceExhaustion(String),

    #[error("Restart budget exceeded after {attempts} attempts")]
    RestartBudgetExceeded { attempts: usize },

    #[error("Alert delivery failed: {0}")]
    SinkDeliveryFailure(String),
}

impl SupervisorFault {
    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorFault::TransientPipelineError(_) => "transient_pipeline_error",
            SupervisorFault::StreamStalled(_) => "stream_stalled",
            SupervisorFault::ResourceExhaustion(_) => "resource_exhaustion",
            SupervisorFault::RestartBudgetExceeded { .. } => "restart_budget_exceeded",
            SupervisorFault::SinkDeliveryFailure(_) => "sink_delivery_failure",
        }
    }
}

/// 最近一次故障，供健康接口展示
#[derive(Debug, Clone, Serialize)]
pub struct FaultRecord {
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl FaultRecord {
    pub fn new(fault: &SupervisorFault, at: DateTime<Utc>) -> Self {
        Self {
            kind: fault.kind().to_string(),
            message: fault.to_string(),
            at,
        }
    }
}
