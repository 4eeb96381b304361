use crate::error_tracker::ErrorCategory;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// 管道侧推送的事件
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// 原始状态名
    StateChanged(String),
    Error {
        message: String,
        category: Option<ErrorCategory>,
    },
    Exited {
        code: Option<i32>,
    },
}

/// 采集编码管道的控制接口
#[async_trait]
pub trait PipelineController: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn restart(&self) -> anyhow::Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// 主动查询当前原始状态
    async fn poll_state(&self) -> anyhow::Result<String>;

    /// 订阅状态、错误和退出事件
    fn subscribe(&self) -> broadcast::Receiver<PipelineEvent>;

    fn name(&self) -> &str;
}

/// 服务状态
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceStatus {
    pub unit: String,
    pub active: bool,
    pub details: BTreeMap<String, String>,
    /// 最近的服务日志
    pub logs: Vec<String>,
}

/// 进程/服务管理器
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// 升级后的最终手段
    async fn reboot(&self) -> anyhow::Result<()>;

    async fn status(&self) -> anyhow::Result<ServiceStatus>;
}
