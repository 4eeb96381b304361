use crate::error::NotifyError;
use crate::message::AlertRecord;
use async_trait::async_trait;
use std::time::Duration;

/// 告警通道 trait
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 发送告警
    async fn send(&self, record: &AlertRecord) -> Result<(), NotifyError>;

    /// 通道名称
    fn name(&self) -> &str;

    /// 单次发送的超时
    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    /// 是否启用
    fn is_enabled(&self) -> bool {
        true
    }
}
