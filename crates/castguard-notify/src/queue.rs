use crate::manager::{AlertDispatcher, DispatchOutcome};
use crate::message::{AlertRecord, AlertSeverity};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 检测侧提交的告警请求
#[derive(Debug, Clone)]
pub struct AlertRequest {
    pub record: AlertRecord,
}

/// 检测循环持有的发送端，永不阻塞
#[derive(Clone)]
pub struct AlertHandle {
    tx: mpsc::Sender<AlertRequest>,
}

impl AlertHandle {
    pub fn raise(&self, category: &str, severity: AlertSeverity, message: impl Into<String>) {
        self.submit(AlertRecord::new(category, severity, message, Utc::now()));
    }

    pub fn submit(&self, record: AlertRecord) {
        if let Err(e) = self.tx.try_send(AlertRequest { record }) {
            // 队列满或发送端已关闭，丢弃，不影响检测
            warn!("Alert queue unavailable, dropping alert: {}", e);
        }
    }
}

/// 发送侧，独立任务中执行网络 I/O
pub struct AlertWorker {
    rx: mpsc::Receiver<AlertRequest>,
    dispatcher: Arc<AlertDispatcher>,
}

pub fn alert_channel(dispatcher: Arc<AlertDispatcher>, capacity: usize) -> (AlertHandle, AlertWorker) {
    let (tx, rx) = mpsc::channel(capacity);
    (AlertHandle { tx }, AlertWorker { rx, dispatcher })
}

impl AlertWorker {
    /// 所有 AlertHandle 释放后处理完剩余请求再退出
    pub async fn run(mut self) {
        info!("Alert sender started");

        while let Some(request) = self.rx.recv().await {
            let category = request.record.category.clone();
            match self.dispatcher.dispatch(request.record).await {
                DispatchOutcome::Dropped => debug!(category = %category, "Alert suppressed"),
                DispatchOutcome::Delivered { sinks, failed } => {
                    debug!(category = %category, sinks, failed, "Alert dispatched")
                }
            }
        }

        info!("Alert sender stopped");
    }
}
