use crate::cooldown::{AlertCooldown, CooldownState};
use crate::error::NotifyError;
use crate::message::{AlertRecord, AlertSeverity};
use crate::notifier::Notifier;
use crate::providers::{EmailNotifier, WebhookNotifier};
use castguard_config::SupervisorConfig;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{error, info, warn};

const MAX_HISTORY: usize = 200;

/// 单次分发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 已分发，附带成功投递的通道数
    Delivered { sinks: usize, failed: usize },
    /// 超出类别预算被丢弃
    Dropped,
}

/// 告警分发器：类别冷却 + 多通道扇出
pub struct AlertDispatcher {
    /// 通知器列表
    notifiers: Vec<Arc<dyn Notifier>>,

    cooldown: Mutex<AlertCooldown>,

    history: RwLock<VecDeque<AlertRecord>>,

    /// 累计投递失败次数
    delivery_failures: AtomicU64,
}

impl AlertDispatcher {
    pub fn new(max_alerts: usize, alert_cooldown_secs: u64) -> Self {
        Self {
            notifiers: Vec::new(),
            cooldown: Mutex::new(AlertCooldown::new(max_alerts, alert_cooldown_secs)),
            history: RwLock::new(VecDeque::new()),
            delivery_failures: AtomicU64::new(0),
        }
    }

    /// 按配置注册已启用的通道
    pub fn from_config(config: &SupervisorConfig) -> Self {
        let mut dispatcher = Self::new(config.max_alerts, config.alert_cooldown);

        if config.email_alerts.enabled {
            dispatcher.add_notifier(Arc::new(EmailNotifier::new(config.email_alerts.clone())));
        }
        if config.webhook_alerts.enabled {
            dispatcher.add_notifier(Arc::new(WebhookNotifier::new(config.webhook_alerts.clone())));
        }

        dispatcher
    }

    /// 注册通知器
    pub fn add_notifier(&mut self, notifier: Arc<dyn Notifier>) {
        info!("Registered alert sink: {}", notifier.name());
        self.notifiers.push(notifier);
    }

    pub fn notifier_count(&self) -> usize {
        self.notifiers.len()
    }

    pub async fn notify(
        &self,
        category: &str,
        severity: AlertSeverity,
        message: &str,
    ) -> DispatchOutcome {
        self.dispatch(AlertRecord::new(category, severity, message, Utc::now()))
            .await
    }

    /// 检查冷却预算后扇出到所有启用的通道
    pub async fn dispatch(&self, record: AlertRecord) -> DispatchOutcome {
        {
            let mut cooldown = self.cooldown.lock().await;
            if !cooldown.try_acquire(&record.category, record.timestamp) {
                return DispatchOutcome::Dropped;
            }
        }

        match record.severity {
            AlertSeverity::Critical => error!(
                category = %record.category,
                "ALERT [CRITICAL]: {}", record.message
            ),
            AlertSeverity::Warning => warn!(
                category = %record.category,
                "ALERT [WARNING]: {}", record.message
            ),
            AlertSeverity::Info => info!(
                category = %record.category,
                "ALERT [INFO]: {}", record.message
            ),
        }

        {
            let mut history = self.history.write().await;
            history.push_back(record.clone());
            while history.len() > MAX_HISTORY {
                history.pop_front();
            }
        }

        let sends = self
            .notifiers
            .iter()
            .filter(|notifier| notifier.is_enabled())
            .map(|notifier| Self::send_bounded(notifier.as_ref(), &record));
        let results = join_all(sends).await;

        let failed = results.iter().filter(|ok| !**ok).count();
        self.delivery_failures
            .fetch_add(failed as u64, Ordering::Relaxed);
        DispatchOutcome::Delivered {
            sinks: results.len() - failed,
            failed,
        }
    }

    async fn send_bounded(notifier: &dyn Notifier, record: &AlertRecord) -> bool {
        let limit = notifier.timeout();
        let result = match timeout(limit, notifier.send(record)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout {
                sink: notifier.name().to_string(),
                timeout_secs: limit.as_secs(),
            }),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(
                    sink = notifier.name(),
                    category = %record.category,
                    "Alert delivery failed: {}", e
                );
                false
            }
        }
    }

    /// 最近的告警（新的在后）
    pub async fn recent(&self, limit: usize) -> Vec<AlertRecord> {
        let history = self.history.read().await;
        let start = history.len().saturating_sub(limit);
        history.iter().skip(start).cloned().collect()
    }

    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures.load(Ordering::Relaxed)
    }

    pub async fn cooldown_states(&self, now: DateTime<Utc>) -> HashMap<String, CooldownState> {
        self.cooldown.lock().await.states(now)
    }

    pub async fn cleanup_expired(&self, now: DateTime<Utc>) {
        self.cooldown.lock().await.cleanup_expired(now);
    }
}
