use serde::{Deserialize, Serialize};

use crate::alerts::{AutoRecoveryConfig, EmailAlertConfig, WebhookAlertConfig};
use crate::stream::StreamConfig;

/// 监控进程全局配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupervisorConfig {
    /// 看门狗级检查间隔（秒）
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// 每个告警类别在冷却窗口内最多发送的条数
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,

    /// 告警冷却窗口（秒）
    #[serde(default = "default_alert_cooldown")]
    pub alert_cooldown: u64,

    #[serde(default)]
    pub auto_recovery: AutoRecoveryConfig,

    #[serde(default)]
    pub email_alerts: EmailAlertConfig,

    #[serde(default)]
    pub webhook_alerts: WebhookAlertConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub resources: ResourceConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 资源阈值
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourceConfig {
    /// 保留的采样条数
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// 连续多少个采样超限才算超限
    #[serde(default = "default_consecutive_samples")]
    pub consecutive_samples: usize,

    #[serde(default = "default_cpu_percent")]
    pub cpu_percent: f64,

    #[serde(default = "default_memory_percent")]
    pub memory_percent: f64,

    #[serde(default = "default_disk_percent")]
    pub disk_percent: f64,

    /// GPU 显存上限（MB），为空则不检测
    #[serde(default)]
    pub gpu_memory_mb: Option<u64>,
}

/// 各监控任务的调度周期（毫秒）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_pipeline_poll_ms")]
    pub pipeline_poll_ms: u64,

    #[serde(default = "default_stream_check_ms")]
    pub stream_check_ms: u64,

    #[serde(default = "default_resource_sample_ms")]
    pub resource_sample_ms: u64,

    #[serde(default = "default_orchestrator_tick_ms")]
    pub orchestrator_tick_ms: u64,

    #[serde(default = "default_error_sweep_ms")]
    pub error_sweep_ms: u64,

    /// 关闭时等待在途任务的最长时间
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

/// 被监控的系统服务
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default = "default_unit_name")]
    pub unit_name: String,

    /// 是否跟踪 journalctl 输出中的错误行
    #[serde(default = "default_true")]
    pub journal: bool,

    /// systemctl 命令超时（秒）
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// pretty | json
    #[serde(default = "default_log_format")]
    pub format: String,

    /// 设置后按天滚动写入该目录
    #[serde(default)]
    pub directory: Option<String>,
}

// 默认值函数
fn default_check_interval() -> u64 {
    30
}

fn default_max_alerts() -> usize {
    10
}

fn default_alert_cooldown() -> u64 {
    300
}

fn default_history_size() -> usize {
    60
}

fn default_consecutive_samples() -> usize {
    3
}

fn default_cpu_percent() -> f64 {
    90.0
}

fn default_memory_percent() -> f64 {
    90.0
}

fn default_disk_percent() -> f64 {
    90.0
}

fn default_pipeline_poll_ms() -> u64 {
    5_000
}

fn default_stream_check_ms() -> u64 {
    10_000
}

fn default_resource_sample_ms() -> u64 {
    10_000
}

fn default_orchestrator_tick_ms() -> u64 {
    1_000
}

fn default_error_sweep_ms() -> u64 {
    30_000
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

fn default_unit_name() -> String {
    "desktop-streamer.service".to_string()
}

fn default_true() -> bool {
    true
}

fn default_command_timeout() -> u64 {
    30
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            max_alerts: default_max_alerts(),
            alert_cooldown: default_alert_cooldown(),
            auto_recovery: AutoRecoveryConfig::default(),
            email_alerts: EmailAlertConfig::default(),
            webhook_alerts: WebhookAlertConfig::default(),
            stream: StreamConfig::default(),
            resources: ResourceConfig::default(),
            scheduler: SchedulerConfig::default(),
            service: ServiceConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            consecutive_samples: default_consecutive_samples(),
            cpu_percent: default_cpu_percent(),
            memory_percent: default_memory_percent(),
            disk_percent: default_disk_percent(),
            gpu_memory_mb: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pipeline_poll_ms: default_pipeline_poll_ms(),
            stream_check_ms: default_stream_check_ms(),
            resource_sample_ms: default_resource_sample_ms(),
            orchestrator_tick_ms: default_orchestrator_tick_ms(),
            error_sweep_ms: default_error_sweep_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            unit_name: default_unit_name(),
            journal: true,
            command_timeout: default_command_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: None,
        }
    }
}
