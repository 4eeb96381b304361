use serde::{Deserialize, Serialize};

/// 自动恢复开关（按信号类别）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutoRecoveryConfig {
    /// 错误超限、进程异常退出时重启服务
    #[serde(default = "default_true")]
    pub service_restart: bool,

    /// 流卡死、流无输出时重启服务
    #[serde(default = "default_true")]
    pub stream_restart: bool,

    /// 资源超限时执行分片清理
    #[serde(default = "default_true")]
    pub resource_monitoring: bool,

    /// 重启预算耗尽后允许重启整机
    #[serde(default)]
    pub system_reboot: bool,
}

/// 邮件告警
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailAlertConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default = "default_true")]
    pub use_tls: bool,

    #[serde(default = "default_from_email")]
    pub from_email: String,

    #[serde(default = "default_to_email")]
    pub to_email: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// 单次发送超时（秒）
    #[serde(default = "default_email_timeout")]
    pub timeout: u64,
}

/// Webhook 告警
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookAlertConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: String,

    /// 单次请求超时（秒）
    #[serde(default = "default_webhook_timeout")]
    pub timeout: u64,
}

fn default_true() -> bool {
    true
}

fn default_smtp_server() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_email() -> String {
    "watchdog@example.com".to_string()
}

fn default_to_email() -> String {
    "admin@example.com".to_string()
}

fn default_email_timeout() -> u64 {
    30
}

fn default_webhook_timeout() -> u64 {
    10
}

impl Default for AutoRecoveryConfig {
    fn default() -> Self {
        Self {
            service_restart: true,
            stream_restart: true,
            resource_monitoring: true,
            system_reboot: false,
        }
    }
}

impl Default for EmailAlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: default_smtp_server(),
            smtp_port: default_smtp_port(),
            use_tls: true,
            from_email: default_from_email(),
            to_email: default_to_email(),
            username: String::new(),
            password: String::new(),
            timeout: default_email_timeout(),
        }
    }
}

impl Default for WebhookAlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            timeout: default_webhook_timeout(),
        }
    }
}
