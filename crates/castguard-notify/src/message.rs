use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 告警记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub severity: AlertSeverity,

    /// 告警类别，冷却预算按类别计算
    pub category: String,

    pub message: String,

    pub timestamp: DateTime<Utc>,

    /// 额外数据
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AlertRecord {
    pub fn new(
        category: impl Into<String>,
        severity: AlertSeverity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            timestamp,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// 邮件标题
    pub fn subject(&self) -> String {
        format!("Desktop Streamer Alert: {}", self.category)
    }

    /// 纯文本正文
    pub fn body(&self) -> String {
        let mut body = String::from("Desktop Streamer Alert\n\n");
        body.push_str(&format!("Type: {}\n", self.category));
        body.push_str(&format!("Severity: {}\n", self.severity));
        body.push_str(&format!("Time: {}\n", self.timestamp.to_rfc3339()));
        body.push_str(&format!("Message: {}\n", self.message));

        if let Some(metadata) = &self.metadata {
            let data = serde_json::to_string_pretty(metadata).unwrap_or_default();
            body.push_str(&format!("\nData: {}\n", data));
        }

        body
    }
}
