use crate::error::NotifyError;
use crate::message::{AlertRecord, AlertSeverity};
use crate::notifier::Notifier;
use async_trait::async_trait;
use castguard_config::{EmailAlertConfig, WebhookAlertConfig};
use std::time::Duration;
use tracing::info;

// ============================================================================
// 邮件通知
// ============================================================================

pub struct EmailNotifier {
    config: EmailAlertConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailAlertConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, record: &AlertRecord) -> Result<(), NotifyError> {
        use lettre::message::header::ContentType;
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

        let email = Message::builder()
            .from(self.config.from_email.parse()?)
            .to(self.config.to_email.parse()?)
            .subject(record.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(record.body())?;

        let mut builder = if self.config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_server)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.smtp_server)
        };
        builder = builder
            .port(self.config.smtp_port)
            .timeout(Some(self.timeout()));

        if !self.config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ));
        }

        builder.build().send(email).await?;

        info!("Email alert sent for {}", record.category);
        Ok(())
    }

    fn name(&self) -> &str {
        "email"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout)
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

// ============================================================================
// Webhook 通知
// ============================================================================

pub struct WebhookNotifier {
    config: WebhookAlertConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookAlertConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Slack 兼容的消息体
    fn build_message(&self, record: &AlertRecord) -> serde_json::Value {
        let color = match record.severity {
            AlertSeverity::Info => "good",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "danger",
        };

        serde_json::json!({
            "text": format!("Desktop Streamer Alert: {}", record.message),
            "attachments": [{
                "title": format!("Alert: {}", record.category),
                "text": record.message,
                "color": color,
                "fields": [
                    {
                        "title": "Severity",
                        "value": record.severity.as_str(),
                        "short": true
                    },
                    {
                        "title": "Time",
                        "value": record.timestamp.to_rfc3339(),
                        "short": true
                    }
                ]
            }]
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, record: &AlertRecord) -> Result<(), NotifyError> {
        let body = self.build_message(record);

        let response = self
            .client
            .post(&self.config.url)
            .timeout(self.timeout())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }

        info!("Webhook alert sent for {}", record.category);
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout)
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_webhook_payload_colour() {
        let notifier = WebhookNotifier::new(WebhookAlertConfig {
            enabled: true,
            url: "https://hooks.example.com/abc".to_string(),
            timeout: 5,
        });

        let record = AlertRecord::new(
            "restart_budget_exceeded",
            AlertSeverity::Critical,
            "Restart budget exhausted",
            Utc::now(),
        );

        let payload = notifier.build_message(&record);
        assert_eq!(payload["attachments"][0]["color"], "danger");
        assert_eq!(payload["attachments"][0]["title"], "Alert: restart_budget_exceeded");
        assert_eq!(payload["attachments"][0]["fields"][0]["value"], "critical");
        assert_eq!(notifier.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_disabled_sinks_report_disabled() {
        let email = EmailNotifier::new(EmailAlertConfig::default());
        let webhook = WebhookNotifier::new(WebhookAlertConfig::default());

        assert!(!email.is_enabled());
        assert!(!webhook.is_enabled());
        assert_eq!(email.timeout(), Duration::from_secs(30));
    }
}
