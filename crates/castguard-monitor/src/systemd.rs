use crate::controller::{PipelineController, PipelineEvent, ServiceManager, ServiceStatus};
use crate::error::{MonitorError, Result};
use async_trait::async_trait;
use castguard_config::ServiceConfig;
use castguard_shutdown::ShutdownToken;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const SHOW_PROPERTIES: &str = "--property=ActiveState,SubState,LoadState,UnitFileState,MainPID,ExecMainStatus";
const STATUS_LOG_LINES: &str = "10";

/// 解析 `systemctl show` 的 key=value 输出
pub fn parse_properties(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

pub fn is_error_line(line: &str) -> bool {
    line.to_ascii_uppercase().contains("ERROR")
}

/// systemd 管理的推流服务
///
/// 状态来自 `systemctl show`，错误行来自 `journalctl -f`。
pub struct SystemdUnit {
    unit: String,
    command_timeout: Duration,
    events: broadcast::Sender<PipelineEvent>,
    last_active: Mutex<Option<String>>,
}

impl SystemdUnit {
    pub fn new(config: &ServiceConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            unit: config.unit_name.clone(),
            command_timeout: Duration::from_secs(config.command_timeout),
            events,
            last_active: Mutex::new(None),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let command_line = format!("{} {}", program, args.join(" "));
        debug!(command = %command_line, "Running command");

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);

        let output = match timeout(self.command_timeout, command.output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(MonitorError::CommandTimeout {
                    command: command_line,
                    timeout_secs: self.command_timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            };
            return Err(MonitorError::Command {
                command: command_line,
                reason,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub async fn show(&self) -> Result<BTreeMap<String, String>> {
        let output = self
            .run("systemctl", &["show", self.unit.as_str(), SHOW_PROPERTIES])
            .await?;
        Ok(parse_properties(&output))
    }

    /// 最近几行服务日志
    pub async fn recent_logs(&self) -> Result<Vec<String>> {
        let output = self
            .run(
                "journalctl",
                &["-u", self.unit.as_str(), "--no-pager", "-o", "cat", "-n", STATUS_LOG_LINES],
            )
            .await?;
        Ok(output.lines().map(str::to_string).collect())
    }

    /// 跟踪服务日志，把错误行作为管道事件广播出去
    pub async fn follow_journal(&self, mut token: ShutdownToken) -> Result<()> {
        let mut child = Command::new("journalctl")
            .args(["-u", self.unit.as_str(), "-f", "-o", "cat", "-n", "0"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| MonitorError::Command {
            command: "journalctl -f".to_string(),
            reason: "stdout not captured".to_string(),
        })?;
        let mut lines = BufReader::new(stdout).lines();

        info!(unit = %self.unit, "Following service journal");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                line = lines.next_line() => match line? {
                    Some(line) if is_error_line(&line) => {
                        // 没有订阅者时丢弃
                        let _ = self.events.send(PipelineEvent::Error {
                            message: line,
                            category: None,
                        });
                    }
                    Some(_) => {}
                    None => {
                        warn!(unit = %self.unit, "journalctl exited");
                        break;
                    }
                },
            }
        }

        Ok(())
    }

    /// 记录 ActiveState 变化，新进入 failed 时返回退出码事件
    fn track_active_state(&self, properties: &BTreeMap<String, String>) -> Option<PipelineEvent> {
        let active = properties.get("ActiveState")?.clone();
        let mut last = self.last_active.lock().ok()?;

        let newly_failed = active == "failed" && last.as_deref() != Some("failed");
        *last = Some(active);

        newly_failed.then(|| PipelineEvent::Exited {
            code: properties
                .get("ExecMainStatus")
                .and_then(|s| s.parse::<i32>().ok()),
        })
    }
}

#[async_trait]
impl PipelineController for SystemdUnit {
    async fn start(&self) -> anyhow::Result<()> {
        self.run("systemctl", &["start", self.unit.as_str()]).await?;
        info!(unit = %self.unit, "Service started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.run("systemctl", &["stop", self.unit.as_str()]).await?;
        info!(unit = %self.unit, "Service stopped");
        Ok(())
    }

    async fn restart(&self) -> anyhow::Result<()> {
        self.run("systemctl", &["restart", self.unit.as_str()]).await?;
        info!(unit = %self.unit, "Service restarted");
        Ok(())
    }

    async fn poll_state(&self) -> anyhow::Result<String> {
        let properties = self.show().await?;
        if let Some(event) = self.track_active_state(&properties) {
            let _ = self.events.send(event);
        }

        Ok(properties
            .get("ActiveState")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &str {
        &self.unit
    }
}

#[async_trait]
impl ServiceManager for SystemdUnit {
    async fn reboot(&self) -> anyhow::Result<()> {
        warn!("Requesting system reboot");
        self.run("systemctl", &["reboot"]).await?;
        Ok(())
    }

    async fn status(&self) -> anyhow::Result<ServiceStatus> {
        let details = self.show().await?;
        let logs = match self.recent_logs().await {
            Ok(logs) => logs,
            Err(e) => {
                debug!("Failed to read service logs: {}", e);
                Vec::new()
            }
        };

        Ok(ServiceStatus {
            unit: self.unit.clone(),
            active: details.get("ActiveState").map(String::as_str) == Some("active"),
            details,
            logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_properties() {
        let output = "ActiveState=failed\nSubState=failed\nMainPID=0\nExecMainStatus=137\nDescription=Desktop = streamer\n";
        let properties = parse_properties(output);

        assert_eq!(properties["ActiveState"], "failed");
        assert_eq!(properties["ExecMainStatus"], "137");
        assert_eq!(properties["Description"], "Desktop = streamer");
    }

    #[test]
    fn test_error_line_detection() {
        assert!(is_error_line("ERROR: Pipeline error: Internal data stream error"));
        assert!(is_error_line("gst error from element x264enc"));
        assert!(!is_error_line("INFO: Pipeline state changed to PLAYING"));
    }

    #[test]
    fn test_failed_transition_emits_exit_once() {
        let unit = SystemdUnit::new(&ServiceConfig::default());

        let active = parse_properties("ActiveState=active\nExecMainStatus=0");
        assert!(unit.track_active_state(&active).is_none());

        let failed = parse_properties("ActiveState=failed\nExecMainStatus=1");
        assert_eq!(
            unit.track_active_state(&failed),
            Some(PipelineEvent::Exited { code: Some(1) })
        );
        // 持续 failed 不重复上报
        assert!(unit.track_active_state(&failed).is_none());
    }
}
