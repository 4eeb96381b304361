use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::SupervisorConfig;

/// 环境变量前缀，例如 `CASTGUARD_STREAM__MAX_ERRORS=8`
pub const ENV_PREFIX: &str = "CASTGUARD";

/// 配置加载器
pub struct ConfigLoader {
    config_path: PathBuf,
    use_env: bool,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            use_env: true,
        }
    }

    /// 不读取环境变量覆盖
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// 加载并校验配置
    pub fn load(&self) -> Result<SupervisorConfig, ConfigError> {
        let mut builder = Config::builder();

        if self.config_path.exists() {
            let path = self
                .config_path
                .to_str()
                .ok_or_else(|| ConfigError::InvalidPath(self.config_path.display().to_string()))?;
            builder = builder.add_source(File::new(path, Self::format_of(&self.config_path)));
            info!("Loading supervisor config from {:?}", self.config_path);
        } else {
            // 配置文件不存在时使用默认配置
            warn!(
                "Config file {:?} not found, using defaults",
                self.config_path
            );
        }

        if self.use_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: SupervisorConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn format_of(path: &Path) -> FileFormat {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => FileFormat::Json,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            _ => FileFormat::Toml,
        }
    }
}

impl SupervisorConfig {
    /// 导出为 TOML，用于生成初始配置文件
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval == 0 {
            return Err(ConfigError::invalid("check_interval", "must be greater than 0"));
        }
        if self.max_alerts == 0 {
            return Err(ConfigError::invalid("max_alerts", "must be greater than 0"));
        }

        let stream = &self.stream;
        if stream.segment_duration == 0 {
            return Err(ConfigError::invalid("stream.segment_duration", "must be greater than 0"));
        }
        if stream.error_window == 0 {
            return Err(ConfigError::invalid("stream.error_window", "must be greater than 0"));
        }
        if stream.restart_window == 0 {
            return Err(ConfigError::invalid("stream.restart_window", "must be greater than 0"));
        }
        if stream.max_errors == 0 {
            return Err(ConfigError::invalid("stream.max_errors", "must be greater than 0"));
        }
        if stream.segment_extension.is_empty() {
            return Err(ConfigError::invalid("stream.segment_extension", "must not be empty"));
        }

        let live = &stream.live_streaming;
        if live.emergency_segments > live.max_segments {
            return Err(ConfigError::invalid(
                "stream.live_streaming.emergency_segments",
                format!(
                    "emergency_segments ({}) cannot be greater than max_segments ({})",
                    live.emergency_segments, live.max_segments
                ),
            ));
        }
        check_percent(
            "stream.live_streaming.cleanup_threshold_percent",
            live.cleanup_threshold_percent,
        )?;
        check_percent(
            "stream.live_streaming.emergency_cleanup_threshold_percent",
            live.emergency_cleanup_threshold_percent,
        )?;
        if live.emergency_cleanup_threshold_percent < live.cleanup_threshold_percent {
            return Err(ConfigError::invalid(
                "stream.live_streaming.emergency_cleanup_threshold_percent",
                "must not be lower than cleanup_threshold_percent",
            ));
        }

        let resources = &self.resources;
        if resources.consecutive_samples == 0 {
            return Err(ConfigError::invalid("resources.consecutive_samples", "must be greater than 0"));
        }
        if resources.history_size < resources.consecutive_samples {
            return Err(ConfigError::invalid(
                "resources.history_size",
                "must hold at least consecutive_samples samples",
            ));
        }
        check_percent("resources.cpu_percent", resources.cpu_percent)?;
        check_percent("resources.memory_percent", resources.memory_percent)?;
        check_percent("resources.disk_percent", resources.disk_percent)?;

        let scheduler = &self.scheduler;
        for (field, value) in [
            ("scheduler.pipeline_poll_ms", scheduler.pipeline_poll_ms),
            ("scheduler.stream_check_ms", scheduler.stream_check_ms),
            ("scheduler.resource_sample_ms", scheduler.resource_sample_ms),
            ("scheduler.orchestrator_tick_ms", scheduler.orchestrator_tick_ms),
            ("scheduler.error_sweep_ms", scheduler.error_sweep_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than 0"));
            }
        }

        if self.email_alerts.enabled {
            if self.email_alerts.smtp_server.is_empty() {
                return Err(ConfigError::invalid("email_alerts.smtp_server", "required when enabled"));
            }
            if self.email_alerts.to_email.is_empty() || self.email_alerts.from_email.is_empty() {
                return Err(ConfigError::invalid(
                    "email_alerts.to_email",
                    "from_email and to_email are required when enabled",
                ));
            }
        }
        if self.webhook_alerts.enabled && self.webhook_alerts.url.is_empty() {
            return Err(ConfigError::invalid("webhook_alerts.url", "required when enabled"));
        }

        Ok(())
    }
}

fn check_percent(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(ConfigError::invalid(field, format!("{} is not a percentage", value)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_default_config_when_missing() {
        let temp_dir = tempdir().unwrap();
        let loader = ConfigLoader::new(temp_dir.path().join("castguard.toml")).without_env();

        let config = loader.load().unwrap();
        assert_eq!(config.check_interval, 30);
        assert_eq!(config.stream.segment_duration, 2);
    }

    #[test]
    fn test_load_toml_config_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_content = r#"
check_interval = 15
max_alerts = 4

[auto_recovery]
stream_restart = false

[stream]
segment_duration = 1
output_dir = "/tmp/hls_test"
max_restarts = 10

[stream.live_streaming]
max_segments = 5
emergency_segments = 2

[webhook_alerts]
enabled = true
url = "https://hooks.example.com/abc"
"#;
        let path = temp_dir.path().join("castguard.toml");
        fs::write(&path, config_content).unwrap();

        let config = ConfigLoader::new(&path).without_env().load().unwrap();

        assert_eq!(config.check_interval, 15);
        assert_eq!(config.max_alerts, 4);
        assert!(!config.auto_recovery.stream_restart);
        assert!(config.auto_recovery.service_restart);
        assert_eq!(config.stream.max_restarts, 10);
        assert_eq!(config.stream.live_streaming.emergency_segments, 2);
        assert_eq!(config.webhook_alerts.timeout, 10);
    }

    #[test]
    fn test_exported_toml_loads_back() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("castguard.toml");

        let mut config = SupervisorConfig::default();
        config.stream.max_errors = 9;
        config.resources.gpu_memory_mb = Some(4096);
        fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = ConfigLoader::new(&path).without_env().load().unwrap();
        assert_eq!(loaded.stream.max_errors, 9);
        assert_eq!(loaded.resources.gpu_memory_mb, Some(4096));
        assert_eq!(loaded.logging.directory, None);
    }

    #[test]
    fn test_load_json_config_from_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("watchdog-config.json");
        fs::write(
            &path,
            r#"{ "alert_cooldown": 120,
                 "email_alerts": { "enabled": false, "smtp_port": 2525 },
                 "stream": { "max_errors": 8 } }"#,
        )
        .unwrap();

        let config = ConfigLoader::new(&path).without_env().load().unwrap();
        assert_eq!(config.alert_cooldown, 120);
        assert_eq!(config.email_alerts.smtp_port, 2525);
        assert_eq!(config.stream.max_errors, 8);
    }

    #[test]
    fn test_validate_rejects_inverted_segments() {
        let mut config = SupervisorConfig::default();
        config.stream.live_streaming.max_segments = 2;
        config.stream.live_streaming.emergency_segments = 5;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_enabled_webhook_without_url() {
        let mut config = SupervisorConfig::default();
        config.webhook_alerts.enabled = true;

        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "webhook_alerts.url"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_percentages() {
        let mut config = SupervisorConfig::default();
        config.stream.live_streaming.emergency_cleanup_threshold_percent = 60.0;
        assert!(config.validate().is_err());

        let mut config = SupervisorConfig::default();
        config.resources.cpu_percent = 140.0;
        assert!(config.validate().is_err());
    }
}
