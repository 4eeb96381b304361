use async_trait::async_trait;
use castguard_config::ResourceConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Disks, System};
use tokio::process::Command;
use tracing::{debug, warn};

/// 资源维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Disk,
    GpuMemory,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Cpu,
        ResourceKind::Memory,
        ResourceKind::Disk,
        ResourceKind::GpuMemory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::Disk => "disk",
            ResourceKind::GpuMemory => "gpu_memory",
        }
    }

    /// 从采样中取出该维度的值，GPU 不可用时为 None
    pub fn value(&self, sample: &ResourceSample) -> Option<f64> {
        match self {
            ResourceKind::Cpu => Some(sample.cpu_percent),
            ResourceKind::Memory => Some(sample.mem_percent),
            ResourceKind::Disk => Some(sample.disk_percent),
            ResourceKind::GpuMemory => sample.gpu_mem_mb.map(|mb| mb as f64),
        }
    }

    /// 配置里该维度的阈值，未配置则不检测
    pub fn threshold(&self, config: &ResourceConfig) -> Option<f64> {
        match self {
            ResourceKind::Cpu => Some(config.cpu_percent),
            ResourceKind::Memory => Some(config.memory_percent),
            ResourceKind::Disk => Some(config.disk_percent),
            ResourceKind::GpuMemory => config.gpu_memory_mb.map(|mb| mb as f64),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次资源采样
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub disk_percent: f64,
    pub gpu_mem_mb: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// 发布给编排器和健康接口的资源快照
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceSnapshot {
    pub latest: Option<ResourceSample>,
    pub history: Vec<ResourceSample>,
    /// 连续超限的维度
    pub exceeded: Vec<ResourceKind>,
}

/// GPU 显存探测
#[async_trait]
pub trait GpuProbe: Send + Sync {
    /// 已用显存（MB），不可用时返回 None
    async fn memory_used_mb(&self) -> Option<u64>;

    fn name(&self) -> &str;
}

/// 通过 nvidia-smi 读取显存
pub struct NvidiaSmiProbe {
    timeout: Duration,
}

impl NvidiaSmiProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// 多卡时取第一张卡
pub fn parse_nvidia_smi_memory(output: &str) -> Option<u64> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<u64>().ok())
}

#[async_trait]
impl GpuProbe for NvidiaSmiProbe {
    async fn memory_used_mb(&self) -> Option<u64> {
        let mut command = Command::new("nvidia-smi");
        command
            .args(["--query-gpu=memory.used", "--format=csv,noheader,nounits"])
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_nvidia_smi_memory(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                debug!(status = ?output.status, "nvidia-smi returned failure");
                None
            }
            Ok(Err(e)) => {
                debug!("nvidia-smi unavailable: {}", e);
                None
            }
            Err(_) => {
                warn!("nvidia-smi timed out after {:?}", self.timeout);
                None
            }
        }
    }

    fn name(&self) -> &str {
        "nvidia-smi"
    }
}

/// 按最长挂载点前缀找到 `path` 所在的文件系统，返回使用率
pub fn disk_usage_for(path: &Path, mounts: &[(PathBuf, u64, u64)]) -> Option<f64> {
    mounts
        .iter()
        .filter(|(mount, total, _)| *total > 0 && path.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.as_os_str().len())
        .map(|(_, total, available)| {
            let used = total.saturating_sub(*available);
            used as f64 / *total as f64 * 100.0
        })
}

/// 资源监控
pub struct ResourceMonitor {
    system: System,
    disks: Disks,
    disk_path: PathBuf,
    history: VecDeque<ResourceSample>,
    history_size: usize,
    gpu_probe: Option<Arc<dyn GpuProbe>>,
}

impl ResourceMonitor {
    pub fn new(config: &ResourceConfig, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            system: System::new(),
            disks: Disks::new_with_refreshed_list(),
            disk_path: disk_path.into(),
            history: VecDeque::with_capacity(config.history_size),
            history_size: config.history_size.max(1),
            gpu_probe: None,
        }
    }

    pub fn with_gpu_probe(mut self, probe: Arc<dyn GpuProbe>) -> Self {
        self.gpu_probe = Some(probe);
        self
    }

    /// 采样一次并写入历史
    pub async fn sample(&mut self, now: DateTime<Utc>) -> ResourceSample {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.disks.refresh();

        let cpu_percent = self.system.global_cpu_info().cpu_usage() as f64;

        let total_memory = self.system.total_memory();
        let mem_percent = if total_memory > 0 {
            self.system.used_memory() as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };

        // 输出目录可能尚未创建，按原路径匹配挂载点
        let path = tokio::fs::canonicalize(&self.disk_path)
            .await
            .unwrap_or_else(|_| self.disk_path.clone());
        let mounts: Vec<(PathBuf, u64, u64)> = self
            .disks
            .list()
            .iter()
            .map(|d| (d.mount_point().to_path_buf(), d.total_space(), d.available_space()))
            .collect();
        let disk_percent = disk_usage_for(&path, &mounts).unwrap_or(0.0);

        let gpu_mem_mb = match &self.gpu_probe {
            Some(probe) => probe.memory_used_mb().await,
            None => None,
        };

        let sample = ResourceSample {
            cpu_percent,
            mem_percent,
            disk_percent,
            gpu_mem_mb,
            timestamp: now,
        };

        debug!(
            cpu = cpu_percent,
            memory = mem_percent,
            disk = disk_percent,
            gpu_mb = ?gpu_mem_mb,
            "Resource sample"
        );

        self.push_sample(sample.clone());
        sample
    }

    pub fn push_sample(&mut self, sample: ResourceSample) {
        self.history.push_back(sample);
        while self.history.len() > self.history_size {
            self.history.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&ResourceSample> {
        self.history.back()
    }

    pub fn history(&self) -> impl Iterator<Item = &ResourceSample> {
        self.history.iter()
    }

    /// 最近 `consecutive_n` 个采样全部超过阈值才算超限
    pub fn threshold_exceeded(&self, kind: ResourceKind, threshold: f64, consecutive_n: usize) -> bool {
        if consecutive_n == 0 || self.history.len() < consecutive_n {
            return false;
        }

        self.history
            .iter()
            .rev()
            .take(consecutive_n)
            .all(|sample| kind.value(sample).map_or(false, |v| v > threshold))
    }

    pub fn snapshot(&self, config: &ResourceConfig) -> ResourceSnapshot {
        let exceeded = ResourceKind::ALL
            .iter()
            .copied()
            .filter(|kind| {
                kind.threshold(config).map_or(false, |threshold| {
                    self.threshold_exceeded(*kind, threshold, config.consecutive_samples)
                })
            })
            .collect();

        ResourceSnapshot {
            latest: self.latest().cloned(),
            history: self.history.iter().cloned().collect(),
            exceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f64, gpu: Option<u64>) -> ResourceSample {
        ResourceSample {
            cpu_percent: cpu,
            mem_percent: 40.0,
            disk_percent: 50.0,
            gpu_mem_mb: gpu,
            timestamp: Utc::now(),
        }
    }

    fn monitor() -> ResourceMonitor {
        let config = ResourceConfig {
            history_size: 5,
            ..Default::default()
        };
        ResourceMonitor::new(&config, "/tmp")
    }

    #[test]
    fn test_debounce_requires_consecutive_samples() {
        let mut monitor = monitor();

        monitor.push_sample(sample(95.0, None));
        monitor.push_sample(sample(95.0, None));
        assert!(!monitor.threshold_exceeded(ResourceKind::Cpu, 90.0, 3));

        monitor.push_sample(sample(95.0, None));
        assert!(monitor.threshold_exceeded(ResourceKind::Cpu, 90.0, 3));

        // 一个正常采样打断连续超限
        monitor.push_sample(sample(20.0, None));
        assert!(!monitor.threshold_exceeded(ResourceKind::Cpu, 90.0, 3));
    }

    #[test]
    fn test_single_spike_does_not_trip() {
        let mut monitor = monitor();
        monitor.push_sample(sample(20.0, None));
        monitor.push_sample(sample(99.0, None));
        monitor.push_sample(sample(20.0, None));

        assert!(!monitor.threshold_exceeded(ResourceKind::Cpu, 90.0, 1));
        assert!(!monitor.threshold_exceeded(ResourceKind::Cpu, 90.0, 2));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut monitor = monitor();
        for i in 0..8 {
            monitor.push_sample(sample(i as f64, None));
        }

        assert_eq!(monitor.history().count(), 5);
        assert_eq!(monitor.latest().map(|s| s.cpu_percent), Some(7.0));
    }

    #[test]
    fn test_missing_gpu_never_trips() {
        let mut monitor = monitor();
        for _ in 0..3 {
            monitor.push_sample(sample(10.0, None));
        }
        assert!(!monitor.threshold_exceeded(ResourceKind::GpuMemory, 0.0, 3));

        let config = ResourceConfig {
            gpu_memory_mb: Some(2048),
            ..Default::default()
        };
        assert!(monitor.snapshot(&config).exceeded.is_empty());
    }

    #[test]
    fn test_snapshot_lists_exceeded_kinds() {
        let mut monitor = monitor();
        for _ in 0..3 {
            monitor.push_sample(sample(97.0, Some(3000)));
        }

        let config = ResourceConfig {
            gpu_memory_mb: Some(2048),
            ..Default::default()
        };
        let snapshot = monitor.snapshot(&config);
        assert_eq!(snapshot.exceeded, vec![ResourceKind::Cpu, ResourceKind::GpuMemory]);
        assert_eq!(snapshot.history.len(), 3);
    }

    #[test]
    fn test_disk_usage_uses_longest_mount_prefix() {
        let mounts = vec![
            (PathBuf::from("/"), 1000, 900),
            (PathBuf::from("/tmp"), 1000, 100),
        ];

        let usage = disk_usage_for(Path::new("/tmp/hls"), &mounts).unwrap();
        assert!((usage - 90.0).abs() < 1e-9);

        let root = disk_usage_for(Path::new("/var/hls"), &mounts).unwrap();
        assert!((root - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_nvidia_smi_output() {
        assert_eq!(parse_nvidia_smi_memory("1234\n567\n"), Some(1234));
        assert_eq!(parse_nvidia_smi_memory("\n  812 \n"), Some(812));
        assert_eq!(parse_nvidia_smi_memory("N/A"), None);
        assert_eq!(parse_nvidia_smi_memory(""), None);
    }
}
