use crate::error::Result;
use castguard_config::{LiveStreamingConfig, StreamConfig};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 单个输出分片
#[derive(Debug, Clone, Serialize)]
pub struct SegmentInfo {
    pub name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// 一次活跃度检查的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamCheck {
    pub fresh: bool,
    pub segment_count: usize,
    pub playlist_exists: bool,
    pub total_size_bytes: u64,
    pub latest_segment: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl StreamCheck {
    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// 一次保留清理的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub target: usize,
    pub before: usize,
    pub removed: usize,
    pub failed: usize,
    pub emergency: bool,
}

impl RetentionReport {
    pub fn remaining(&self) -> usize {
        self.before - self.removed
    }
}

/// 保留目标：磁盘占用达到紧急阈值时保留 `emergency_segments`，否则 `max_segments`
pub fn retention_target(live: &LiveStreamingConfig, disk_usage_percent: f64) -> usize {
    if disk_usage_percent >= live.emergency_cleanup_threshold_percent {
        live.emergency_segments
    } else {
        live.max_segments
    }
}

/// 新鲜度窗口包含的分片时长个数
pub(crate) const FRESHNESS_SEGMENTS: i32 = 3;

/// 输出目录活跃度与分片保留
#[derive(Debug, Clone)]
pub struct StreamActivityMonitor {
    output_dir: PathBuf,
    extension: String,
    playlist_name: String,
    segment_duration: Duration,
    live: LiveStreamingConfig,
}

impl StreamActivityMonitor {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            extension: config.segment_extension.trim_start_matches('.').to_string(),
            playlist_name: config.playlist_name.clone(),
            segment_duration: Duration::seconds(config.segment_duration as i64),
            live: config.live_streaming.clone(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 分片允许的最大陈旧时间
    pub fn freshness_window(&self) -> Duration {
        self.segment_duration * FRESHNESS_SEGMENTS
    }

    /// 列出分片，按创建顺序从旧到新
    pub async fn list_segments(&self) -> Result<Vec<SegmentInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.output_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(dir = %self.output_dir.display(), "Output directory does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut segments = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }

            // 枚举与删除之间文件可能已被轮转掉
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            let modified: DateTime<Utc> = metadata.modified()?.into();
            let created: DateTime<Utc> = metadata
                .created()
                .map(DateTime::<Utc>::from)
                .unwrap_or(modified);

            segments.push(SegmentInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                path,
                size_bytes: metadata.len(),
                created,
                modified,
            });
        }

        segments.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
        Ok(segments)
    }

    /// 最新分片在 3 个分片时长内更新过即视为活跃
    pub async fn check(&self, now: DateTime<Utc>) -> Result<StreamCheck> {
        let segments = self.list_segments().await?;
        let playlist_exists = tokio::fs::try_exists(self.output_dir.join(&self.playlist_name))
            .await
            .unwrap_or(false);

        let latest = segments.iter().max_by_key(|s| s.modified);
        let last_update = latest.map(|s| s.modified);
        let fresh = last_update
            .map(|at| now - at <= self.freshness_window())
            .unwrap_or(false);

        Ok(StreamCheck {
            fresh,
            segment_count: segments.len(),
            playlist_exists,
            total_size_bytes: segments.iter().map(|s| s.size_bytes).sum(),
            latest_segment: latest.map(|s| s.name.clone()),
            last_update,
            checked_at: Some(now),
        })
    }

    pub fn retention_target(&self, disk_usage_percent: f64) -> usize {
        retention_target(&self.live, disk_usage_percent)
    }

    /// 从最旧的分片开始删除，直到数量不超过保留目标
    ///
    /// 删除失败只记日志，下个周期重试。
    pub async fn enforce_retention(&self, disk_usage_percent: f64) -> Result<RetentionReport> {
        let segments = self.list_segments().await?;
        let target = self.retention_target(disk_usage_percent);
        let emergency = disk_usage_percent >= self.live.emergency_cleanup_threshold_percent;

        let mut report = RetentionReport {
            target,
            before: segments.len(),
            emergency,
            ..Default::default()
        };

        let excess = segments.len().saturating_sub(target);
        for segment in segments.iter().take(excess) {
            match tokio::fs::remove_file(&segment.path).await {
                Ok(()) => {
                    report.removed += 1;
                    debug!(segment = %segment.name, "Removed old segment");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    report.removed += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(segment = %segment.name, "Failed to remove segment: {}", e);
                }
            }
        }

        if report.removed > 0 {
            info!(
                removed = report.removed,
                remaining = report.remaining(),
                target,
                emergency,
                "Segment retention enforced"
            );
        }

        Ok(report)
    }
}
