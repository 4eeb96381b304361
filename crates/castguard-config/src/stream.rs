use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 推流配置（采集参数 + 恢复预算）
///
/// 采集参数只透传给外部流水线，监控侧只使用 `segment_duration`、`output_dir`
/// 以及重启/错误预算。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// 码率 (kbps)
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    /// 关键帧间隔（秒）
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: u32,

    /// 分片时长（秒）
    #[serde(default = "default_segment_duration")]
    pub segment_duration: u64,

    /// HLS 输出目录
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// 分片文件扩展名
    #[serde(default = "default_segment_extension")]
    pub segment_extension: String,

    /// 播放列表文件名
    #[serde(default = "default_playlist_name")]
    pub playlist_name: String,

    /// 重启窗口内允许的最大重启次数
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// 重启窗口（秒）
    #[serde(default = "default_restart_window")]
    pub restart_window: u64,

    /// 重启前等待（秒）
    #[serde(default = "default_restart_delay")]
    pub restart_delay: u64,

    /// 重启后判定恢复成功的宽限期（秒）
    #[serde(default = "default_recovery_grace")]
    pub recovery_grace: u64,

    /// 恢复成功后的冷却期（秒）
    #[serde(default = "default_recovery_cooldown")]
    pub recovery_cooldown: u64,

    /// Playing 状态下无状态变化且无新分片多久视为卡死（秒）
    #[serde(default = "default_stuck_grace")]
    pub stuck_grace: u64,

    /// 错误窗口内的最大错误数
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,

    /// 错误窗口（秒）
    #[serde(default = "default_error_window")]
    pub error_window: u64,

    /// 相同错误合并为一次突发的间隔（秒）
    #[serde(default = "default_burst_interval")]
    pub burst_interval: u64,

    #[serde(default)]
    pub live_streaming: LiveStreamingConfig,
}

/// 直播分片保留策略
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiveStreamingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_segments")]
    pub max_segments: usize,

    /// 紧急清理后保留的分片数
    #[serde(default = "default_emergency_segments")]
    pub emergency_segments: usize,

    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold_percent: f64,

    #[serde(default = "default_emergency_threshold")]
    pub emergency_cleanup_threshold_percent: f64,

    /// 紧急清理连续多少轮仍无法降到阈值以下时升级告警
    #[serde(default = "default_resource_escalation_cycles")]
    pub resource_escalation_cycles: u32,
}

// 默认值函数
fn default_fps() -> u32 {
    30
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_bitrate() -> u32 {
    5000
}

fn default_keyframe_interval() -> u32 {
    2
}

fn default_segment_duration() -> u64 {
    2
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/tmp/hls")
}

fn default_segment_extension() -> String {
    "ts".to_string()
}

fn default_playlist_name() -> String {
    "playlist.m3u8".to_string()
}

fn default_max_restarts() -> u32 {
    5
}

fn default_restart_window() -> u64 {
    600
}

fn default_restart_delay() -> u64 {
    30
}

fn default_recovery_grace() -> u64 {
    60
}

fn default_recovery_cooldown() -> u64 {
    60
}

fn default_stuck_grace() -> u64 {
    30
}

fn default_max_errors() -> usize {
    5
}

fn default_error_window() -> u64 {
    300
}

fn default_burst_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_max_segments() -> usize {
    10
}

fn default_emergency_segments() -> usize {
    3
}

fn default_cleanup_threshold() -> f64 {
    70.0
}

fn default_emergency_threshold() -> f64 {
    85.0
}

fn default_resource_escalation_cycles() -> u32 {
    3
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            width: default_width(),
            height: default_height(),
            bitrate: default_bitrate(),
            keyframe_interval: default_keyframe_interval(),
            segment_duration: default_segment_duration(),
            output_dir: default_output_dir(),
            segment_extension: default_segment_extension(),
            playlist_name: default_playlist_name(),
            max_restarts: default_max_restarts(),
            restart_window: default_restart_window(),
            restart_delay: default_restart_delay(),
            recovery_grace: default_recovery_grace(),
            recovery_cooldown: default_recovery_cooldown(),
            stuck_grace: default_stuck_grace(),
            max_errors: default_max_errors(),
            error_window: default_error_window(),
            burst_interval: default_burst_interval(),
            live_streaming: LiveStreamingConfig::default(),
        }
    }
}

impl Default for LiveStreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_segments: default_max_segments(),
            emergency_segments: default_emergency_segments(),
            cleanup_threshold_percent: default_cleanup_threshold(),
            emergency_cleanup_threshold_percent: default_emergency_threshold(),
            resource_escalation_cycles: default_resource_escalation_cycles(),
        }
    }
}
