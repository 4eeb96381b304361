use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Pipeline,
    Encoder,
    Streaming,
    Capture,
    Other,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 5] = [
        ErrorCategory::Pipeline,
        ErrorCategory::Encoder,
        ErrorCategory::Streaming,
        ErrorCategory::Capture,
        ErrorCategory::Other,
    ];

    /// 按消息内容归类
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["encod", "x264", "nvenc", "vaapi", "bitrate"]) {
            ErrorCategory::Encoder
        } else if has(&["capture", "ximage", "display", "screen"]) {
            ErrorCategory::Capture
        } else if has(&["hls", "segment", "playlist", "sink", "stream"]) {
            ErrorCategory::Streaming
        } else if has(&["pipeline", "gst", "element", "state change"]) {
            ErrorCategory::Pipeline
        } else {
            ErrorCategory::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Pipeline => "pipeline",
            ErrorCategory::Encoder => "encoder",
            ErrorCategory::Streaming => "streaming",
            ErrorCategory::Capture => "capture",
            ErrorCategory::Other => "other",
        }
    }
}

/// 一次错误上报
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub category: ErrorCategory,
}

impl ErrorEvent {
    pub fn new(message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let message = message.into();
        let category = ErrorCategory::classify(&message);
        Self {
            timestamp,
            message,
            category,
        }
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }
}

/// 错误窗口快照
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorSnapshot {
    pub total_errors: u64,
    pub recent_errors: usize,
    pub burst_units: usize,
    pub threshold_exceeded: bool,
    pub counts: BTreeMap<ErrorCategory, usize>,
    pub last_error: Option<ErrorEvent>,
}

/// 滑动窗口错误计数
///
/// 窗口为闭区间 `[now - window, now]`，过期条目在读取或清扫时淘汰。
/// 阈值判断按突发单元计：相同消息且与前一条间隔不超过 `burst_interval` 的连续错误算一个单元。
pub struct ErrorTracker {
    events: VecDeque<ErrorEvent>,
    window: Duration,
    burst_interval: Duration,
    acknowledged_at: Option<DateTime<Utc>>,
    total_errors: u64,
    last_error: Option<ErrorEvent>,
}

impl ErrorTracker {
    pub fn new(window_secs: u64, burst_interval_secs: u64) -> Self {
        Self {
            events: VecDeque::new(),
            window: Duration::seconds(window_secs as i64),
            burst_interval: Duration::seconds(burst_interval_secs as i64),
            acknowledged_at: None,
            total_errors: 0,
            last_error: None,
        }
    }

    pub fn record(&mut self, event: ErrorEvent) {
        debug!(
            category = event.category.as_str(),
            "Error recorded: {}", event.message
        );

        self.total_errors += 1;
        self.last_error = Some(event.clone());

        // 保持时间顺序，乱序到达的事件插到合适位置
        let position = self
            .events
            .iter()
            .rposition(|e| e.timestamp <= event.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.events.insert(position, event);

        if let Some(latest) = self.events.back().map(|e| e.timestamp) {
            self.sweep(latest);
        }
    }

    /// 淘汰窗口外的事件，返回淘汰数
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        while let Some(front) = self.events.front() {
            if now - front.timestamp > self.window {
                self.events.pop_front();
                evicted += 1;
            } else {
                break;
            }
        }
        evicted
    }

    /// 窗口内的事件数
    pub fn count(&self, now: DateTime<Utc>) -> usize {
        self.in_window(now).count()
    }

    /// 确认之后的突发单元数
    pub fn burst_units(&self, now: DateTime<Utc>) -> usize {
        let mut units = 0;
        let mut previous: Option<&ErrorEvent> = None;

        for event in self.in_window(now) {
            if self.acknowledged_at.map_or(false, |ack| event.timestamp <= ack) {
                continue;
            }

            let same_burst = previous.map_or(false, |prev| {
                prev.message == event.message
                    && event.timestamp - prev.timestamp <= self.burst_interval
            });
            if !same_burst {
                units += 1;
            }
            previous = Some(event);
        }

        units
    }

    pub fn threshold_exceeded(&self, max_errors: usize, now: DateTime<Utc>) -> bool {
        self.burst_units(now) >= max_errors
    }

    /// 恢复动作发出后，已有错误不再计入阈值
    pub fn acknowledge(&mut self, now: DateTime<Utc>) {
        self.acknowledged_at = Some(now);
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors
    }

    pub fn last_error(&self) -> Option<&ErrorEvent> {
        self.last_error.as_ref()
    }

    pub fn counts_by_category(&self, now: DateTime<Utc>) -> BTreeMap<ErrorCategory, usize> {
        let mut counts: BTreeMap<ErrorCategory, usize> =
            ErrorCategory::ALL.iter().map(|c| (*c, 0)).collect();
        for event in self.in_window(now) {
            *counts.entry(event.category).or_insert(0) += 1;
        }
        counts
    }

    pub fn snapshot(&self, max_errors: usize, now: DateTime<Utc>) -> ErrorSnapshot {
        let burst_units = self.burst_units(now);
        ErrorSnapshot {
            total_errors: self.total_errors,
            recent_errors: self.count(now),
            burst_units,
            threshold_exceeded: burst_units >= max_errors,
            counts: self.counts_by_category(now),
            last_error: self.last_error.clone(),
        }
    }

    fn in_window(&self, now: DateTime<Utc>) -> impl Iterator<Item = &ErrorEvent> {
        let start = now - self.window;
        self.events
            .iter()
            .filter(move |e| e.timestamp >= start && e.timestamp <= now)
    }
}
