use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// 单个类别的冷却状态
#[derive(Debug, Clone, Default, Serialize)]
pub struct CooldownState {
    pub last_sent_at: Option<DateTime<Utc>>,
    pub count_in_window: usize,
    /// 累计丢弃条数
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct CategoryWindow {
    sent: VecDeque<DateTime<Utc>>,
    dropped: u64,
}

impl CategoryWindow {
    fn evict(&mut self, now: DateTime<Utc>, window: Duration) {
        while let Some(front) = self.sent.front() {
            if now - *front >= window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}

/// 按类别的告警预算：任意冷却窗口内同一类别最多放行 `max_alerts` 条，超出直接丢弃
#[derive(Debug)]
pub struct AlertCooldown {
    max_alerts: usize,
    window: Duration,
    categories: HashMap<String, CategoryWindow>,
}

impl AlertCooldown {
    pub fn new(max_alerts: usize, window_secs: u64) -> Self {
        Self {
            max_alerts,
            window: Duration::seconds(window_secs as i64),
            categories: HashMap::new(),
        }
    }

    /// 尝试占用一个名额，成功返回 true
    pub fn try_acquire(&mut self, category: &str, now: DateTime<Utc>) -> bool {
        let window = self.window;
        let entry = self.categories.entry(category.to_string()).or_default();
        entry.evict(now, window);

        if entry.sent.len() >= self.max_alerts {
            entry.dropped += 1;
            debug!(
                category = category,
                in_window = entry.sent.len(),
                "Alert dropped by cooldown"
            );
            return false;
        }

        entry.sent.push_back(now);
        true
    }

    /// 类别当前状态
    pub fn state(&self, category: &str, now: DateTime<Utc>) -> CooldownState {
        match self.categories.get(category) {
            Some(entry) => CooldownState {
                last_sent_at: entry.sent.back().copied(),
                count_in_window: entry.sent.iter().filter(|t| now - **t < self.window).count(),
                dropped: entry.dropped,
            },
            None => CooldownState::default(),
        }
    }

    /// 所有类别的状态
    pub fn states(&self, now: DateTime<Utc>) -> HashMap<String, CooldownState> {
        self.categories
            .keys()
            .map(|category| (category.clone(), self.state(category, now)))
            .collect()
    }

    /// 清理长时间未活动的类别
    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        self.categories.retain(|_, entry| {
            entry.evict(now, window);
            !entry.sent.is_empty() || entry.dropped > 0
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_is_capped_per_window() {
        let mut cooldown = AlertCooldown::new(3, 300);
        let start = Utc::now();

        let accepted = (0..7)
            .filter(|i| cooldown.try_acquire("high_cpu_usage", start + Duration::seconds(*i)))
            .count();

        assert_eq!(accepted, 3);
        let state = cooldown.state("high_cpu_usage", start + Duration::seconds(7));
        assert_eq!(state.count_in_window, 3);
        assert_eq!(state.dropped, 4);
    }

    #[test]
    fn test_categories_have_independent_budgets() {
        let mut cooldown = AlertCooldown::new(1, 300);
        let now = Utc::now();

        assert!(cooldown.try_acquire("service_down", now));
        assert!(!cooldown.try_acquire("service_down", now));
        assert!(cooldown.try_acquire("stream_inactive", now));
    }

    #[test]
    fn test_budget_recovers_after_window() {
        let mut cooldown = AlertCooldown::new(2, 300);
        let start = Utc::now();

        assert!(cooldown.try_acquire("service_down", start));
        assert!(cooldown.try_acquire("service_down", start + Duration::seconds(100)));
        assert!(!cooldown.try_acquire("service_down", start + Duration::seconds(200)));

        // 第一条滑出窗口后只释放一个名额
        assert!(cooldown.try_acquire("service_down", start + Duration::seconds(300)));
        assert!(!cooldown.try_acquire("service_down", start + Duration::seconds(301)));
        assert!(cooldown.try_acquire("service_down", start + Duration::seconds(400)));
    }
}
