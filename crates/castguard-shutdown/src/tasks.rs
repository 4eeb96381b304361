use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct TrackedTask {
    name: String,
    handle: JoinHandle<()>,
}

/// 后台任务跟踪器
///
/// 关闭时先等待任务自行退出，超时后中止剩余任务。
#[derive(Clone, Default)]
pub struct TaskTracker {
    tasks: Arc<Mutex<Vec<TrackedTask>>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动并登记一个任务
    pub fn spawn<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.track(name, handle);
    }

    /// 登记已启动的任务
    pub fn track(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        let name = name.into();
        debug!(task = %name, "Task registered");
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(TrackedTask { name, handle });
        }
    }

    /// 仍在运行的任务数
    pub fn active_count(&self) -> usize {
        self.tasks
            .lock()
            .map(|tasks| tasks.iter().filter(|t| !t.handle.is_finished()).count())
            .unwrap_or(0)
    }

    /// 等待所有任务退出，返回被强制中止的任务数
    pub async fn drain(&self, max_drain_duration: Duration) -> usize {
        let tasks: Vec<TrackedTask> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => return 0,
        };

        info!("Draining {} tasks", tasks.len());
        let start = Instant::now();
        let mut aborted = 0;

        for mut task in tasks {
            let remaining = max_drain_duration.saturating_sub(start.elapsed());
            match tokio::time::timeout(remaining, &mut task.handle).await {
                Ok(Ok(())) => debug!(task = %task.name, "Task finished"),
                Ok(Err(e)) => warn!(task = %task.name, "Task ended abnormally: {}", e),
                Err(_) => {
                    warn!(task = %task.name, "Task did not stop in time, aborting");
                    task.handle.abort();
                    aborted += 1;
                }
            }
        }

        if aborted == 0 {
            info!("All tasks drained in {:?}", start.elapsed());
        } else {
            warn!("Forced shutdown with {} tasks aborted", aborted);
        }

        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalHandler;

    #[tokio::test]
    async fn test_drain_waits_for_cooperative_tasks() {
        let handler = SignalHandler::new();
        let tracker = TaskTracker::new();

        for i in 0..3 {
            let mut token = handler.subscribe();
            tracker.spawn(format!("worker-{}", i), async move {
                token.cancelled().await;
            });
        }
        assert_eq!(tracker.active_count(), 3);

        handler.trigger_shutdown();
        let aborted = tracker.drain(Duration::from_secs(5)).await;

        assert_eq!(aborted, 0);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_aborts_stuck_tasks() {
        let tracker = TaskTracker::new();
        tracker.spawn("stuck", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        tracker.spawn("quick", async {});

        let aborted = tracker.drain(Duration::from_millis(50)).await;
        assert_eq!(aborted, 1);
    }
}
