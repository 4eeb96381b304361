use crate::signal::{ShutdownSignal, SignalHandler};
use crate::tasks::TaskTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// 关闭阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    Draining,
    Complete,
}

/// 关闭协调器
pub struct ShutdownCoordinator {
    signal_handler: SignalHandler,
    task_tracker: TaskTracker,
    drain_timeout: Duration,
    phase_tx: Arc<watch::Sender<ShutdownPhase>>,
}

impl ShutdownCoordinator {
    pub fn builder() -> ShutdownCoordinatorBuilder {
        ShutdownCoordinatorBuilder::new()
    }

    /// 等待关闭信号，排空任务
    pub async fn run(self) -> ShutdownPhase {
        info!("Shutdown coordinator started, waiting for signal...");

        let signal = self.signal_handler.wait_for_signal().await;
        self.finish(signal).await
    }

    /// 收到信号后的收尾流程
    pub async fn finish(&self, signal: ShutdownSignal) -> ShutdownPhase {
        info!("Received shutdown signal: {:?}", signal);
        let start = std::time::Instant::now();

        self.phase_tx.send_replace(ShutdownPhase::Draining);
        let aborted = self.task_tracker.drain(self.drain_timeout).await;

        info!(
            aborted,
            "Graceful shutdown complete in {:?}",
            start.elapsed()
        );

        self.phase_tx.send_replace(ShutdownPhase::Complete);
        ShutdownPhase::Complete
    }

    pub fn signal_handler(&self) -> &SignalHandler {
        &self.signal_handler
    }

    pub fn task_tracker(&self) -> &TaskTracker {
        &self.task_tracker
    }

    /// 订阅阶段变化
    pub fn phase(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase_tx.subscribe()
    }
}

/// 关闭协调器构建器
pub struct ShutdownCoordinatorBuilder {
    signal_handler: Option<SignalHandler>,
    task_tracker: Option<TaskTracker>,
    drain_timeout: Duration,
}

impl ShutdownCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            signal_handler: None,
            task_tracker: None,
            drain_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_signal_handler(mut self, handler: SignalHandler) -> Self {
        self.signal_handler = Some(handler);
        self
    }

    pub fn with_task_tracker(mut self, tracker: TaskTracker) -> Self {
        self.task_tracker = Some(tracker);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn build(self) -> ShutdownCoordinator {
        let (phase_tx, _rx) = watch::channel(ShutdownPhase::Running);

        ShutdownCoordinator {
            signal_handler: self.signal_handler.unwrap_or_default(),
            task_tracker: self.task_tracker.unwrap_or_default(),
            drain_timeout: self.drain_timeout,
            phase_tx: Arc::new(phase_tx),
        }
    }
}

impl Default for ShutdownCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_drains_tracked_tasks() {
        let handler = SignalHandler::new();
        let tracker = TaskTracker::new();

        let mut token = handler.subscribe();
        tracker.spawn("pipeline", async move {
            token.cancelled().await;
        });

        let coordinator = ShutdownCoordinator::builder()
            .with_signal_handler(handler.clone())
            .with_task_tracker(tracker.clone())
            .with_drain_timeout(Duration::from_secs(5))
            .build();
        let phase = coordinator.phase();
        assert_eq!(*phase.borrow(), ShutdownPhase::Running);

        let run = tokio::spawn(coordinator.run());
        handler.trigger_shutdown();

        assert_eq!(run.await.unwrap(), ShutdownPhase::Complete);
        assert_eq!(*phase.borrow(), ShutdownPhase::Complete);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn test_builder_defaults() {
        let coordinator = ShutdownCoordinator::builder().build();
        assert!(!coordinator.signal_handler().is_shutting_down());
        assert_eq!(coordinator.task_tracker().active_count(), 0);
        assert_eq!(coordinator.drain_timeout, Duration::from_secs(30));
    }
}
