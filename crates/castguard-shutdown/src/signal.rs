use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

/// 关闭信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM - 优雅关闭
    Term,

    /// SIGINT - Ctrl+C
    Interrupt,

    /// 手动触发
    Manual,
}

/// 信号处理器
///
/// 使用 watch 通道保存信号，晚订阅的任务也能看到已经发出的关闭信号。
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_tx: Arc<watch::Sender<Option<ShutdownSignal>>>,
}

impl SignalHandler {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            shutdown_tx: Arc::new(tx),
        }
    }

    /// 等待关闭信号（任意来源）
    pub async fn wait_for_signal(&self) -> ShutdownSignal {
        self.subscribe().cancelled().await
    }

    /// 等待系统信号并广播
    #[cfg(unix)]
    pub async fn wait_for_system_signal(&self) -> std::io::Result<ShutdownSignal> {
        use signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut token = self.subscribe();

        let received = tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                ShutdownSignal::Term
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
                ShutdownSignal::Interrupt
            }
            existing = token.cancelled() => return Ok(existing),
        };

        self.send(received);
        Ok(received)
    }

    /// 等待系统信号（Windows 版本）
    #[cfg(not(unix))]
    pub async fn wait_for_system_signal(&self) -> std::io::Result<ShutdownSignal> {
        let mut token = self.subscribe();
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C");
                self.send(ShutdownSignal::Interrupt);
                Ok(ShutdownSignal::Interrupt)
            }
            existing = token.cancelled() => Ok(existing),
        }
    }

    /// 手动触发关闭
    pub fn trigger_shutdown(&self) {
        info!("Manual shutdown triggered");
        self.send(ShutdownSignal::Manual);
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_tx.borrow().is_some()
    }

    fn send(&self, signal: ShutdownSignal) {
        // 只记录第一个信号
        self.shutdown_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(signal);
                true
            } else {
                false
            }
        });
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// 周期任务持有的取消令牌
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownToken {
    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// 等到关闭信号到达
    pub async fn cancelled(&mut self) -> ShutdownSignal {
        loop {
            if let Some(signal) = *self.rx.borrow_and_update() {
                return signal;
            }
            if self.rx.changed().await.is_err() {
                // 处理器已释放，视为手动关闭
                return ShutdownSignal::Manual;
            }
        }
    }
}
