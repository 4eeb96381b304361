pub mod api;
pub mod logging;

use castguard_config::SupervisorConfig;
use castguard_monitor::{
    HealthAssembler, RecoveryControl, ServiceManager, Supervisor, SupervisorMetrics,
};
use castguard_notify::AlertDispatcher;
use std::sync::Arc;

/// HTTP 接口共享状态，只读快照加手动恢复入口
#[derive(Clone)]
pub struct AppState {
    pub health: HealthAssembler,
    pub control: RecoveryControl,
    pub service: Arc<dyn ServiceManager>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub metrics: Arc<SupervisorMetrics>,
    pub config: Arc<SupervisorConfig>,
}

impl AppState {
    pub fn from_supervisor(supervisor: &Supervisor) -> Self {
        Self {
            health: supervisor.health(),
            control: supervisor.control(),
            service: supervisor.service(),
            dispatcher: supervisor.dispatcher(),
            metrics: supervisor.metrics(),
            config: Arc::new(supervisor.config().clone()),
        }
    }
}
