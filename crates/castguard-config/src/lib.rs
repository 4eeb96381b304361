pub mod alerts;
pub mod error;
pub mod global;
pub mod loader;
pub mod stream;

pub use alerts::{AutoRecoveryConfig, EmailAlertConfig, WebhookAlertConfig};
pub use error::ConfigError;
pub use global::{
    LoggingConfig, ResourceConfig, SchedulerConfig, ServerConfig, ServiceConfig, SupervisorConfig,
};
pub use loader::ConfigLoader;
pub use stream::{LiveStreamingConfig, StreamConfig};
