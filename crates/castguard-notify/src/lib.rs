pub mod cooldown;
pub mod error;
pub mod manager;
pub mod message;
pub mod notifier;
pub mod providers;
pub mod queue;

pub use cooldown::{AlertCooldown, CooldownState};
pub use error::NotifyError;
pub use manager::{AlertDispatcher, DispatchOutcome};
pub use message::{AlertRecord, AlertSeverity};
pub use notifier::Notifier;
pub use providers::{EmailNotifier, WebhookNotifier};
pub use queue::{alert_channel, AlertHandle, AlertRequest, AlertWorker};
