pub mod coordinator;
pub mod signal;
pub mod tasks;

pub use coordinator::{ShutdownCoordinator, ShutdownCoordinatorBuilder, ShutdownPhase};
pub use signal::{ShutdownSignal, ShutdownToken, SignalHandler};
pub use tasks::TaskTracker;
