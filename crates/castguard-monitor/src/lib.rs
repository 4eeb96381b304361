pub mod controller;
pub mod error;
pub mod error_tracker;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod resources;
pub mod runtime;
pub mod stream;
pub mod supervisor;
pub mod systemd;

pub use controller::{PipelineController, PipelineEvent, ServiceManager, ServiceStatus};
pub use error::{FaultRecord, MonitorError, Result, SupervisorFault};
pub use error_tracker::{ErrorCategory, ErrorEvent, ErrorSnapshot, ErrorTracker};
pub use health::{DetailedHealth, HealthAssembler, HealthSnapshot, SnapshotReceivers};
pub use metrics::SupervisorMetrics;
pub use orchestrator::{
    AttemptOutcome, Decision, HealthSignal, Observation, RecoveryAction, RecoveryOrchestrator,
    RecoveryPolicy, RecoveryState, RecoveryStatus, RestartAttempt,
};
pub use pipeline::{PipelineSnapshot, PipelineState, PipelineStateMonitor, ProcessExit};
pub use resources::{
    GpuProbe, NvidiaSmiProbe, ResourceKind, ResourceMonitor, ResourceSample, ResourceSnapshot,
};
pub use runtime::ErrorCommand;
pub use stream::{RetentionReport, SegmentInfo, StreamActivityMonitor, StreamCheck};
pub use supervisor::{ErrorReporter, RecoveryControl, Supervisor};
pub use systemd::SystemdUnit;
