use crate::error::Result;
use crate::error_tracker::ErrorCategory;
use crate::orchestrator::RecoveryState;
use crate::pipeline::PipelineState;
use crate::resources::ResourceSample;
use crate::stream::StreamCheck;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

const PIPELINE_STATES: [PipelineState; 7] = [
    PipelineState::Idle,
    PipelineState::Starting,
    PipelineState::Playing,
    PipelineState::Paused,
    PipelineState::Error,
    PipelineState::Stopped,
    PipelineState::Unknown,
];

/// 监督器指标
pub struct SupervisorMetrics {
    // 恢复
    restarts_total: IntCounter,
    restart_failures_total: IntCounter,
    escalations_total: IntCounter,
    recovery_escalated: IntGauge,

    // 管道与输出
    pipeline_state: IntGaugeVec,
    errors_total: IntCounterVec,
    stream_fresh: IntGauge,
    stream_segments: IntGauge,
    segments_removed_total: IntCounter,

    // 系统资源
    cpu_usage_percent: Gauge,
    memory_usage_percent: Gauge,
    disk_usage_percent: Gauge,

    registry: Registry,
}

impl SupervisorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("castguard".to_string()), None)?;

        let restarts_total = IntCounter::new("restarts_total", "Pipeline restarts issued")?;
        registry.register(Box::new(restarts_total.clone()))?;

        let restart_failures_total =
            IntCounter::new("restart_failures_total", "Restart commands that failed")?;
        registry.register(Box::new(restart_failures_total.clone()))?;

        let escalations_total =
            IntCounter::new("escalations_total", "Restart budget escalations")?;
        registry.register(Box::new(escalations_total.clone()))?;

        let recovery_escalated =
            IntGauge::new("recovery_escalated", "1 while automatic recovery is escalated")?;
        registry.register(Box::new(recovery_escalated.clone()))?;

        let pipeline_state = IntGaugeVec::new(
            Opts::new("pipeline_state", "Current pipeline state (1 for the active state)"),
            &["state"],
        )?;
        registry.register(Box::new(pipeline_state.clone()))?;

        let errors_total = IntCounterVec::new(
            Opts::new("errors_total", "Pipeline errors reported"),
            &["category"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let stream_fresh = IntGauge::new("stream_fresh", "1 when segments are being produced")?;
        registry.register(Box::new(stream_fresh.clone()))?;

        let stream_segments = IntGauge::new("stream_segments", "Segments in the output directory")?;
        registry.register(Box::new(stream_segments.clone()))?;

        let segments_removed_total =
            IntCounter::new("segments_removed_total", "Segments removed by retention")?;
        registry.register(Box::new(segments_removed_total.clone()))?;

        let cpu_usage_percent = Gauge::new("cpu_usage_percent", "CPU usage (0-100)")?;
        registry.register(Box::new(cpu_usage_percent.clone()))?;

        let memory_usage_percent = Gauge::new("memory_usage_percent", "Memory usage (0-100)")?;
        registry.register(Box::new(memory_usage_percent.clone()))?;

        let disk_usage_percent =
            Gauge::new("disk_usage_percent", "Usage of the filesystem holding the output (0-100)")?;
        registry.register(Box::new(disk_usage_percent.clone()))?;

        Ok(Self {
            restarts_total,
            restart_failures_total,
            escalations_total,
            recovery_escalated,
            pipeline_state,
            errors_total,
            stream_fresh,
            stream_segments,
            segments_removed_total,
            cpu_usage_percent,
            memory_usage_percent,
            disk_usage_percent,
            registry,
        })
    }

    pub fn record_restart(&self) {
        self.restarts_total.inc();
    }

    pub fn record_restart_failure(&self) {
        self.restart_failures_total.inc();
    }

    pub fn record_escalation(&self) {
        self.escalations_total.inc();
    }

    pub fn set_recovery_state(&self, state: RecoveryState) {
        self.recovery_escalated
            .set(i64::from(state == RecoveryState::Escalated));
    }

    pub fn set_pipeline_state(&self, current: PipelineState) {
        for state in PIPELINE_STATES {
            self.pipeline_state
                .with_label_values(&[state.as_str()])
                .set(i64::from(state == current));
        }
    }

    pub fn record_error(&self, category: ErrorCategory) {
        self.errors_total.with_label_values(&[category.as_str()]).inc();
    }

    pub fn set_stream(&self, check: &StreamCheck) {
        self.stream_fresh.set(i64::from(check.fresh));
        self.stream_segments.set(check.segment_count as i64);
    }

    pub fn record_segments_removed(&self, count: usize) {
        self.segments_removed_total.inc_by(count as u64);
    }

    pub fn set_resources(&self, sample: &ResourceSample) {
        self.cpu_usage_percent.set(sample.cpu_percent);
        self.memory_usage_percent.set(sample.mem_percent);
        self.disk_usage_percent.set(sample.disk_percent);
    }

    /// 导出 Prometheus 文本格式
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_recovery_metrics() {
        let metrics = SupervisorMetrics::new().unwrap();

        metrics.record_restart();
        metrics.record_restart();
        metrics.record_escalation();
        metrics.set_recovery_state(RecoveryState::Escalated);

        let exported = metrics.export().unwrap();
        assert!(exported.contains("castguard_restarts_total 2"));
        assert!(exported.contains("castguard_escalations_total 1"));
        assert!(exported.contains("castguard_recovery_escalated 1"));
    }

    #[test]
    fn test_pipeline_state_is_one_hot() {
        let metrics = SupervisorMetrics::new().unwrap();
        metrics.set_pipeline_state(PipelineState::Playing);

        let exported = metrics.export().unwrap();
        assert!(exported.contains("castguard_pipeline_state{state=\"playing\"} 1"));
        assert!(exported.contains("castguard_pipeline_state{state=\"stopped\"} 0"));
    }

    #[test]
    fn test_resource_and_stream_gauges() {
        let metrics = SupervisorMetrics::new().unwrap();
        metrics.record_error(ErrorCategory::Encoder);
        metrics.set_stream(&StreamCheck {
            fresh: true,
            segment_count: 7,
            ..Default::default()
        });
        metrics.set_resources(&ResourceSample {
            cpu_percent: 42.5,
            mem_percent: 10.0,
            disk_percent: 80.0,
            gpu_mem_mb: None,
            timestamp: Utc::now(),
        });

        let exported = metrics.export().unwrap();
        assert!(exported.contains("castguard_errors_total{category=\"encoder\"} 1"));
        assert!(exported.contains("castguard_stream_segments 7"));
        assert!(exported.contains("castguard_cpu_usage_percent 42.5"));
    }
}
