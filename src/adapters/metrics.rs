use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use prometheus::{CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::MetricsConfig;

/// Per-agent view of the counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub request_count: u64,
    /// Seconds
    pub average_duration: f64,
    pub error_count: u64,
    pub error_rate: f64,
    pub last_called_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub enabled: bool,
    pub uptime_seconds: f64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub overall_error_rate: f64,
    pub agents: BTreeMap<String, AgentMetrics>,
}

pub struct MetricsCollector {
    registry: Registry,
    enabled: bool,
    started_at: Mutex<Instant>,

    pub requests_total: CounterVec,
    pub errors_total: CounterVec,
    pub request_duration: HistogramVec,
    pub last_called: GaugeVec,
    pub response_tokens: HistogramVec,
}

/// Map of `agent` label value to the metric's sample
fn by_agent<T>(collector: &impl Collector, value: impl Fn(&prometheus::proto::Metric) -> T) -> BTreeMap<String, T> {
    let mut out = BTreeMap::new();
    for family in collector.collect() {
        for metric in family.get_metric() {
            if let Some(label) = metric.get_label().iter().find(|l| l.get_name() == "agent") {
                out.insert(label.get_value().to_string(), value(metric));
            }
        }
    }
    out
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(&MetricsConfig::default())
    }

    pub fn with_config(config: &MetricsConfig) -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("maestro_agent_requests_total", "Total agent invocations"),
            &["agent"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let errors_total = CounterVec::new(
            Opts::new("maestro_agent_errors_total", "Total failed agent invocations"),
            &["agent"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new("maestro_agent_duration_seconds", "Agent invocation duration in seconds"),
            &["agent"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let last_called = GaugeVec::new(
            Opts::new("maestro_agent_last_called_timestamp_seconds", "Unix time of the last invocation"),
            &["agent"],
        )?;
        registry.register(Box::new(last_called.clone()))?;

        let response_tokens = HistogramVec::new(
            HistogramOpts::new("maestro_response_tokens", "Estimated tokens per response")
                .buckets(vec![16.0, 64.0, 256.0, 1024.0, 4096.0, 16384.0]),
            &["agent"],
        )?;
        registry.register(Box::new(response_tokens.clone()))?;

        Ok(Self {
            registry,
            enabled: config.enabled,
            started_at: Mutex::new(Instant::now()),
            requests_total,
            errors_total,
            request_duration,
            last_called,
            response_tokens,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Count one invocation of `agent`
    pub fn record(&self, agent: &str, duration_secs: f64, success: bool, error: Option<&str>) {
        if !self.enabled {
            return;
        }

        self.requests_total.with_label_values(&[agent]).inc();
        self.request_duration
            .with_label_values(&[agent])
            .observe(duration_secs.max(0.0));
        self.last_called
            .with_label_values(&[agent])
            .set(Utc::now().timestamp_millis() as f64 / 1000.0);

        if !success {
            self.errors_total.with_label_values(&[agent]).inc();
            if let Some(error) = error {
                tracing::debug!("Recorded {} agent error: {}", agent, error);
            }
        }
    }

    pub fn record_tokens(&self, agent: &str, tokens: u32) {
        if self.enabled {
            self.response_tokens.with_label_values(&[agent]).observe(tokens as f64);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = by_agent(&self.requests_total, |m| m.get_counter().get_value() as u64);
        let errors = by_agent(&self.errors_total, |m| m.get_counter().get_value() as u64);
        let durations = by_agent(&self.request_duration, |m| {
            let h = m.get_histogram();
            (h.get_sample_sum(), h.get_sample_count())
        });
        let last_called = by_agent(&self.last_called, |m| m.get_gauge().get_value());

        let mut agents = BTreeMap::new();
        for (agent, request_count) in &requests {
            let error_count = errors.get(agent).copied().unwrap_or(0);
            let average_duration = match durations.get(agent) {
                Some((sum, count)) if *count > 0 => sum / *count as f64,
                _ => 0.0,
            };
            let last_called_at = last_called
                .get(agent)
                .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64));

            agents.insert(
                agent.clone(),
                AgentMetrics {
                    request_count: *request_count,
                    average_duration,
                    error_count,
                    error_rate: rate(error_count, *request_count),
                    last_called_at,
                },
            );
        }

        let total_requests: u64 = requests.values().sum();
        let total_errors: u64 = errors.values().sum();

        MetricsSnapshot {
            enabled: self.enabled,
            uptime_seconds: self.started_at().elapsed().as_secs_f64(),
            total_requests,
            total_errors,
            overall_error_rate: rate(total_errors, total_requests),
            agents,
        }
    }

    /// Write the snapshot as pretty JSON
    pub async fn export_to_file(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        tokio::fs::write(path, json).await?;
        tracing::info!("Exported metrics to {}", path.display());
        Ok(())
    }

    /// Prometheus text exposition format
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn reset(&self) {
        self.requests_total.reset();
        self.errors_total.reset();
        self.request_duration.reset();
        self.last_called.reset();
        self.response_tokens.reset();
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn started_at(&self) -> Instant {
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn rate(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics collector")
    }
}
