//! Metrics endpoint client, periodic poller and health classification.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use shared::protocol::SystemMetrics;
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self) -> ClientResult<SystemMetrics>;
}

pub struct HttpMetricsSource {
    http: Client,
    url: String,
}

impl HttpMetricsSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch(&self) -> ClientResult<SystemMetrics> {
        self.http
            .get(&self.url)
            .send()
            .await
            .map_err(|err| ClientError::Metrics(err.to_string()))?
            .error_for_status()
            .map_err(|err| ClientError::Metrics(err.to_string()))?
            .json()
            .await
            .map_err(|err| ClientError::Metrics(err.to_string()))
    }
}

pub struct MetricsPoller {
    task: JoinHandle<()>,
}

impl MetricsPoller {
    pub fn spawn(
        source: Arc<dyn MetricsSource>,
        every: Duration,
        samples: mpsc::Sender<SystemMetrics>,
    ) -> ClientResult<Self> {
        if every.is_zero() {
            return Err(ClientError::Config(
                "metrics poll interval must be positive".into(),
            ));
        }
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match source.fetch().await {
                    Ok(sample) => {
                        if samples.send(sample).await.is_err() {
                            debug!("metrics receiver gone, poller exiting");
                            break;
                        }
                    }
                    Err(error) => warn!(%error, "metrics poll failed"),
                }
            }
        });
        Ok(Self { task })
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for MetricsPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
    NetworkIn,
    NetworkOut,
    Temperature,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Disk,
        MetricKind::NetworkIn,
        MetricKind::NetworkOut,
        MetricKind::Temperature,
    ];

    pub fn title(self) -> &'static str {
        match self {
            MetricKind::Cpu => "CPU Usage",
            MetricKind::Memory => "Memory Usage",
            MetricKind::Disk => "Disk Usage",
            MetricKind::NetworkIn => "Network In",
            MetricKind::NetworkOut => "Network Out",
            MetricKind::Temperature => "Temperature",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            MetricKind::Cpu | MetricKind::Memory | MetricKind::Disk => "%",
            MetricKind::NetworkIn | MetricKind::NetworkOut => "bps",
            MetricKind::Temperature => "°C",
        }
    }

    pub fn value(self, sample: &SystemMetrics) -> f64 {
        match self {
            MetricKind::Cpu => sample.cpu_percent,
            MetricKind::Memory => sample.mem_percent,
            MetricKind::Disk => sample.disk_percent,
            MetricKind::NetworkIn => sample.net_in_bps,
            MetricKind::NetworkOut => sample.net_out_bps,
            MetricKind::Temperature => sample.temperature_c,
        }
    }

    /// `(warning, critical)`; a value strictly above a bound reaches that level.
    fn thresholds(self) -> (f64, f64) {
        match self {
            MetricKind::NetworkIn | MetricKind::NetworkOut => (60_000.0, 80_000.0),
            _ => (60.0, 80.0),
        }
    }

    pub fn classify(self, value: f64) -> HealthStatus {
        let (warning, critical) = self.thresholds();
        if value > critical {
            HealthStatus::Critical
        } else if value > warning {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn label(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "Healthy",
            HealthStatus::Warning => "Warning",
            HealthStatus::Critical => "Critical",
        }
    }

    pub fn advice(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "System is running smoothly within normal parameters.",
            HealthStatus::Warning => "Moderate usage detected. Monitor for trends.",
            HealthStatus::Critical => "System resources are critically high. Consider scaling or optimization.",
        }
    }
}

#[cfg(test)]
#[path = "tests/metrics_tests.rs"]
pub(crate) mod tests;
