use std::{collections::VecDeque, sync::Arc, time::Duration};

use shared::protocol::SystemMetrics;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    error::ClientResult,
    metrics::{HealthStatus, MetricKind, MetricsPoller, MetricsSource},
};

pub const HISTORY_LEN: usize = 60;
const SAMPLE_QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct MetricCard {
    pub kind: MetricKind,
    pub title: &'static str,
    pub value: f64,
    pub unit: &'static str,
    pub status: HealthStatus,
}

impl MetricCard {
    fn new(kind: MetricKind, sample: &SystemMetrics) -> Self {
        let value = kind.value(sample);
        Self {
            kind,
            title: kind.title(),
            value,
            unit: kind.unit(),
            status: kind.classify(value),
        }
    }

    pub fn advice(&self) -> &'static str {
        self.status.advice()
    }
}

pub struct Dashboard {
    source: Arc<dyn MetricsSource>,
    samples: mpsc::Receiver<SystemMetrics>,
    poller: MetricsPoller,
    latest: Option<SystemMetrics>,
    history: VecDeque<SystemMetrics>,
}

impl Dashboard {
    pub fn mount(source: Arc<dyn MetricsSource>, every: Duration) -> ClientResult<Self> {
        let (tx, samples) = mpsc::channel(SAMPLE_QUEUE_CAPACITY);
        let poller = MetricsPoller::spawn(Arc::clone(&source), every, tx)?;
        info!(interval_ms = every.as_millis() as u64, "dashboard polling started");
        Ok(Self {
            source,
            samples,
            poller,
            latest: None,
            history: VecDeque::with_capacity(HISTORY_LEN),
        })
    }

    pub fn is_loading(&self) -> bool {
        self.latest.is_none()
    }

    pub fn latest(&self) -> Option<&SystemMetrics> {
        self.latest.as_ref()
    }

    pub fn history(&self) -> impl Iterator<Item = &SystemMetrics> {
        self.history.iter()
    }

    pub fn cards(&self) -> Vec<MetricCard> {
        let Some(sample) = &self.latest else {
            return Vec::new();
        };
        MetricKind::ALL
            .iter()
            .map(|kind| MetricCard::new(*kind, sample))
            .collect()
    }

    pub fn card(&self, kind: MetricKind) -> Option<MetricCard> {
        self.latest
            .as_ref()
            .map(|sample| MetricCard::new(kind, sample))
    }

    pub async fn next_sample(&mut self) -> Option<&SystemMetrics> {
        let sample = self.samples.recv().await?;
        self.record(sample);
        self.latest.as_ref()
    }

    /// Fetches out of band. A failure leaves the last sample on screen.
    pub async fn refresh_now(&mut self) -> ClientResult<()> {
        let sample = self.source.fetch().await?;
        self.record(sample);
        Ok(())
    }

    pub fn record(&mut self, sample: SystemMetrics) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(sample.clone());
        debug!(cpu = sample.cpu_percent, mem = sample.mem_percent, "metrics sample");
        self.latest = Some(sample);
    }

    pub fn unmount(self) {
        self.poller.stop();
        info!("dashboard polling stopped");
    }
}

#[cfg(test)]
#[path = "tests/dashboard_tests.rs"]
mod tests;
