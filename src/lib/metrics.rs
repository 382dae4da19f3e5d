//! Prometheus metrics for the submit loop. The [`Metrics`] struct owns its
//! own [`Registry`]; whoever serves `/metrics` calls [`Metrics::encode`].

use color_eyre::Report;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::info;

use crate::db::Db;
use crate::types::{Flag, FlagStatus};

pub struct Metrics {
    pub registry: Registry,
    /// flags currently waiting in the queue
    pub queued_flags: IntGauge,
    /// every flag that left the queue, by outcome and owner
    pub flags: IntCounterVec,
    /// flags handed to a protocol that answered
    pub sent_flags: IntCounter,
    /// wall time of one whole cycle
    pub submit_latency: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, Report> {
        let registry = Registry::new();

        let queued_flags = IntGauge::with_opts(Opts::new(
            "innlevering_queued_flags",
            "Flags waiting to be submitted",
        ))?;
        registry.register(Box::new(queued_flags.clone()))?;

        let flags = IntCounterVec::new(
            Opts::new("innlevering_flags_total", "Processed flags"),
            &["status", "sploit", "team"],
        )?;
        registry.register(Box::new(flags.clone()))?;

        let sent_flags = IntCounter::with_opts(Opts::new(
            "innlevering_sent_flags_total",
            "Flags answered by the checksystem",
        ))?;
        registry.register(Box::new(sent_flags.clone()))?;

        let submit_latency = Histogram::with_opts(
            HistogramOpts::new(
                "innlevering_submit_latency_seconds",
                "Duration of one submit cycle",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;
        registry.register(Box::new(submit_latency.clone()))?;

        Ok(Self {
            registry,
            queued_flags,
            flags,
            sent_flags,
            submit_latency,
        })
    }

    /// Fresh metrics that already count everything in the database
    pub async fn load(db: &Db) -> Result<Self, Report> {
        let metrics = Self::new()?;

        let counts = db.processed_counts().await?;
        for row in &counts {
            metrics
                .flags
                .with_label_values(&[
                    row.status.as_str(),
                    row.sploit.as_str(),
                    row.team.as_str(),
                ])
                .inc_by(row.count as u64);
        }

        let queued = db.count_with_status(&FlagStatus::Queued).await?;
        metrics.queued_flags.set(queued);

        info!(
            "Metrics seeded from {} status groups, {} flags queued",
            counts.len(),
            queued
        );

        Ok(metrics)
    }

    pub fn record(&self, status: &FlagStatus, sploit: &str, team: &str) {
        self.flags
            .with_label_values(&[status.as_str(), sploit, team])
            .inc();
    }

    /// Counts the flags a cycle left in a final state
    pub fn record_flags<'a>(&self, flags: impl IntoIterator<Item = &'a Flag>) {
        for flag in flags {
            if flag.status.is_terminal() {
                self.record(&flag.status, &flag.sploit, &flag.team);
            }
        }
    }

    pub fn encode(&self) -> Result<String, Report> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
