use color_eyre::Report;
use innlevering::announcer::{Announcer, CycleEvent};
use innlevering::config::ConfigSource;
use innlevering::db::Db;
use innlevering::fair_share::fair_share;
use innlevering::metrics::Metrics;
use innlevering::models::ResultUpdate;
use innlevering::types::{Flag, FlagStatus, SubmitResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::submitter::{SubmitError, Submitters};

const EXPIRED: &str = "Flag lifetime exceeded before submission";
const NO_RESULT: &str = "Checksystem gave no result for this flag";

/// What a single cycle did
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: i64,
    pub expired: usize,
    pub queued: usize,
    /// flags handed to the protocol, with their new status
    pub processed: Vec<Flag>,
    pub period: Duration,
    pub spent: Duration,
}

/// The submit loop. Cycles never overlap, one is run to completion before
/// the next starts.
pub struct Handler {
    db: Db,
    config: Arc<dyn ConfigSource>,
    submitters: Submitters,
    announcer: Arc<Announcer>,
    metrics: Arc<Metrics>,
    cycle: i64,
    rng: StdRng,
}

impl Handler {
    /// Continues numbering after the last cycle found in the database
    pub async fn new(
        db: Db,
        config: Arc<dyn ConfigSource>,
        submitters: Submitters,
        announcer: Arc<Announcer>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, Report> {
        let cycle = db.last_cycle().await?;
        info!("Resuming after cycle {cycle}");

        Ok(Self {
            db,
            config,
            submitters,
            announcer,
            metrics,
            cycle,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn cycle(&self) -> i64 {
        self.cycle
    }

    /// Expire, load, pick, submit, persist and announce, once. `now` is unix
    /// seconds. Errors are from the config or the database; protocol
    /// failures only show up in the flags.
    pub async fn run_cycle(&mut self, now: i64) -> Result<CycleReport, Report> {
        let started = Instant::now();

        self.cycle += 1;
        let cycle = self.cycle;

        let config = self.config.snapshot()?;
        let submit = &config.submit;

        // expire
        let deadline = now - submit.flag_lifetime as i64;
        let expired = match self.db.skip_expired(deadline, EXPIRED).await {
            Ok(expired) => expired,
            Err(e) => {
                error!("Failed to expire old flags in cycle {cycle}: {e:?}");
                return Err(e.into());
            }
        };
        for owner in &expired {
            self.metrics.record(&FlagStatus::Skipped, &owner.sploit, &owner.team);
        }
        if !expired.is_empty() {
            info!("Skipped {} flags older than {}s", expired.len(), submit.flag_lifetime);
        }

        // load
        let queued = self.db.flags_with_status(&FlagStatus::Queued).await?;
        let queued_len = queued.len();
        self.metrics.queued_flags.set(queued_len as i64);

        let mut processed = Vec::new();
        if !queued.is_empty() {
            let mut groups: HashMap<(String, String), Vec<Flag>> = HashMap::new();
            for flag in queued {
                groups
                    .entry((flag.sploit.clone(), flag.team.clone()))
                    .or_default()
                    .push(flag);
            }

            let selected = fair_share(
                groups.into_values().collect(),
                submit.flag_limit,
                &mut self.rng,
            );

            debug!(
                "Submitting {} flags (out of {} in queue)",
                selected.len(),
                queued_len
            );

            let submitter = self.submitters.from_conf(submit)?;
            let outcome = submitter.submit(&selected, submit).await;
            let (flags, updates, answered) = fold_results(selected, outcome, cycle);

            if let Err(e) = self.db.persist_results(&updates, cycle).await {
                error!("Failed to record results of cycle {cycle}: {e:?}");
                return Err(e.into());
            }

            self.metrics.record_flags(&flags);
            self.metrics.sent_flags.inc_by(answered as u64);
            let left = flags.iter().filter(|f| f.status.is_terminal()).count();
            self.metrics.queued_flags.set((queued_len - left) as i64);

            info!("Submitted {answered} flags (out of {queued_len} in queue)");

            self.announcer.publish(CycleEvent {
                cycle,
                flags: flags.clone(),
            });

            processed = flags;
        }

        let spent = started.elapsed();
        self.metrics.submit_latency.observe(spent.as_secs_f64());

        Ok(CycleReport {
            cycle,
            expired: expired.len(),
            queued: queued_len,
            processed,
            period: submit.period(),
            spent,
        })
    }

    /// Runs cycles until shutdown is signalled. Shutdown is only looked at
    /// between cycles, so a started cycle is always recorded.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), Report> {
        info!("Starting submit loop");

        loop {
            let now = chrono::Utc::now().timestamp();
            let report = self.run_cycle(now).await?;

            debug!(
                "Cycle {} took {:?} ({} expired, {} queued, {} processed). The period is {:?}",
                report.cycle,
                report.spent,
                report.expired,
                report.queued,
                report.processed.len(),
                report.period
            );

            let sleep = sleep_for(report.period, report.spent);
            if sleep.is_zero() {
                // overran, go again right away unless asked to stop
                if !matches!(
                    shutdown.try_recv(),
                    Err(broadcast::error::TryRecvError::Empty)
                ) {
                    break;
                }
                continue;
            }

            debug!("Sleeping for {sleep:?}...");
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = shutdown.recv() => break,
            }
        }

        info!("Submit loop stopped after cycle {}", self.cycle());

        Ok(())
    }
}

/// What is left of the period. Zero when the cycle overran.
fn sleep_for(period: Duration, spent: Duration) -> Duration {
    period.saturating_sub(spent)
}

/// Applies what the protocol said to the submitted flags. Returns the
/// updated flags, the rows to write and how many flags got an answer.
fn fold_results(
    flags: Vec<Flag>,
    outcome: Result<Vec<SubmitResult>, SubmitError>,
    cycle: i64,
) -> (Vec<Flag>, Vec<ResultUpdate>, usize) {
    let results = match outcome {
        Ok(results) => results,
        Err(e) => {
            // nothing was submitted, keep everything for the next cycle
            let message = e.describe();
            warn!("Exception on submitting {} flags: {message}", flags.len());

            let updates = flags
                .iter()
                .map(|flag| ResultUpdate {
                    value: flag.value.clone(),
                    status: FlagStatus::Queued.to_string(),
                    checksystem_response: message.clone(),
                    stamp: false,
                })
                .collect();

            let flags = flags
                .into_iter()
                .map(|mut flag| {
                    flag.status = FlagStatus::Queued;
                    flag.checksystem_response = Some(message.clone());
                    flag
                })
                .collect();

            return (flags, updates, 0);
        }
    };

    let mut by_flag: HashMap<String, SubmitResult> = results
        .into_iter()
        .map(|result| (result.flag.clone(), result))
        .collect();

    let mut answered = 0;
    let mut updates = Vec::with_capacity(flags.len());
    let mut out = Vec::with_capacity(flags.len());

    for mut flag in flags {
        match by_flag.remove(&flag.value) {
            Some(result) => {
                answered += 1;
                flag.status = result.status;
                flag.checksystem_response = Some(result.response);
            }
            None => {
                warn!("No result for flag {}, keeping it queued", flag.value);
                flag.status = FlagStatus::Queued;
                flag.checksystem_response = Some(NO_RESULT.to_string());
            }
        }
        flag.sent_cycle = cycle;

        updates.push(ResultUpdate {
            value: flag.value.clone(),
            status: flag.status.to_string(),
            checksystem_response: flag.checksystem_response.clone().unwrap_or_default(),
            stamp: true,
        });
        out.push(flag);
    }

    if !by_flag.is_empty() {
        warn!(
            "Ignoring {} results for flags that were not submitted",
            by_flag.len()
        );
    }

    (out, updates, answered)
}
