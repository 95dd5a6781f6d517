//! Daily average aggregation
//!
//! Once per UTC day (shortly after midnight, rescheduling itself after each
//! run) the aggregator compresses the previous day's variation logs into one
//! average per item and records them with set-insertion semantics, so a
//! repeated run for the same day is a no-op. It never touches the current
//! day, which keeps in-flight appends out of its view.
//!
//! Error policy: a failed key scan aborts the whole run before anything is
//! written (an incomplete key enumeration must not produce averages); a
//! failed batch read skips that batch only; unparseable entries are skipped
//! individually.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use types::day::DayKey;
use types::errors::KvError;
use types::item::DailyAverage;
use types::observation::PriceObservation;

use crate::config::AggregatorConfig;
use crate::docstore::DocumentStore;
use crate::kv::{KvCommand, KvReply, KvStore, Scanner};
use crate::metrics::EngineMetrics;
use crate::variation::VariationLog;

/// Errors that abort an aggregation run.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// The key enumeration failed; no averages were computed.
    #[error("variation-log key scan failed: {0}")]
    Scan(#[source] KvError),
}

/// Outcome of one aggregation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationReport {
    pub day: DayKey,
    /// Variation-log keys the scan found.
    pub keys_found: usize,
    /// Items whose average was computed this run.
    pub items_aggregated: usize,
    /// Averages actually inserted (zero on an idempotent re-run).
    pub averages_added: usize,
    /// List entries dropped as unparseable.
    pub entries_skipped: usize,
    /// Key batches dropped after a failed batched read.
    pub batches_skipped: usize,
    /// Keys removed by the cleanup pass.
    pub keys_deleted: u64,
}

/// Scheduled batch job that turns raw observations into daily averages.
pub struct DailyAggregator {
    kv: Arc<dyn KvStore>,
    scanner: Arc<Scanner>,
    variation: Arc<VariationLog>,
    store: Arc<dyn DocumentStore>,
    config: AggregatorConfig,
    metrics: Arc<EngineMetrics>,
}

impl DailyAggregator {
    pub fn new(
        kv: Arc<dyn KvStore>,
        scanner: Arc<Scanner>,
        variation: Arc<VariationLog>,
        store: Arc<dyn DocumentStore>,
        config: AggregatorConfig,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            kv,
            scanner,
            variation,
            store,
            config,
            metrics,
        }
    }

    /// Aggregate the previous completed UTC day relative to `now`.
    pub async fn run_previous_day(
        &self,
        now: DateTime<Utc>,
    ) -> Result<AggregationReport, AggregateError> {
        self.run_for(&DayKey::previous_utc_day(now)).await
    }

    /// Aggregate one specific day.
    ///
    /// Enumerates the full key space first so a mid-scan failure aborts
    /// before any average is written.
    pub async fn run_for(&self, day: &DayKey) -> Result<AggregationReport, AggregateError> {
        let pattern = self.variation.pattern(day);
        let keys = self
            .scanner
            .scan_all(&pattern, self.config.scan_batch)
            .await
            .map_err(AggregateError::Scan)?;

        let mut report = AggregationReport {
            day: day.clone(),
            keys_found: keys.len(),
            items_aggregated: 0,
            averages_added: 0,
            entries_skipped: 0,
            batches_skipped: 0,
            keys_deleted: 0,
        };

        if keys.is_empty() {
            info!(day = %day, "no variation logs to aggregate");
            self.metrics.record_aggregator_run(0);
            return Ok(report);
        }

        let mut parse_errors_logged = 0;
        let mut processed_keys: Vec<String> = Vec::with_capacity(keys.len());

        for batch in keys.chunks(self.config.scan_batch.max(1)) {
            let lists = match self.read_batch(batch).await {
                Some(lists) => lists,
                None => {
                    report.batches_skipped += 1;
                    continue;
                }
            };

            for (key, entries) in batch.iter().zip(lists) {
                let id = match self.variation.parse_item_id(key) {
                    Some(id) => id,
                    None => {
                        warn!(key = %key, "variation-log key carries no item id; skipping");
                        continue;
                    }
                };

                let mut prices: Vec<i64> = Vec::with_capacity(entries.len());
                for entry in &entries {
                    match PriceObservation::parse_entry(entry) {
                        Some(observation) => prices.push(observation.price),
                        None => {
                            report.entries_skipped += 1;
                            if parse_errors_logged < self.config.parse_error_log_cap {
                                warn!(key = %key, entry = %entry, "unparseable variation entry skipped");
                                parse_errors_logged += 1;
                            }
                        }
                    }
                }

                if prices.is_empty() {
                    // Nothing usable; still cleaned up below.
                    processed_keys.push(key.clone());
                    continue;
                }

                let avg = round_average(&prices);
                match self
                    .store
                    .add_daily_average(
                        id,
                        DailyAverage {
                            date: day.clone(),
                            avg,
                        },
                    )
                    .await
                {
                    Ok(added) => {
                        report.items_aggregated += 1;
                        if added {
                            report.averages_added += 1;
                        }
                        processed_keys.push(key.clone());
                    }
                    Err(err) => {
                        // Leave the key in place; a manual re-run can still
                        // see its data.
                        warn!(item_id = %id, error = %err, "average write failed; key kept");
                    }
                }
            }
        }

        report.keys_deleted = self.cleanup(&processed_keys).await;
        self.metrics
            .record_aggregator_run(report.items_aggregated as u64);
        info!(
            day = %day,
            keys = report.keys_found,
            items = report.items_aggregated,
            added = report.averages_added,
            skipped_entries = report.entries_skipped,
            skipped_batches = report.batches_skipped,
            deleted = report.keys_deleted,
            "daily aggregation finished"
        );
        Ok(report)
    }

    /// Read each key's full list, batched through the pipeline when the
    /// store supports it. Returns `None` when the whole batch must be
    /// skipped (failed pipelined read); sequential mode skips single keys
    /// by substituting empty lists instead.
    async fn read_batch(&self, keys: &[String]) -> Option<Vec<Vec<String>>> {
        if self.kv.supports_pipeline() {
            let commands = keys
                .iter()
                .map(|key| KvCommand::ListRange { key: key.clone() })
                .collect();
            return match self.kv.pipeline(commands).await {
                Ok(replies) => Some(
                    replies
                        .into_iter()
                        .map(|reply| match reply {
                            KvReply::Entries(entries) => entries,
                            _ => Vec::new(),
                        })
                        .collect(),
                ),
                Err(err) => {
                    warn!(batch = keys.len(), error = %err, "batched range read failed; batch skipped");
                    None
                }
            };
        }

        let mut lists = Vec::with_capacity(keys.len());
        for key in keys {
            match self.kv.lrange_all(key).await {
                Ok(entries) => lists.push(entries),
                Err(err) => {
                    warn!(key = %key, error = %err, "range read failed; key skipped");
                    lists.push(Vec::new());
                }
            }
        }
        Some(lists)
    }

    /// Best-effort deletion of processed keys. A failure is logged and
    /// swallowed: a leftover key belongs to a day outside the previous-day
    /// window by the next run, so it can never double-count.
    async fn cleanup(&self, keys: &[String]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        match self.kv.del(keys).await {
            Ok(deleted) => deleted,
            Err(err) => {
                warn!(error = %err, keys = keys.len(), "variation-log cleanup failed");
                0
            }
        }
    }

    /// Run once per UTC day, `delay_after_midnight_secs` past midnight,
    /// rescheduling after each run. Failures are logged; the schedule
    /// continues.
    pub fn spawn_schedule(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = next_run_after(now, self.config.delay_after_midnight_secs);
                let wait = (next - now)
                    .to_std()
                    .unwrap_or_else(|_| Duration::from_secs(0));
                info!(run_at = %next, "daily aggregation scheduled");
                tokio::time::sleep(wait).await;

                if let Err(err) = self.run_previous_day(Utc::now()).await {
                    error!(error = %err, "daily aggregation run failed");
                }
            }
        })
    }
}

/// Mean rounded half away from zero.
fn round_average(prices: &[i64]) -> i64 {
    let sum: i64 = prices.iter().sum();
    (sum as f64 / prices.len() as f64).round() as i64
}

/// The next instant strictly after `now` that is `delay_secs` past a UTC
/// midnight.
fn next_run_after(now: DateTime<Utc>, delay_secs: u64) -> DateTime<Utc> {
    let today_run = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc() + chrono::Duration::seconds(delay_secs as i64));
    match today_run {
        Some(at) if at > now => at,
        _ => {
            let tomorrow = now.date_naive() + Days::new(1);
            tomorrow
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc() + chrono::Duration::seconds(delay_secs as i64))
                .unwrap_or(now)
        }
    }
}
