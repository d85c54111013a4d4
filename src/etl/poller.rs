// ABOUTME: Change poller - timer-driven incremental extraction with a monotonic watermark
// ABOUTME: One cycle in flight at a time; the watermark advances only after a successful delivery

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clickhouse::ClickHouseClient;
use crate::error::{EtlError, Result};
use crate::progress::{NoopProgress, ProgressEvent, ProgressSink};

use super::reader::{extract_since, SourceReader};
use super::value::{TableSnapshot, Value, Watermark};
use super::writer::BatchLoader;

/// What to poll and how often.
#[derive(Debug, Clone)]
pub struct PollSpec {
    pub table: String,
    pub delta_column: String,
    pub interval: Duration,
    /// Maximum rows per cycle; zero or less means unbounded
    pub limit: i64,
    pub start_watermark: Watermark,
}

/// Consumes one batch of newly extracted rows.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, snapshot: &TableSnapshot) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Extracting,
    Delivering,
    Stopped,
}

/// Result of a single polling cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No rows past the watermark
    Empty,
    /// Rows delivered; `watermark` is the value after this cycle
    Delivered { rows: usize, watermark: Watermark },
}

/// Polls a source table for rows past a watermark and hands them off
///
/// The poller owns its watermark for the lifetime of one [`start`] call;
/// nothing is persisted, so a restart resumes from whatever start
/// watermark the caller supplies.
///
/// [`start`]: ChangePoller::start
pub struct ChangePoller<S: SourceReader, H: BatchHandler> {
    source: S,
    handler: H,
    spec: PollSpec,
    watermark: Watermark,
    state: PollerState,
    progress: Arc<dyn ProgressSink>,
}

impl<S: SourceReader, H: BatchHandler> ChangePoller<S, H> {
    pub fn new(source: S, handler: H, spec: PollSpec) -> Self {
        let watermark = spec.start_watermark.clone();
        Self {
            source,
            handler,
            spec,
            watermark,
            state: PollerState::Idle,
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn watermark(&self) -> &Watermark {
        &self.watermark
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Run one extract/deliver cycle
    ///
    /// On any error the watermark is left untouched so the next cycle
    /// re-reads the same window.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.state = PollerState::Extracting;
        let snapshot = match extract_since(
            &self.source,
            &self.spec.table,
            &self.spec.delta_column,
            &self.watermark,
            self.spec.limit,
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.state = PollerState::Idle;
                return Err(e);
            }
        };

        if snapshot.is_empty() {
            self.state = PollerState::Idle;
            return Ok(CycleOutcome::Empty);
        }

        self.state = PollerState::Delivering;
        let delivered = self.handler.handle(&snapshot).await;
        self.state = PollerState::Idle;
        delivered?;

        if let Some(last) = snapshot
            .column_index(&self.spec.delta_column)
            .and_then(|idx| snapshot.last_value(idx))
        {
            self.advance(last.clone());
        }

        Ok(CycleOutcome::Delivered {
            rows: snapshot.len(),
            watermark: self.watermark.clone(),
        })
    }

    /// Move the watermark forward to `value`. NULLs and values behind the
    /// current watermark are ignored.
    fn advance(&mut self, value: Value) {
        if value.is_null() {
            tracing::warn!(
                "Last row of {} has NULL {}; watermark stays at {}",
                self.spec.table,
                self.spec.delta_column,
                self.watermark
            );
            return;
        }

        if let Watermark::At(current) = &self.watermark {
            if current.compare(&value) == Some(Ordering::Greater) {
                tracing::warn!(
                    "Delta value {} for {} is behind watermark {}; not moving backwards",
                    value,
                    self.spec.table,
                    current
                );
                return;
            }
        }

        self.watermark = Watermark::At(value);
    }

    /// Poll until `cancel` fires
    ///
    /// The first cycle runs one interval after the call. Cycle failures are
    /// logged and the loop carries on with the next tick; a cycle that
    /// overruns the interval delays the next tick instead of stacking them.
    ///
    /// # Returns
    ///
    /// Always [`EtlError::Cancelled`] once the token fires.
    pub async fn start(&mut self, cancel: CancellationToken) -> Result<()> {
        let period = self.spec.interval;
        if period.is_zero() {
            return Err(EtlError::validation("poll interval must be greater than 0"));
        }

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Polling {} every {:?} on {} starting from {}",
            self.spec.table,
            period,
            self.spec.delta_column,
            self.watermark
        );

        let mut cycles = 0u64;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::info!("Stopping poller for {} at watermark {}", self.spec.table, self.watermark);
                    self.state = PollerState::Stopped;
                    return Err(EtlError::Cancelled);
                }
                _ = ticker.tick() => {
                    cycles += 1;
                    tracing::debug!("Starting poll cycle {} for {}", cycles, self.spec.table);

                    // Cancellation also interrupts a cycle in flight
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = self.run_cycle() => Some(result),
                    };
                    let Some(result) = result else {
                        tracing::info!("Shutdown signal received during poll cycle {}, aborting", cycles);
                        self.state = PollerState::Stopped;
                        return Err(EtlError::Cancelled);
                    };

                    match result {
                        Ok(CycleOutcome::Empty) => {
                            tracing::debug!("No new rows in {} since {}", self.spec.table, self.watermark);
                        }
                        Ok(CycleOutcome::Delivered { rows, watermark }) => {
                            tracing::info!(
                                "Poll cycle {} delivered {} rows from {}, watermark now {}",
                                cycles,
                                rows,
                                self.spec.table,
                                watermark
                            );
                            self.progress.notify(&ProgressEvent::PollCycle {
                                table: self.spec.table.clone(),
                                rows,
                                watermark: watermark.to_string(),
                            });
                        }
                        Err(e) if e.is_cancelled() => {
                            self.state = PollerState::Stopped;
                            return Err(EtlError::Cancelled);
                        }
                        Err(e) => {
                            // Log with :? to show the full error chain
                            tracing::error!("Poll cycle {} for {} failed: {:?}", cycles, self.spec.table, e);
                            self.progress.notify(&ProgressEvent::PollFailed {
                                table: self.spec.table.clone(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }
}

/// Starting watermark for a poll that follows a full load: the largest
/// delta value in the snapshot, or unset if it has none.
pub fn initial_watermark(snapshot: &TableSnapshot, delta_column: &str) -> Watermark {
    snapshot
        .column_index(delta_column)
        .and_then(|idx| snapshot.max_value(idx))
        .cloned()
        .map(Watermark::At)
        .unwrap_or_default()
}

/// Handler that loads each polled batch into ClickHouse
///
/// A fresh destination connection is opened per batch and dropped
/// afterwards, so no connection is shared across loads.
pub struct LoadingHandler {
    ch_url: String,
    table: String,
    batch_size: usize,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressSink>,
}

impl LoadingHandler {
    pub fn new(
        ch_url: impl Into<String>,
        table: impl Into<String>,
        batch_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ch_url: ch_url.into(),
            table: table.into(),
            batch_size,
            cancel,
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }
}

#[async_trait]
impl BatchHandler for LoadingHandler {
    async fn handle(&self, snapshot: &TableSnapshot) -> Result<()> {
        let destination = ClickHouseClient::connect(&self.ch_url).await?;
        BatchLoader::new(&destination)
            .with_cancel(self.cancel.clone())
            .with_progress(self.progress.clone())
            .load(
                &self.table,
                &snapshot.column_names(),
                &snapshot.rows,
                self.batch_size,
            )
            .await?;
        Ok(())
    }
}
