// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The drain loop.
//!
//! ```text
//!   Idle ──(queue non-empty)──> Draining ──> Completing ──> Idle
//! ```
//!
//! A cycle takes every queued batch and hands each one to a bounded pool of
//! batch workers. A batch worker splits its batch and hands each bulk to a
//! second bounded pool shared by all batches. Submission waits for a free
//! worker, so a burst of batches is throttled instead of spawning a task per
//! item.
//!
//! # Completion Timeout
//!
//! With `THREAD_TIMEOUT` set, the whole cycle is bounded, waiting for a
//! free worker included. When the limit expires:
//! - batches that never got a worker go back on the queue untouched
//! - workers still running are detached and finish in the background
//! - whatever a detached worker requeues is picked up by a later cycle
//!
//! # State
//!
//! The current [`EngineState`] is published on a `watch` channel, so other
//! tasks can follow a cycle while it runs.
//!
//! # Usage
//!
//! ```rust,ignore
//! use logzio_logs::engine::{Engine, EngineState};
//! use logzio_logs::logs::queue::pending_queue;
//!
//! let (handle, queue) = pending_queue();
//! let mut engine = Engine::from_config(&config, queue, handle.clone());
//! let mut state = engine.state_watch();
//!
//! handle.push(batch);
//! let report = engine.run_cycle().await;
//! assert_eq!(*state.borrow_and_update(), EngineState::Idle);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::ExtensionError;
use crate::extension::{Lifecycle, LifecycleEvent};
use crate::logs::flusher::{Dispatcher, Flusher};
use crate::logs::queue::{PendingQueue, QueueHandle};
use crate::logs::record::Batch;
use crate::logs::retry::{RetryAction, RetryCoordinator};
use crate::logs::splitter::{SplitOutcome, Splitter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Draining,
    Completing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub batch_workers: usize,
    pub bulk_workers: usize,
    /// `None` waits for every batch, however long it takes.
    pub completion_timeout: Option<Duration>,
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        EngineConfig {
            batch_workers: config.batch_workers,
            bulk_workers: config.bulk_workers,
            completion_timeout: config.completion_timeout,
        }
    }
}

/// What one drain cycle achieved. Counts only cover batch workers that
/// finished before the completion phase ended.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub batches: usize,
    /// Batches whose every bulk was accepted.
    pub clean_batches: usize,
    pub delivered_bulks: usize,
    pub requeued_bulks: usize,
    pub requeued_records: usize,
    /// Bulks rejected for good (400, unexpected status, no response).
    pub dropped_bulks: usize,
    /// Records left out by the splitter.
    pub dropped_records: usize,
    /// Batches put back on the queue before any worker picked them up.
    pub returned_batches: usize,
    pub timed_out: bool,
}

impl CycleReport {
    fn absorb(&mut self, batch: BatchReport) {
        if batch.is_clean() {
            self.clean_batches += 1;
        }
        self.delivered_bulks += batch.delivered_bulks;
        self.requeued_bulks += batch.requeued_bulks;
        self.requeued_records += batch.requeued_records;
        self.dropped_bulks += batch.dropped_bulks;
        self.dropped_records += batch.dropped_records;
    }

    fn collect(&mut self, joined: Result<BatchReport, JoinError>) {
        match joined {
            Ok(batch_report) => {
                if batch_report.is_clean() {
                    info!("LOGS | Batch sent without errors");
                } else {
                    warn!("LOGS | Some errors occurred while sending batch");
                }
                self.absorb(batch_report);
            }
            Err(e) => error!("LOGS | Batch worker failed: {e}"),
        }
    }
}

#[derive(Debug, Default)]
struct BatchReport {
    delivered_bulks: usize,
    requeued_bulks: usize,
    requeued_records: usize,
    dropped_bulks: usize,
    dropped_records: usize,
}

impl BatchReport {
    fn is_clean(&self) -> bool {
        self.requeued_bulks == 0 && self.dropped_bulks == 0
    }
}

pub struct Engine {
    config: EngineConfig,
    state: watch::Sender<EngineState>,
    queue: PendingQueue,
    retry: RetryCoordinator,
    splitter: Arc<Splitter>,
    dispatcher: Arc<dyn Dispatcher>,
    batch_permits: Arc<Semaphore>,
    bulk_permits: Arc<Semaphore>,
    cycles: u64,
}

impl Engine {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        queue: PendingQueue,
        handle: QueueHandle,
        splitter: Splitter,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let batch_permits = Arc::new(Semaphore::new(config.batch_workers.max(1)));
        let bulk_permits = Arc::new(Semaphore::new(config.bulk_workers.max(1)));
        let (state, _) = watch::channel(EngineState::Idle);
        Engine {
            config,
            state,
            queue,
            retry: RetryCoordinator::new(handle),
            splitter: Arc::new(splitter),
            dispatcher,
            batch_permits,
            bulk_permits,
            cycles: 0,
        }
    }

    /// Engine shipping to the Logz.io listener named in `config`.
    #[must_use]
    pub fn from_config(config: &Config, queue: PendingQueue, handle: QueueHandle) -> Self {
        Self::new(
            EngineConfig::from(config),
            queue,
            handle,
            Splitter::new(config),
            Arc::new(Flusher::new(config)),
        )
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Receiver that sees every state transition of later cycles.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Drives the engine from the lifecycle event stream until shutdown.
    ///
    /// Every slice starts with a drain of whatever arrived while waiting. A
    /// shutdown event gets one last drain so deliveries that raced the
    /// event are not lost.
    pub async fn run<L>(&mut self, lifecycle: &mut L) -> Result<(), ExtensionError>
    where
        L: Lifecycle + ?Sized,
    {
        loop {
            self.run_cycle().await;
            match lifecycle.next_event().await? {
                LifecycleEvent::Invoke { request_id } => {
                    debug!("LOGS | Received invoke event, request id: {:?}", request_id);
                }
                LifecycleEvent::Shutdown { reason } => {
                    info!("LOGS | Received shutdown event, reason: {:?}. Running final drain", reason);
                    self.run_cycle().await;
                    return Ok(());
                }
            }
        }
    }

    /// Runs one drain cycle and returns to `Idle`.
    #[instrument(skip(self), fields(cycle = self.cycles))]
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let mut report = CycleReport::default();

        let batches = self.queue.drain();
        if batches.is_empty() {
            debug!("LOGS | Pending queue is empty");
            return report;
        }

        let time = Instant::now();
        self.state.send_replace(EngineState::Draining);
        report.batches = batches.len();
        debug!("LOGS | Draining {} batches", batches.len());

        let mut pending = VecDeque::from(batches);
        let mut tasks = JoinSet::new();
        let state = &self.state;
        let batch_permits = &self.batch_permits;
        let splitter = &self.splitter;
        let dispatcher = &self.dispatcher;
        let bulk_permits = &self.bulk_permits;
        let retry = &self.retry;

        let cycle = async {
            while !pending.is_empty() {
                let acquired = tokio::select! {
                    acquired = Arc::clone(batch_permits).acquire_owned() => acquired,
                    Some(joined) = tasks.join_next() => {
                        report.collect(joined);
                        continue;
                    }
                };
                let Ok(permit) = acquired else {
                    error!("LOGS | Batch worker pool is closed");
                    break;
                };
                let Some(batch) = pending.pop_front() else {
                    break;
                };
                let splitter = Arc::clone(splitter);
                let dispatcher = Arc::clone(dispatcher);
                let bulk_permits = Arc::clone(bulk_permits);
                let retry = retry.clone();
                tasks.spawn(async move {
                    let report = process_batch(batch, &splitter, dispatcher, bulk_permits, &retry).await;
                    drop(permit);
                    report
                });
            }

            state.send_replace(EngineState::Completing);
            while let Some(joined) = tasks.join_next().await {
                report.collect(joined);
            }
        };
        let timed_out = match self.config.completion_timeout {
            Some(limit) => tokio::time::timeout(limit, cycle).await.is_err(),
            None => {
                cycle.await;
                false
            }
        };

        if timed_out {
            warn!(
                "LOGS | Completion timeout reached with {} batch workers still running and {} batches not started",
                tasks.len(),
                pending.len()
            );
            tasks.detach_all();
            report.timed_out = true;
        }

        for batch in pending {
            if self.retry.return_batch(batch) {
                report.returned_batches += 1;
            }
        }
        if report.returned_batches > 0 {
            info!("LOGS | Returned {} batches to the queue", report.returned_batches);
        }

        self.state.send_replace(EngineState::Idle);
        debug!(
            "LOGS | Cycle finished in {} ms: {:?}",
            time.elapsed().as_millis(),
            report
        );
        report
    }
}

async fn process_batch(
    batch: Batch,
    splitter: &Splitter,
    dispatcher: Arc<dyn Dispatcher>,
    bulk_permits: Arc<Semaphore>,
    retry: &RetryCoordinator,
) -> BatchReport {
    let SplitOutcome { bulks, dropped } = splitter.split(&batch);
    let mut report = BatchReport {
        dropped_records: dropped,
        ..Default::default()
    };

    let mut tasks = JoinSet::new();
    for bulk in bulks {
        let Ok(permit) = Arc::clone(&bulk_permits).acquire_owned().await else {
            error!(
                "LOGS | Bulk worker pool is closed, returning batch range [{}, {}] to the queue",
                bulk.source_start, bulk.source_end
            );
            match batch.get(bulk.source_start..=bulk.source_end) {
                Some(records) if retry.return_batch(records.to_vec()) => {
                    report.requeued_bulks += 1;
                    report.requeued_records += records.len();
                }
                _ => report.dropped_bulks += 1,
            }
            continue;
        };
        let dispatcher = Arc::clone(&dispatcher);
        tasks.spawn(async move {
            let outcome = dispatcher.dispatch(bulk).await;
            drop(permit);
            outcome
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => match retry.handle(&batch, &outcome) {
                RetryAction::Delivered => report.delivered_bulks += 1,
                RetryAction::Requeued(records) => {
                    report.requeued_bulks += 1;
                    report.requeued_records += records;
                }
                RetryAction::Discarded => report.dropped_bulks += 1,
            },
            Err(e) => {
                error!("LOGS | Bulk worker failed: {e}");
                report.dropped_bulks += 1;
            }
        }
    }
    report
}
