// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! What to do with a bulk once the listener has answered.
//!
//! Only authorization (401) and server (500) errors are worth another try:
//! the records of the failed bulk are copied out of their batch and queued
//! as a brand-new batch for the next cycle. Everything else is logged and
//! discarded.

use tracing::error;

use crate::logs::flusher::{DispatchOutcome, StatusCategory};
use crate::logs::queue::QueueHandle;
use crate::logs::record::LogRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Delivered,
    /// This many records were queued again.
    Requeued(usize),
    Discarded,
}

#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    queue: QueueHandle,
}

impl RetryCoordinator {
    #[must_use]
    pub fn new(queue: QueueHandle) -> Self {
        RetryCoordinator { queue }
    }

    /// Applies the retry policy to one outcome of `batch`.
    pub fn handle(&self, batch: &[LogRecord], outcome: &DispatchOutcome) -> RetryAction {
        let (start, end) = (outcome.source_start, outcome.source_end);
        match outcome.category {
            StatusCategory::Success => RetryAction::Delivered,
            StatusCategory::ClientError => {
                error!(
                    "LOGS | Bad request, dropping logs in batch range [{start}, {end}]. Check the log format"
                );
                RetryAction::Discarded
            }
            StatusCategory::AuthError => {
                error!("LOGS | Logz.io token is invalid or missing, requeueing batch range [{start}, {end}]");
                self.requeue(batch, start, end)
            }
            StatusCategory::ServerError => {
                error!("LOGS | Logz.io listener internal error, requeueing batch range [{start}, {end}]");
                self.requeue(batch, start, end)
            }
            StatusCategory::OtherError => {
                match outcome.http_status {
                    Some(status) => error!(
                        "LOGS | Unexpected status {status} from Logz.io, dropping batch range [{start}, {end}]"
                    ),
                    None => error!(
                        "LOGS | No response from Logz.io, dropping batch range [{start}, {end}]"
                    ),
                }
                RetryAction::Discarded
            }
        }
    }

    /// Puts a batch that was never dispatched back on the queue as is.
    pub fn return_batch(&self, batch: Vec<LogRecord>) -> bool {
        self.queue.push(batch)
    }

    fn requeue(&self, batch: &[LogRecord], start: usize, end: usize) -> RetryAction {
        let Some(records) = batch.get(start..=end) else {
            error!(
                "LOGS | Range [{start}, {end}] is outside of a batch of {} records, dropping it",
                batch.len()
            );
            return RetryAction::Discarded;
        };
        let count = records.len();
        if self.queue.push(records.to_vec()) {
            RetryAction::Requeued(count)
        } else {
            RetryAction::Discarded
        }
    }
}
