// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batches waiting to be shipped.
//!
//! Producers (the ingestion listener and the retry coordinator) hold a
//! cloneable [`QueueHandle`]; the engine owns the single [`PendingQueue`]
//! and takes everything queued so far at the start of each cycle. A batch
//! pushed while a drain is in progress is picked up by the next one.

use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::error;

use crate::logs::record::Batch;

#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Batch>,
}

#[derive(Debug)]
pub struct PendingQueue {
    rx: mpsc::UnboundedReceiver<Batch>,
}

/// Creates a queue and a first handle to push into it.
#[must_use]
pub fn pending_queue() -> (QueueHandle, PendingQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueHandle { tx }, PendingQueue { rx })
}

impl QueueHandle {
    /// Appends `batch`. Empty batches are ignored.
    ///
    /// Returns `false` if the engine has gone away and the batch was lost.
    pub fn push(&self, batch: Batch) -> bool {
        if batch.is_empty() {
            return true;
        }
        let len = batch.len();
        match self.tx.send(batch) {
            Ok(()) => true,
            Err(_) => {
                error!("LOGS | Pending queue is closed, dropping {len} records");
                false
            }
        }
    }
}

impl PendingQueue {
    /// Removes and returns every batch queued so far, oldest first.
    pub fn drain(&mut self) -> Vec<Batch> {
        let mut batches = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(batch) => batches.push(batch),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        batches
    }
}
