// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Splitting of a batch into size-bounded bulks.
//!
//! Each bulk is one request body: newline-separated JSON lines with no
//! trailing newline. A bulk remembers the inclusive `[source_start,
//! source_end]` range of the batch it was built from, so a failed request
//! can hand exactly those records back to the queue.
//!
//! Guarantees, for a single batch:
//! - no bulk payload is larger than the configured bulk limit;
//! - a line whose size meets or exceeds the line limit is dropped and
//!   appears in no bulk;
//! - bulks come out in source order, their ranges do not overlap, and
//!   together they cover every record that was not dropped;
//! - a bulk is never empty.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::Config;
use crate::logs::constants::LINE_SEPARATOR;
use crate::logs::record::LogRecord;
use crate::logs::transformer::Transformer;

/// Measures serialized content for the size limits.
///
/// Implementations must be monotonic in content length, and the same
/// estimator is applied to the accumulated bulk and to each candidate line.
pub trait SizeEstimator: Send + Sync + fmt::Debug {
    fn estimate(&self, content: &str) -> usize;
}

/// Exact UTF-8 byte length, i.e. the size of the uncompressed request body.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodedLength;

impl SizeEstimator for EncodedLength {
    fn estimate(&self, content: &str) -> usize {
        content.len()
    }
}

/// One request worth of lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bulk {
    pub payload: Vec<u8>,
    /// Index of the first record in this bulk.
    pub source_start: usize,
    /// Index of the last record in this bulk, inclusive.
    pub source_end: usize,
    pub line_count: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SplitOutcome {
    pub bulks: Vec<Bulk>,
    /// Records left out of every bulk: oversized, placeholder or malformed.
    pub dropped: usize,
}

#[derive(Default)]
struct OpenBulk {
    payload: String,
    source_start: usize,
    source_end: usize,
    line_count: usize,
}

impl OpenBulk {
    fn push(&mut self, index: usize, line: &str) {
        if self.line_count == 0 {
            self.source_start = index;
        }
        self.payload.push_str(line);
        self.source_end = index;
        self.line_count += 1;
    }

    /// Closes the bulk, leaving an empty one in its place.
    fn close(&mut self) -> Option<Bulk> {
        let mut open = std::mem::take(self);
        if open.line_count == 0 {
            return None;
        }
        if open.payload.ends_with(LINE_SEPARATOR) {
            open.payload
                .truncate(open.payload.len() - LINE_SEPARATOR.len());
        }
        Some(Bulk {
            payload: open.payload.into_bytes(),
            source_start: open.source_start,
            source_end: open.source_end,
            line_count: open.line_count,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Splitter {
    transformer: Transformer,
    estimator: Arc<dyn SizeEstimator>,
    max_line_size: usize,
    max_bulk_size: usize,
}

impl Splitter {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_estimator(
            Transformer::new(config),
            Arc::new(EncodedLength),
            config.max_log_size_bytes,
            config.max_bulk_size_bytes,
        )
    }

    #[must_use]
    pub fn with_estimator(
        transformer: Transformer,
        estimator: Arc<dyn SizeEstimator>,
        max_line_size: usize,
        max_bulk_size: usize,
    ) -> Self {
        Splitter {
            transformer,
            estimator,
            max_line_size,
            max_bulk_size,
        }
    }

    pub fn split(&self, batch: &[LogRecord]) -> SplitOutcome {
        let mut outcome = SplitOutcome::default();
        let mut open = OpenBulk::default();

        for (index, record) in batch.iter().enumerate() {
            let Some(line) = self.transformer.transform(record, LINE_SEPARATOR) else {
                outcome.dropped += 1;
                continue;
            };

            let line_size = self.estimator.estimate(&line);
            // A line bigger than a whole bulk could never be sent either.
            if line_size >= self.max_line_size || line_size > self.max_bulk_size {
                error!(
                    "LOGS | Log line at index {index} size ({line_size} bytes) is larger than allowed. Dropping log."
                );
                outcome.dropped += 1;
                continue;
            }

            if self.estimator.estimate(&open.payload) + line_size > self.max_bulk_size {
                debug!("LOGS | Batch exceeds allowed bulk size, starting a new bulk at index {index}");
                outcome.bulks.extend(open.close());
            }
            open.push(index, &line);
        }
        outcome.bulks.extend(open.close());

        debug!(
            "LOGS | Split {} records into {} bulks, dropped {}",
            batch.len(),
            outcome.bulks.len(),
            outcome.dropped
        );
        outcome
    }
}
