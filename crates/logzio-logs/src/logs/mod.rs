// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log shipping to Logz.io.
//!
//! ```text
//!   Logs API ──> listener ──> PendingQueue ──> Splitter ──> Flusher ──> Logz.io
//!                                  ^                            │
//!                                  └──── RetryCoordinator <─────┘
//! ```
//!
//! - [`record`]: the records the Logs API delivers
//! - [`transformer`]: one record to one JSON line
//! - [`splitter`]: one batch to size-bounded bulks
//! - [`flusher`]: one bulk to one HTTP request
//! - [`retry`]: requeues the records of retryable failures
//! - [`queue`]: batches waiting for the next cycle

pub mod constants;
pub mod flusher;
pub mod grok;
pub mod queue;
pub mod record;
pub mod retry;
pub mod splitter;
pub mod transformer;
