// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Logz.io Lambda logs
//!
//! Ships AWS Lambda function logs to Logz.io from inside the execution
//! environment, as a Lambda extension.
//!
//! - [`listener`]: receives record batches pushed by the Logs API
//! - [`logs`]: turns batches into bulks, sends them, requeues failures
//! - [`engine`]: drains the pending queue once per scheduling slice
//! - [`extension`]: registration, event stream and Logs API subscription
//! - [`config`]: environment-driven configuration

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod engine;
pub mod error;
pub mod extension;
pub mod http;
pub mod listener;
pub mod logger;
pub mod logs;
