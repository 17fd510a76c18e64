// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of bulks to the Logz.io listener.
//!
//! ```text
//!   Bulk ──> gzip ──> POST <listener>/?token=<token> ──> DispatchOutcome
//! ```
//!
//! A dispatch is a single attempt. It never fails from the caller's point
//! of view: every result, including connection errors and timeouts, is
//! folded into a [`DispatchOutcome`] that carries the bulk's source range
//! back so the retry coordinator can act on it.
//!
//! # Request Format
//!
//! - **Body**: newline-separated JSON lines, gzip encoded unless
//!   `LOGZIO_USE_COMPRESSION=false` or compression fails
//! - **Query**: `token=<LOGZIO_LOGS_TOKEN>`
//! - **Headers**: `Content-Type: application/json`, `logzio-shipper`, and
//!   `Content-Encoding: gzip` for compressed bodies
//! - **Timeout**: `LOGZIO_SEND_TIMEOUT` per attempt
//!
//! # Status Mapping
//!
//! | status | category | retried |
//! |---|---|---|
//! | 200 | `Success` | no |
//! | 400 | `ClientError` | no |
//! | 401 | `AuthError` | yes |
//! | 500 | `ServerError` | yes |
//! | anything else, no response | `OtherError` | no |
//!
//! # Example
//!
//! ```rust,ignore
//! use logzio_logs::logs::flusher::{Dispatcher, Flusher};
//!
//! let flusher = Flusher::new(&config);
//! let outcome = flusher.dispatch(bulk).await;
//! if !outcome.is_success() {
//!     retry.handle(&batch, &outcome);
//! }
//! ```

use std::io::Write;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{debug, error};

use crate::config::Config;
use crate::http::get_client;
use crate::logs::constants::SHIPPER_HEADER;
use crate::logs::splitter::Bulk;

/// How the listener answered a bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    /// 200
    Success,
    /// 400: the payload is malformed and will never be accepted.
    ClientError,
    /// 401: the token is missing or invalid.
    AuthError,
    /// 500
    ServerError,
    /// Any other status, a connection failure or a timeout.
    OtherError,
}

impl StatusCategory {
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            200 => StatusCategory::Success,
            400 => StatusCategory::ClientError,
            401 => StatusCategory::AuthError,
            500 => StatusCategory::ServerError,
            _ => StatusCategory::OtherError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub category: StatusCategory,
    pub source_start: usize,
    pub source_end: usize,
    /// `None` when no response was received.
    pub http_status: Option<u16>,
}

impl DispatchOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.category == StatusCategory::Success
    }
}

/// Sends one bulk and reports what happened to it.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, bulk: Bulk) -> DispatchOutcome;
}

/// [`Dispatcher`] posting to the Logz.io listener over HTTP.
#[derive(Debug, Clone)]
pub struct Flusher {
    client: reqwest::Client,
    /// Listener URL without the token (e.g. "https://listener.logz.io:8071/").
    url: String,
    token: String,
    use_compression: bool,
    compression_level: u32,
    timeout: Duration,
    headers: HeaderMap,
}

impl Flusher {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("logzio-shipper", HeaderValue::from_static(SHIPPER_HEADER));

        Flusher {
            client: get_client(config),
            url: config.ingest_url(),
            token: config.token.clone(),
            use_compression: config.use_compression,
            compression_level: config.compression_level,
            timeout: config.send_timeout,
            headers,
        }
    }

    fn create_request(&self, data: Vec<u8>) -> reqwest::RequestBuilder {
        let request = self
            .client
            .post(&self.url)
            .query(&[("token", self.token.as_str())])
            .timeout(self.timeout)
            .headers(self.headers.clone());

        match self.compress(data) {
            (body, true) => request
                .header(CONTENT_ENCODING, HeaderValue::from_static("gzip"))
                .body(body),
            (body, false) => request.body(body),
        }
    }

    /// Returns the body to send and whether it is gzip encoded. Falls back
    /// to the plain payload if compression fails.
    fn compress(&self, data: Vec<u8>) -> (Vec<u8>, bool) {
        if !self.use_compression {
            return (data, false);
        }

        match self.encode(&data) {
            Ok(compressed) => (compressed, true),
            Err(e) => {
                debug!("LOGS | Failed to compress data: {}", e);
                (data, false)
            }
        }
    }

    fn encode(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(
            Vec::with_capacity(data.len() / 4),
            Compression::new(self.compression_level),
        );
        encoder.write_all(data)?;
        encoder.finish()
    }
}

#[async_trait]
impl Dispatcher for Flusher {
    async fn dispatch(&self, bulk: Bulk) -> DispatchOutcome {
        let Bulk {
            payload,
            source_start,
            source_end,
            line_count,
        } = bulk;
        debug!("LOGS | Sending {line_count} logs, batch range [{source_start}, {source_end}]");

        let time = Instant::now();
        let (category, http_status) = match self.create_request(payload).send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let category = StatusCategory::from_status(status);
                if category != StatusCategory::Success {
                    // Body is only read on failure, it is only useful for diagnostics.
                    let body = resp.text().await.unwrap_or_default();
                    error!("LOGS | Error sending logs to Logz.io: {status} {body}");
                }
                (category, Some(status))
            }
            Err(e) => {
                error!(
                    "LOGS | Error occurred while sending bulk to Logz.io after {} ms: {}",
                    time.elapsed().as_millis(),
                    e
                );
                (StatusCategory::OtherError, None)
            }
        };

        DispatchOutcome {
            category,
            source_start,
            source_end,
            http_status,
        }
    }
}
