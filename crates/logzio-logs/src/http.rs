// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared reqwest client construction for the listener and runtime API calls.

use core::time::Duration;
use std::error::Error;

use tracing::error;

use crate::config::Config;

/// Builds the client used to ship bulks. Falls back to a direct
/// connection when the proxy setting cannot be parsed, and to reqwest's
/// defaults if even that fails.
#[must_use]
pub fn get_client(config: &Config) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(config: &Config, allow_proxy: bool) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .timeout(config.send_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if allow_proxy {
        if let Some(https_uri) = &config.https_proxy {
            client = client.proxy(reqwest::Proxy::https(https_uri.clone())?);
        }
    }

    Ok(client.build()?)
}

/// Client for the local Lambda runtime API. No timeout: the next-event call
/// legitimately blocks until the platform has work for us.
#[must_use]
pub fn get_runtime_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap_or_else(|e| {
            error!("Failed to build runtime API client: {}, using reqwest defaults", e);
            reqwest::Client::new()
        })
}
