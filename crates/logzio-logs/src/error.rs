// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while reading the extension configuration at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    MissingVariable(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by the collaborators around the shipping engine: the
/// runtime API clients and the ingestion listener. All of them are fatal
/// when they happen during startup.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("Failed to register extension: {0}")]
    Registration(String),

    #[error("Failed to subscribe to the Logs API: {0}")]
    Subscription(String),

    #[error("Failed to fetch next event: {0}")]
    NextEvent(String),

    #[error("Ingestion listener failed to bind {addr} within {grace_secs}s: {reason}")]
    ListenerBind {
        addr: String,
        grace_secs: u64,
        reason: String,
    },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
