// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lambda runtime API integration: extension registration, the invoke and
//! shutdown event stream, and the Logs API subscription.

pub mod client;
pub mod subscription;

use async_trait::async_trait;

use crate::error::ExtensionError;

pub const EXTENSION_ID_HEADER: &str = "Lambda-Extension-Identifier";
pub const EXTENSION_NAME_HEADER: &str = "Lambda-Extension-Name";

/// Scheduling signals delivered by the host platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Invoke { request_id: Option<String> },
    Shutdown { reason: Option<String> },
}

/// Source of scheduling slices for the engine loop.
#[async_trait]
pub trait Lifecycle: Send {
    /// Blocks until the platform hands out the next slice.
    async fn next_event(&mut self) -> Result<LifecycleEvent, ExtensionError>;
}

/// `host:port` of the runtime API to a base URL.
#[must_use]
pub fn base_url(runtime_api: &str) -> String {
    if runtime_api.starts_with("http://") || runtime_api.starts_with("https://") {
        runtime_api.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", runtime_api.trim_end_matches('/'))
    }
}
