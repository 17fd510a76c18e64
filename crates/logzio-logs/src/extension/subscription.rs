// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Subscription to the Lambda Logs API.

use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::ExtensionError;
use crate::extension::{base_url, EXTENSION_ID_HEADER};
use crate::http::get_runtime_client;

const LOGS_API_VERSION: &str = "2020-08-15";

/// Hostname the Lambda sandbox resolves to the execution environment.
const SANDBOX_HOST: &str = "sandbox";

const BUFFERING_TIMEOUT_MS: u64 = 1_000;
const BUFFERING_MAX_BYTES: u64 = 262_144;
const BUFFERING_MAX_ITEMS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub protocol: &'static str,
    #[serde(rename = "URI")]
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Buffering {
    pub timeout_ms: u64,
    pub max_bytes: u64,
    pub max_items: u64,
}

impl Default for Buffering {
    fn default() -> Self {
        Buffering {
            timeout_ms: BUFFERING_TIMEOUT_MS,
            max_bytes: BUFFERING_MAX_BYTES,
            max_items: BUFFERING_MAX_ITEMS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    pub destination: Destination,
    pub types: Vec<&'static str>,
    pub buffering: Buffering,
}

impl SubscriptionRequest {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        SubscriptionRequest {
            destination: Destination {
                protocol: "HTTP",
                uri: format!("http://{SANDBOX_HOST}:{}", config.receiver_port),
            },
            types: config.log_types(),
            buffering: Buffering::default(),
        }
    }
}

/// Asks the Logs API to push records to the ingestion listener. Anything
/// but a 200 is an error; the extension cannot do its job without it.
pub async fn subscribe(
    runtime_api: &str,
    extension_id: &str,
    request: &SubscriptionRequest,
) -> Result<(), ExtensionError> {
    let url = format!("{}/{LOGS_API_VERSION}/logs", base_url(runtime_api));
    info!("LOGS | Subscribing to Logs API on {url}");
    debug!("LOGS | Subscription request: {:?}", request);

    let resp = get_runtime_client()
        .put(&url)
        .header(EXTENSION_ID_HEADER, extension_id)
        .json(request)
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if status != reqwest::StatusCode::OK {
        error!("LOGS | Could not subscribe to Logs API: {status} {body}");
        return Err(ExtensionError::Subscription(format!("{status} {body}")));
    }

    info!("LOGS | Successfully subscribed to Logs API: {body}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[test]
    fn test_request_body() {
        let config = Config {
            enable_platform_logs: true,
            ..Default::default()
        };
        let body = serde_json::to_value(SubscriptionRequest::new(&config)).unwrap();

        assert_eq!(
            body,
            json!({
                "destination": {"protocol": "HTTP", "URI": "http://sandbox:4243"},
                "types": ["function", "platform"],
                "buffering": {"timeoutMs": 1000, "maxBytes": 262_144, "maxItems": 10_000}
            })
        );
    }

    #[tokio::test]
    async fn test_subscribe() {
        let mut server = Server::new_async().await;
        let request = SubscriptionRequest::new(&Config::default());
        let mock = server
            .mock("PUT", "/2020-08-15/logs")
            .match_header("lambda-extension-identifier", "ext-id")
            .match_body(Matcher::Json(serde_json::to_value(&request).unwrap()))
            .with_status(200)
            .with_body("OK")
            .create_async()
            .await;

        subscribe(&server.host_with_port(), "ext-id", &request)
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_subscribe_rejected_is_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("PUT", "/2020-08-15/logs")
            .with_status(202)
            .with_body("not supported")
            .create_async()
            .await;

        let result = subscribe(
            &server.host_with_port(),
            "ext-id",
            &SubscriptionRequest::new(&Config::default()),
        )
        .await;

        assert!(matches!(result, Err(ExtensionError::Subscription(_))));
    }
}
