// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use crate::error::ExtensionError;
use crate::extension::{
    base_url, Lifecycle, LifecycleEvent, EXTENSION_ID_HEADER, EXTENSION_NAME_HEADER,
};
use crate::http::get_runtime_client;

const EXTENSION_API_VERSION: &str = "2020-01-01";

#[derive(Debug, Deserialize)]
#[serde(tag = "eventType", rename_all = "UPPERCASE")]
enum NextEventResponse {
    Invoke {
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    Shutdown {
        #[serde(rename = "shutdownReason", default)]
        shutdown_reason: Option<String>,
    },
}

impl From<NextEventResponse> for LifecycleEvent {
    fn from(event: NextEventResponse) -> Self {
        match event {
            NextEventResponse::Invoke { request_id } => LifecycleEvent::Invoke { request_id },
            NextEventResponse::Shutdown { shutdown_reason } => LifecycleEvent::Shutdown {
                reason: shutdown_reason,
            },
        }
    }
}

/// Client of the Lambda Extensions API.
#[derive(Debug, Clone)]
pub struct ExtensionsApiClient {
    client: reqwest::Client,
    base_url: String,
    extension_id: Option<String>,
}

impl ExtensionsApiClient {
    #[must_use]
    pub fn new(runtime_api: &str) -> Self {
        ExtensionsApiClient {
            client: get_runtime_client(),
            base_url: format!("{}/{EXTENSION_API_VERSION}/extension", base_url(runtime_api)),
            extension_id: None,
        }
    }

    #[must_use]
    pub fn extension_id(&self) -> Option<&str> {
        self.extension_id.as_deref()
    }

    /// Registers for `INVOKE` and `SHUTDOWN` events under `name`, which must
    /// match the extension's file name, and returns the assigned identifier.
    pub async fn register(&mut self, name: &str) -> Result<String, ExtensionError> {
        let url = format!("{}/register", self.base_url);
        debug!("Registering extension {name} at {url}");

        let resp = self
            .client
            .post(&url)
            .header(EXTENSION_NAME_HEADER, name)
            .json(&json!({ "events": ["INVOKE", "SHUTDOWN"] }))
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            error!("Extension registration failed: {status} {body}");
            return Err(ExtensionError::Registration(format!("{status} {body}")));
        }

        let id = resp
            .headers()
            .get(EXTENSION_ID_HEADER)
            .and_then(|val| val.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ExtensionError::Registration(format!("response has no {EXTENSION_ID_HEADER} header"))
            })?;

        debug!("Extension registered with id {id}");
        self.extension_id = Some(id.clone());
        Ok(id)
    }
}

#[async_trait]
impl Lifecycle for ExtensionsApiClient {
    async fn next_event(&mut self) -> Result<LifecycleEvent, ExtensionError> {
        let Some(id) = self.extension_id.as_deref() else {
            return Err(ExtensionError::NextEvent(
                "extension is not registered".to_string(),
            ));
        };

        let resp = self
            .client
            .get(format!("{}/event/next", self.base_url))
            .header(EXTENSION_ID_HEADER, id)
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExtensionError::NextEvent(format!("{status} {body}")));
        }

        let event: NextEventResponse = resp
            .json()
            .await
            .map_err(|e| ExtensionError::NextEvent(e.to_string()))?;
        Ok(event.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn test_register_returns_identifier() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/2020-01-01/extension/register")
            .match_header("lambda-extension-name", "logzio-logs-extension")
            .match_body(Matcher::Json(json!({"events": ["INVOKE", "SHUTDOWN"]})))
            .with_status(200)
            .with_header("Lambda-Extension-Identifier", "ext-id-1")
            .with_body("{\"functionName\":\"f\"}")
            .create_async()
            .await;

        let mut client = ExtensionsApiClient::new(&server.host_with_port());
        let id = client.register("logzio-logs-extension").await.unwrap();

        mock.assert_async().await;
        assert_eq!(id, "ext-id-1");
        assert_eq!(client.extension_id(), Some("ext-id-1"));
    }

    #[tokio::test]
    async fn test_register_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/2020-01-01/extension/register")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let mut client = ExtensionsApiClient::new(&server.host_with_port());
        let result = client.register("ext").await;

        assert!(matches!(result, Err(ExtensionError::Registration(_))));
        assert_eq!(client.extension_id(), None);
    }

    #[tokio::test]
    async fn test_register_without_identifier() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/2020-01-01/extension/register")
            .with_status(200)
            .create_async()
            .await;

        let mut client = ExtensionsApiClient::new(&server.host_with_port());
        assert!(matches!(
            client.register("ext").await,
            Err(ExtensionError::Registration(_))
        ));
    }

    #[tokio::test]
    async fn test_next_event_invoke_and_shutdown() {
        let mut server = Server::new_async().await;
        let _register = server
            .mock("POST", "/2020-01-01/extension/register")
            .with_status(200)
            .with_header("Lambda-Extension-Identifier", "ext-id-2")
            .create_async()
            .await;
        let invoke = server
            .mock("GET", "/2020-01-01/extension/event/next")
            .match_header("lambda-extension-identifier", "ext-id-2")
            .with_status(200)
            .with_body(
                json!({
                    "eventType": "INVOKE",
                    "deadlineMs": 1_676_051_471_000_u64,
                    "requestId": "req-1",
                    "invokedFunctionArn": "arn:aws:lambda:us-east-1:123:function:f",
                    "tracing": {"type": "X-Amzn-Trace-Id", "value": "Root=1"}
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let mut client = ExtensionsApiClient::new(&server.host_with_port());
        client.register("ext").await.unwrap();

        assert_eq!(
            client.next_event().await.unwrap(),
            LifecycleEvent::Invoke {
                request_id: Some("req-1".to_string())
            }
        );
        invoke.assert_async().await;
        invoke.remove_async().await;

        let _shutdown = server
            .mock("GET", "/2020-01-01/extension/event/next")
            .with_status(200)
            .with_body("{\"eventType\":\"SHUTDOWN\",\"shutdownReason\":\"spindown\",\"deadlineMs\":1}")
            .create_async()
            .await;

        assert_eq!(
            client.next_event().await.unwrap(),
            LifecycleEvent::Shutdown {
                reason: Some("spindown".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_next_event_requires_registration() {
        let mut client = ExtensionsApiClient::new("127.0.0.1:1");
        assert!(matches!(
            client.next_event().await,
            Err(ExtensionError::NextEvent(_))
        ));
    }
}
