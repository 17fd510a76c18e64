// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP endpoint the Lambda Logs API pushes record batches to.
//!
//! Every POST body is one JSON array of records and becomes one batch on
//! the pending queue. The listener only decodes and queues; all shipping
//! happens in the engine.
//!
//! # Responses
//!
//! | request | status |
//! |---|---|
//! | POST with a JSON array of records | `200`, batch queued |
//! | POST with anything else | `400` |
//! | POST larger than [`MAX_DELIVERY_BYTES`] | `413` |
//! | any other method | `405` |

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::ExtensionError;
use crate::logs::queue::QueueHandle;
use crate::logs::record::decode_batch;

/// How long startup may keep retrying the bind before giving up.
pub const BIND_GRACE_PERIOD: Duration = Duration::from_secs(9);
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Largest delivery body accepted, four times the buffering `maxBytes`
/// requested from the Logs API.
pub const MAX_DELIVERY_BYTES: usize = 4 * 262_144;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct LogsListener {
    listener: TcpListener,
    queue: QueueHandle,
    cancel: CancellationToken,
}

impl LogsListener {
    /// Binds `addr`, retrying until `grace` has elapsed.
    pub async fn bind(
        addr: SocketAddr,
        grace: Duration,
        queue: QueueHandle,
        cancel: CancellationToken,
    ) -> Result<Self, ExtensionError> {
        let start = Instant::now();
        loop {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    debug!(
                        "LOGS | Ingestion listener bound to {} in {} ms",
                        addr,
                        start.elapsed().as_millis()
                    );
                    return Ok(LogsListener {
                        listener,
                        queue,
                        cancel,
                    });
                }
                Err(e) if start.elapsed() + BIND_RETRY_INTERVAL < grace => {
                    debug!("LOGS | Failed to bind {addr}, retrying: {e}");
                    tokio::time::sleep(BIND_RETRY_INTERVAL).await;
                }
                Err(e) => {
                    return Err(ExtensionError::ListenerBind {
                        addr: addr.to_string(),
                        grace_secs: grace.as_secs(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the cancellation token fires.
    pub async fn serve(self) {
        let LogsListener {
            listener,
            queue,
            cancel,
        } = self;
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = JoinSet::new();

        loop {
            let conn = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("LOGS | Ingestion listener shutting down");
                    break;
                }
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("LOGS | Ingestion listener error: {e}");
                        break;
                    }
                    Ok((conn, _)) => conn,
                },
                Some(finished) = joinset.join_next() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!("LOGS | Connection handler panicked: {:?}", e);
                        }
                    }
                    continue;
                }
            };

            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let queue = queue.clone();
            joinset.spawn(async move {
                let service = service_fn(move |req| handle(req, queue.clone()));
                if let Err(e) = server.serve_connection(conn, service).await {
                    debug!("LOGS | Connection error: {e}");
                }
            });
        }
    }
}

async fn handle<B>(req: Request<B>, queue: QueueHandle) -> Result<Response<Full<Bytes>>, BoxError>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    if req.method() != Method::POST {
        return Ok(response(StatusCode::METHOD_NOT_ALLOWED, "Only POST is supported"));
    }

    let body = match Limited::new(req.into_body(), MAX_DELIVERY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!("LOGS | Rejecting delivery larger than {MAX_DELIVERY_BYTES} bytes");
            return Ok(response(StatusCode::PAYLOAD_TOO_LARGE, "Log batch too large"));
        }
        Err(e) => return Err(e),
    };
    match decode_batch(&body) {
        Ok(batch) => {
            debug!("LOGS | Received batch of {} records", batch.len());
            queue.push(batch);
            Ok(response(StatusCode::OK, ""))
        }
        Err(e) => {
            warn!("LOGS | Could not decode log batch: {e}");
            Ok(response(StatusCode::BAD_REQUEST, "Invalid log batch"))
        }
    }
}

fn response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::queue::pending_queue;
    use crate::logs::record::Payload;
    use serde_json::json;

    async fn start() -> (SocketAddr, crate::logs::queue::PendingQueue, CancellationToken) {
        let (handle, queue) = pending_queue();
        let cancel = CancellationToken::new();
        let listener = LogsListener::bind(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            BIND_GRACE_PERIOD,
            handle,
            cancel.clone(),
        )
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(listener.serve());
        (addr, queue, cancel)
    }

    #[tokio::test]
    async fn test_post_batch_is_queued() {
        let (addr, mut queue, cancel) = start().await;
        let body = json!([
            {"time": "2021-11-11T08:28:16.870Z", "type": "function", "record": "hello\n"},
            {"time": "2021-11-11T08:28:16.871Z", "type": "platform", "record": {"requestId": "abc"}}
        ]);

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/"))
            .json(&body)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        let batches = queue.drain();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0][0].payload, Some(Payload::Text("hello\n".to_string())));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_invalid_body_is_rejected() {
        let (addr, mut queue, cancel) = start().await;

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/"))
            .body("not a batch")
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 400);
        assert!(queue.drain().is_empty());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let (handle_queue, mut queue) = pending_queue();
        let record = json!({"time": "2021-11-11T08:28:16.870Z", "type": "function", "record": "x".repeat(1_000)});
        let body = serde_json::to_vec(&vec![record; 1_100]).unwrap();
        assert!(body.len() > MAX_DELIVERY_BYTES);
        let req = Request::post("/").body(Full::new(Bytes::from(body))).unwrap();

        let resp = handle(req, handle_queue).await.unwrap();

        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(queue.drain().is_empty());
    }

    #[tokio::test]
    async fn test_body_at_limit_is_accepted() {
        let (handle_queue, mut queue) = pending_queue();
        let record = json!({"time": "2021-11-11T08:28:16.870Z", "type": "function", "record": "x".repeat(1_000)});
        let body = serde_json::to_vec(&vec![record; 900]).unwrap();
        assert!(body.len() <= MAX_DELIVERY_BYTES);
        let req = Request::post("/").body(Full::new(Bytes::from(body))).unwrap();

        let resp = handle(req, handle_queue).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(queue.drain()[0].len(), 900);
    }

    #[tokio::test]
    async fn test_get_not_allowed() {
        let (addr, _queue, cancel) = start().await;

        let resp = reqwest::get(format!("http://{addr}/")).await.unwrap();

        assert_eq!(resp.status(), 405);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_bind_gives_up_after_grace() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let (handle, _queue) = pending_queue();

        let result = LogsListener::bind(
            addr,
            Duration::from_millis(300),
            handle,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(ExtensionError::ListenerBind { .. })));
    }
}
