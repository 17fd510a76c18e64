// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use logzio_logs::{
    config::Config,
    engine::{CycleReport, Engine},
    listener::{LogsListener, BIND_GRACE_PERIOD},
    logs::queue::{pending_queue, PendingQueue, QueueHandle},
};
use mockito::{Matcher, Server};
use serde_json::json;
use std::net::SocketAddr;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

const TIME: &str = "2021-11-11T08:28:16.870Z";

fn sink_config(url: &str) -> Config {
    Config {
        token: "mock-token".to_string(),
        listener_url: url.to_string(),
        send_timeout: Duration::from_secs(2),
        use_compression: false,
        function_name: Some("my-function".to_string()),
        ..Default::default()
    }
}

async fn start_listener() -> (SocketAddr, QueueHandle, PendingQueue, CancellationToken) {
    let (handle, queue) = pending_queue();
    let cancel = CancellationToken::new();
    let listener = LogsListener::bind(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        BIND_GRACE_PERIOD,
        handle.clone(),
        cancel.clone(),
    )
    .await
    .expect("listener should bind");
    let addr = listener.local_addr().expect("listener has an address");
    tokio::spawn(listener.serve());
    (addr, handle, queue, cancel)
}

async fn deliver(addr: SocketAddr, body: serde_json::Value) {
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/"))
        .json(&body)
        .send()
        .await
        .expect("delivery should succeed");
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn logs_api_delivery_ships_to_sink() {
    let mut sink = Server::new_async().await;
    let mock = sink
        .mock("POST", "/")
        .match_query(Matcher::UrlEncoded("token".into(), "mock-token".into()))
        .match_header("content-type", "application/json")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""message":"first line\\n""#.into()),
            Matcher::Regex(r#""lambda.log.requestId":"req-1""#.into()),
            Matcher::Regex(r#""lambda_function_name":"my-function""#.into()),
        ]))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let config = sink_config(&sink.url());
    let (addr, handle, queue, cancel) = start_listener().await;
    let mut engine = Engine::from_config(&config, queue, handle);

    deliver(
        addr,
        json!([
            {"time": TIME, "type": "function", "record": "first line\n"},
            {"time": TIME, "type": "function", "record": "\n"},
            {"time": TIME, "type": "platform", "record": {"requestId": "req-1"}}
        ]),
    )
    .await;

    let report = engine.run_cycle().await;

    mock.assert_async().await;
    assert_eq!(
        report,
        CycleReport {
            batches: 1,
            clean_batches: 1,
            delivered_bulks: 1,
            dropped_records: 1,
            ..Default::default()
        }
    );
    assert_eq!(engine.run_cycle().await, CycleReport::default());
    cancel.cancel();
}

#[tokio::test]
async fn server_error_bulk_is_retried_next_cycle() {
    let mut sink = Server::new_async().await;
    let failing = sink
        .mock("POST", "/")
        .match_query(Matcher::Any)
        .match_body(Matcher::Regex("record-0".into()))
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let accepted = sink
        .mock("POST", "/")
        .match_query(Matcher::Any)
        .match_body(Matcher::Regex("record-2".into()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    // one line per bulk
    let config = Config {
        max_bulk_size_bytes: 200,
        ..sink_config(&sink.url())
    };
    let (handle, queue) = pending_queue();
    let mut engine = Engine::from_config(&config, queue, handle.clone());
    handle.push(
        ["record-0", "record-2"]
            .iter()
            .map(|m| serde_json::from_value(json!({"time": TIME, "type": "function", "record": m})))
            .collect::<Result<Vec<_>, _>>()
            .expect("valid records"),
    );

    let report = engine.run_cycle().await;

    failing.assert_async().await;
    accepted.assert_async().await;
    assert_eq!(report.batches, 1);
    assert_eq!(report.clean_batches, 0);
    assert_eq!(report.delivered_bulks, 1);
    assert_eq!(report.requeued_bulks, 1);
    assert_eq!(report.requeued_records, 1);

    failing.remove_async().await;
    let retried = sink
        .mock("POST", "/")
        .match_query(Matcher::Any)
        .match_body(Matcher::Regex("record-0".into()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let report = engine.run_cycle().await;

    retried.assert_async().await;
    assert_eq!(report.batches, 1);
    assert_eq!(report.clean_batches, 1);
}

#[tokio::test]
async fn bad_request_is_dropped() {
    let mut sink = Server::new_async().await;
    let mock = sink
        .mock("POST", "/")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body("bad format")
        .expect(1)
        .create_async()
        .await;

    let config = sink_config(&sink.url());
    let (addr, handle, queue, cancel) = start_listener().await;
    let mut engine = Engine::from_config(&config, queue, handle);
    deliver(addr, json!([{"time": TIME, "type": "function", "record": "oops"}])).await;

    let report = engine.run_cycle().await;
    assert_eq!(report.dropped_bulks, 1);
    assert_eq!(report.clean_batches, 0);

    // nothing was requeued, so the sink is not called again
    assert_eq!(engine.run_cycle().await, CycleReport::default());
    mock.assert_async().await;
    cancel.cancel();
}
