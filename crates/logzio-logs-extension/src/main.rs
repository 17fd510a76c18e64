// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use logzio_logs::{
    config::Config,
    engine::Engine,
    error::{ConfigError, ExtensionError},
    extension::{
        client::ExtensionsApiClient,
        subscription::{subscribe, SubscriptionRequest},
    },
    listener::{LogsListener, BIND_GRACE_PERIOD},
    logger,
    logs::queue::pending_queue,
};

const DEFAULT_EXTENSION_NAME: &str = "logzio-logs-extension";
const LISTENER_HOST: [u8; 4] = [0, 0, 0, 0];

#[tokio::main]
pub async fn main() -> ExitCode {
    if let Err(e) = logger::init(Config::log_level_from_env()) {
        eprintln!("Failed to initialize logging: {e}");
    }
    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error creating config on extension startup: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("Extension shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let now = Instant::now();
    let runtime_api = config
        .runtime_api
        .clone()
        .ok_or(ConfigError::MissingVariable("AWS_LAMBDA_RUNTIME_API"))?;

    // Lambda only accepts the extension's own file name.
    let name = env::args()
        .next()
        .as_deref()
        .and_then(|path| Path::new(path).file_name())
        .and_then(|name| name.to_str())
        .map_or_else(|| DEFAULT_EXTENSION_NAME.to_string(), str::to_string);

    let mut lifecycle = ExtensionsApiClient::new(&runtime_api);
    let extension_id = lifecycle.register(&name).await?;

    let (handle, queue) = pending_queue();
    let cancel = CancellationToken::new();
    let listener = LogsListener::bind(
        SocketAddr::from((LISTENER_HOST, config.receiver_port)),
        BIND_GRACE_PERIOD,
        handle.clone(),
        cancel.clone(),
    )
    .await?;
    let listener_task = tokio::spawn(listener.serve());

    let subscribed = subscribe(&runtime_api, &extension_id, &SubscriptionRequest::new(&config)).await;
    if let Err(e) = subscribed {
        cancel.cancel();
        return Err(e.into());
    }

    debug!(
        "Time taken to start the extension: {} ms",
        now.elapsed().as_millis()
    );

    let mut engine = Engine::from_config(&config, queue, handle);
    let result: Result<(), ExtensionError> = engine.run(&mut lifecycle).await;

    cancel.cancel();
    if let Err(e) = listener_task.await {
        error!("Ingestion listener task failed: {e}");
    }
    result.map_err(Into::into)
}
