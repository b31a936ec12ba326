// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logstream_shipper::{
    config::Config,
    logger::Formatter,
    logs::{appender::Appender, event::LogEvent},
    store::http::HttpLogStoreClient,
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOGSTREAM_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .event_format(Formatter)
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("FORWARDER | Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("FORWARDER | Invalid configuration, shutting down: {e}");
            return;
        }
    };

    let client = match HttpLogStoreClient::new(&config) {
        Ok(client) => client,
        Err(e) => {
            error!("FORWARDER | Unable to create log store client, shutting down: {e}");
            return;
        }
    };

    let appender = match Appender::builder(&config, Arc::new(client)).start() {
        Ok(appender) => appender,
        Err(e) => {
            error!("FORWARDER | Unable to start appender, shutting down: {e}");
            return;
        }
    };
    info!(
        "FORWARDER | Forwarding stdin to log group {} in {}",
        config.log_group, config.region
    );

    let handle = appender.handle();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !line.is_empty() {
                        handle.append_event(LogEvent::now(line));
                    }
                }
                Ok(None) => {
                    debug!("FORWARDER | Reached end of input");
                    break;
                }
                Err(e) => {
                    error!("FORWARDER | Failed to read input: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("FORWARDER | Interrupted, shutting down");
                break;
            }
        }
    }

    appender.shutdown().await;
    debug!("FORWARDER | Stopped");
}
