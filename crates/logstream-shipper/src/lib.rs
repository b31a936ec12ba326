// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous shipping of application logs to an append-only, remote
//! log-stream service.
//!
//! Producer threads hand formatted records to a bounded [`logs::queue::RecordQueue`].
//! A single [`logs::worker::DeliveryWorker`] task drains the queue in batches,
//! repairs timestamp ordering, appends the batches through a
//! [`store::LogStoreClient`] and rotates the destination stream once per day.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use logstream_shipper::config::Config;
//! use logstream_shipper::logs::appender::Appender;
//! use logstream_shipper::store::http::HttpLogStoreClient;
//! use tracing_subscriber::prelude::*;
//!
//! let config = Config::from_env()?;
//! let client = Arc::new(HttpLogStoreClient::new(&config)?);
//! let appender = Appender::builder(&config, client).start()?;
//!
//! tracing_subscriber::registry().with(appender.layer()).init();
//! tracing::info!(target: "app", "hello");
//!
//! appender.shutdown().await;
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod logger;
pub mod logs;
pub mod proc;
pub mod store;
