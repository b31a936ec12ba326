// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The single background task that delivers queued events.
//!
//! # Cycle
//!
//! ```text
//!   ┌────────────┐   drain/order/append    ┌────────────┐
//!   │   flush    │ ──────────────────────> │   store    │
//!   └─────┬──────┘   (repeat while full)   └────────────┘
//!         v
//!   ┌────────────┐
//!   │   rotate   │  (new day -> new stream)
//!   └─────┬──────┘
//!         v
//!   ┌────────────┐
//!   │ idle wait  │  (flush period, wake, or cancellation)
//!   └────────────┘
//! ```
//!
//! The worker owns the [`Sequencer`] and the active stream name outright, so
//! no other task can append or rotate while it runs. [`DeliveryWorker::run`]
//! hands the worker back when it stops, which is how the appender performs
//! the final drain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, InvalidTokenPolicy};
use crate::logs::event::LogEvent;
use crate::logs::queue::RecordQueue;
use crate::logs::sequencer::Sequencer;
use crate::logs::stream_name::{Clock, StreamNamer};
use crate::store::{LogStoreClient, StoreError};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub log_group: String,
    pub drain_limit: usize,
    pub low_water_mark: usize,
    pub flush_period: Duration,
    pub invalid_token_policy: InvalidTokenPolicy,
}

impl WorkerSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            log_group: config.log_group.clone(),
            drain_limit: config.drain_limit.max(1),
            low_water_mark: config.low_water_mark,
            flush_period: config.flush_period,
            invalid_token_policy: config.invalid_token_policy,
        }
    }
}

pub struct DeliveryWorker {
    settings: WorkerSettings,
    queue: Arc<RecordQueue>,
    client: Arc<dyn LogStoreClient>,
    namer: StreamNamer,
    clock: Arc<dyn Clock>,
    sequencer: Sequencer,
    active_stream: Option<String>,
    group_ready: bool,
    cancel: CancellationToken,
    wake: Arc<Notify>,
}

impl DeliveryWorker {
    #[must_use]
    pub fn new(
        settings: WorkerSettings,
        queue: Arc<RecordQueue>,
        client: Arc<dyn LogStoreClient>,
        namer: StreamNamer,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            settings,
            queue,
            client,
            namer,
            clock,
            sequencer: Sequencer::new(),
            active_stream: None,
            group_ready: false,
            cancel,
            wake,
        }
    }

    /// Runs delivery cycles until cancelled, then returns the worker so the
    /// caller can drain what is left.
    pub async fn run(mut self) -> Self {
        debug!("LOGSTREAM | Delivery worker started");
        self.rotate().await;

        while !self.cancel.is_cancelled() {
            let delivered = self.flush().await;
            self.rotate().await;
            self.idle_wait(delivered).await;
        }

        debug!("LOGSTREAM | Delivery worker stopped");
        self
    }

    /// Drains and appends batches until a drain comes back short of the
    /// limit. Returns the number of events the store accepted.
    ///
    /// Nothing is drained while no stream is active.
    pub async fn flush(&mut self) -> usize {
        let Some(stream) = self.active_stream.clone() else {
            debug!(
                "LOGSTREAM | No active stream, keeping {} events queued",
                self.queue.len()
            );
            return 0;
        };

        let mut delivered = 0;
        loop {
            let mut batch = self.queue.drain_up_to(self.settings.drain_limit);
            if batch.is_empty() {
                break;
            }
            let full = batch.len() >= self.settings.drain_limit;

            self.sequencer.order_and_repair(&mut batch);
            if self.submit(&stream, &batch).await {
                delivered += batch.len();
            }

            if !full {
                break;
            }
        }
        delivered
    }

    /// Appends one ordered batch, reconciling the continuation token on
    /// conflicts. Returns whether the store holds the batch.
    async fn submit(&mut self, stream: &str, batch: &[LogEvent]) -> bool {
        let mut resubmitted = false;
        loop {
            let result = self
                .client
                .append_batch(
                    &self.settings.log_group,
                    stream,
                    self.sequencer.current_token(),
                    batch,
                )
                .await;

            match result {
                Ok(next) => {
                    self.sequencer.set_token(next);
                    return true;
                }
                Err(StoreError::DataAlreadyAccepted { expected_token }) => {
                    debug!(
                        "LOGSTREAM | Batch of {} events was already accepted by {stream}",
                        batch.len()
                    );
                    self.sequencer.set_token(expected_token);
                    return true;
                }
                Err(StoreError::InvalidToken { expected_token }) => {
                    self.sequencer.set_token(expected_token);
                    if self.settings.invalid_token_policy == InvalidTokenPolicy::Resubmit
                        && !resubmitted
                    {
                        debug!("LOGSTREAM | Resubmitting batch with the expected token");
                        resubmitted = true;
                        continue;
                    }
                    warn!(
                        "LOGSTREAM | Dropped {} events: stale continuation token for {stream}",
                        batch.len()
                    );
                    return false;
                }
                Err(e) => {
                    error!(
                        "LOGSTREAM | Failed to append {} events to {stream}: {e}",
                        batch.len()
                    );
                    return false;
                }
            }
        }
    }

    /// Switches to the stream named for the current day if it differs from
    /// the active one. A failure keeps the previous stream active.
    pub async fn rotate(&mut self) -> bool {
        let name = self.namer.name_at(self.clock.now());
        if self.active_stream.as_deref() == Some(name.as_str()) {
            return true;
        }

        match self.open_stream(&name).await {
            Ok(token) => {
                info!("LOGSTREAM | Rotated to log stream {name}");
                self.sequencer.set_token(token);
                self.active_stream = Some(name);
                true
            }
            Err(e) => {
                error!("LOGSTREAM | Failed to rotate to log stream {name}: {e}");
                false
            }
        }
    }

    /// Finds or creates `name` and returns the token to append with.
    async fn open_stream(&mut self, name: &str) -> Result<Option<String>, StoreError> {
        let group = &self.settings.log_group;
        if !self.group_ready {
            self.client.ensure_group_exists(group).await?;
            self.group_ready = true;
        }

        let existing = self
            .client
            .describe_streams(group, name)
            .await?
            .into_iter()
            .find(|stream| stream.name == name);

        match existing {
            Some(stream) => Ok(stream.upload_token),
            None => {
                self.client.create_stream(group, name).await?;
                Ok(None)
            }
        }
    }

    /// Whether the next cycle should start without waiting: batches are
    /// going out and the queue is still at or above the low-water mark.
    fn has_backlog(&self, delivered: usize) -> bool {
        self.active_stream.is_some()
            && delivered > 0
            && self.queue.len() >= self.settings.low_water_mark
    }

    async fn idle_wait(&self, delivered: usize) {
        if self.cancel.is_cancelled() || self.has_backlog(delivered) {
            return;
        }

        tokio::select! {
            () = tokio::time::sleep(self.settings.flush_period) => {}
            () = self.cancel.cancelled() => {}
            () = self.wake.notified() => {}
        }
    }

    /// Delivers everything still queued, including events appended while
    /// draining. Called once the worker has stopped.
    ///
    /// Stops early when a flush cycle delivers nothing, so an unavailable
    /// store cannot hold up shutdown.
    pub async fn final_drain(&mut self) -> usize {
        if self.active_stream.is_none() && !self.rotate().await {
            let lost = self.queue.drain_up_to(self.queue.capacity()).len();
            if lost > 0 {
                error!("LOGSTREAM | No log stream available at shutdown, dropped {lost} events");
            }
            return 0;
        }

        let mut delivered = 0;
        while !self.queue.is_empty() {
            let flushed = self.flush().await;
            if flushed == 0 {
                warn!(
                    "LOGSTREAM | Final flush delivered nothing, {} events left queued",
                    self.queue.len()
                );
                break;
            }
            delivered += flushed;
        }
        delivered
    }

    #[must_use]
    pub fn active_stream(&self) -> Option<&str> {
        self.active_stream.as_deref()
    }

    #[must_use]
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }
}
