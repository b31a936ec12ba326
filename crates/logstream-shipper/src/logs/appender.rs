// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer-facing entry point and delivery worker lifecycle.
//!
//! [`Appender::builder`] spawns the [`DeliveryWorker`] on the current tokio
//! runtime. Producers append through an [`AppenderHandle`], which formats
//! the record on the calling thread and enqueues it without blocking.
//! [`Appender::shutdown`] stops the worker, waits for it up to the configured
//! timeout and delivers whatever is still queued.

use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::logs::error_renderer::StackTraceFormat;
use crate::logs::event::LogEvent;
use crate::logs::layer::ShippingLayer;
use crate::logs::layout::{DefaultLayout, Layout};
use crate::logs::queue::RecordQueue;
use crate::logs::record::Record;
use crate::logs::stream_name::{Clock, StreamNamer, SystemClock};
use crate::logs::worker::{DeliveryWorker, WorkerSettings};
use crate::proc::instance_id::instance_id;
use crate::store::LogStoreClient;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("no tokio runtime available to run the delivery worker")]
    NoRuntime,
}

/// Cheap, cloneable producer side of an [`Appender`].
#[derive(Clone)]
pub struct AppenderHandle {
    queue: Arc<RecordQueue>,
    layout: Arc<dyn Layout>,
    stack_trace: StackTraceFormat,
    wake: Arc<Notify>,
    echo: Option<Arc<Mutex<dyn Write + Send>>>,
}

impl AppenderHandle {
    #[must_use]
    pub fn new(
        queue: Arc<RecordQueue>,
        layout: Arc<dyn Layout>,
        stack_trace: StackTraceFormat,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            queue,
            layout,
            stack_trace,
            wake,
            echo: None,
        }
    }

    /// Copies every formatted record to `writer` as well as queueing it.
    #[must_use]
    pub fn with_echo(mut self, writer: impl Write + Send + 'static) -> Self {
        let writer: Arc<Mutex<dyn Write + Send>> = Arc::new(Mutex::new(writer));
        self.echo = Some(writer);
        self
    }

    /// Formats `record` and queues it for delivery.
    ///
    /// Returns `false` when the record was dropped, either because the queue
    /// is full or because the layout panicked.
    pub fn append(&self, record: &Record) -> bool {
        let formatted = panic::catch_unwind(AssertUnwindSafe(|| self.layout.format(record)));
        let Ok(mut message) = formatted else {
            error!(
                "LOGSTREAM | Layout panicked, dropping record from {}",
                record.target
            );
            return false;
        };

        if let Some(error) = &record.error {
            self.stack_trace
                .render(&mut message, &record.thread_name, error);
        }
        if let Some(echo) = &self.echo {
            let mut echo = echo.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = echo.write_all(message.as_bytes());
        }
        self.queue
            .enqueue(LogEvent::new(record.timestamp_millis, message))
    }

    /// Queues an already formatted event.
    pub fn append_event(&self, event: LogEvent) -> bool {
        self.queue.enqueue(event)
    }

    /// Ends the worker's idle wait early.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    #[must_use]
    pub fn stack_trace(&self) -> StackTraceFormat {
        self.stack_trace
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<RecordQueue> {
        &self.queue
    }
}

pub struct AppenderBuilder<'a> {
    config: &'a Config,
    client: Arc<dyn LogStoreClient>,
    layout: Arc<dyn Layout>,
    clock: Arc<dyn Clock>,
    instance_id: Option<String>,
}

impl AppenderBuilder<'_> {
    #[must_use]
    pub fn layout(mut self, layout: impl Layout + 'static) -> Self {
        self.layout = Arc::new(layout);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Overrides the process-wide instance id in stream names.
    #[must_use]
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Spawns the delivery worker on the current tokio runtime.
    pub fn start(self) -> Result<Appender, StartError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StartError::NoRuntime)?;

        let queue = Arc::new(RecordQueue::new(self.config.queue_capacity));
        let wake = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let instance_id = self
            .instance_id
            .unwrap_or_else(|| instance_id().to_string());

        let worker = DeliveryWorker::new(
            WorkerSettings::from_config(self.config),
            Arc::clone(&queue),
            self.client,
            StreamNamer::new(self.config.stream_prefix.clone(), instance_id),
            self.clock,
            cancel.clone(),
            Arc::clone(&wake),
        );
        let worker = runtime.spawn(worker.run());
        debug!(
            "LOGSTREAM | Appender started for log group {}",
            self.config.log_group
        );

        let mut handle = AppenderHandle::new(queue, self.layout, self.config.stack_trace, wake);
        if self.config.echo_stderr {
            handle = handle.with_echo(io::stderr());
        }

        Ok(Appender {
            handle,
            cancel,
            worker: Some(worker),
            shutdown_timeout: self.config.shutdown_timeout,
        })
    }
}

pub struct Appender {
    handle: AppenderHandle,
    cancel: CancellationToken,
    worker: Option<JoinHandle<DeliveryWorker>>,
    shutdown_timeout: Duration,
}

impl Appender {
    #[must_use]
    pub fn builder(config: &Config, client: Arc<dyn LogStoreClient>) -> AppenderBuilder<'_> {
        AppenderBuilder {
            config,
            client,
            layout: Arc::new(DefaultLayout),
            clock: Arc::new(SystemClock),
            instance_id: None,
        }
    }

    #[must_use]
    pub fn handle(&self) -> AppenderHandle {
        self.handle.clone()
    }

    /// A `tracing` layer that ships application events through this appender.
    #[must_use]
    pub fn layer(&self) -> ShippingLayer {
        ShippingLayer::new(self.handle())
    }

    pub fn append(&self, record: &Record) -> bool {
        self.handle.append(record)
    }

    pub fn wake(&self) {
        self.handle.wake();
    }

    /// Stops the worker and delivers the events still queued.
    ///
    /// If the worker does not stop within the shutdown timeout it is left
    /// running on its own and the remaining events are not drained here.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        self.handle.wake();

        let Some(worker) = self.worker.take() else {
            return;
        };
        match tokio::time::timeout(self.shutdown_timeout, worker).await {
            Ok(Ok(mut worker)) => {
                let delivered = worker.final_drain().await;
                debug!("LOGSTREAM | Delivered {delivered} events during shutdown");
            }
            Ok(Err(e)) => {
                error!(
                    "LOGSTREAM | Delivery worker failed, {} events undelivered: {e}",
                    self.handle.queue.len()
                );
            }
            Err(_) => {
                warn!(
                    "LOGSTREAM | Delivery worker did not stop within {:?}, {} events left queued",
                    self.shutdown_timeout,
                    self.handle.queue.len()
                );
            }
        }
    }
}

impl Drop for Appender {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::logs::record::RecordedError;
    use crate::store::memory::InMemoryLogStore;
    use tracing::Level;

    fn handle_with(layout: Arc<dyn Layout>, stack_trace: StackTraceFormat) -> AppenderHandle {
        AppenderHandle::new(
            Arc::new(RecordQueue::new(10)),
            layout,
            stack_trace,
            Arc::new(Notify::new()),
        )
    }

    #[test]
    fn test_append_formats_with_layout() {
        let handle = handle_with(
            Arc::new(|record: &Record| format!("{} {}", record.level, record.message)),
            StackTraceFormat::None,
        );

        let record = Record::new(Level::INFO, "app", "ready").with_timestamp(42);
        assert!(handle.append(&record));

        let events = handle.queue().drain_up_to(10);
        assert_eq!(events, vec![LogEvent::new(42, "INFO ready")]);
    }

    #[test]
    fn test_append_renders_attached_error() {
        let handle = handle_with(
            Arc::new(|record: &Record| format!("{}\n", record.message)),
            StackTraceFormat::First,
        );
        let error = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let mut record = Record::new(Level::ERROR, "app", "write failed")
            .with_error(RecordedError::from_error(&error, vec!["app::write".to_string()]));
        record.thread_name = "main".to_string();

        handle.append(&record);

        let events = handle.queue().drain_up_to(1);
        assert_eq!(
            events[0].message,
            "write failed\nError in thread \"main\": disk full\n        at app::write\n"
        );
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_echo_copies_formatted_records() {
        let buffer = SharedBuffer::default();
        let handle = handle_with(
            Arc::new(|record: &Record| format!("{}\n", record.message)),
            StackTraceFormat::None,
        )
        .with_echo(buffer.clone());

        handle.append(&Record::new(Level::INFO, "app", "first"));
        handle.append(&Record::new(Level::INFO, "app", "second"));

        assert_eq!(
            String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap(),
            "first\nsecond\n"
        );
        assert_eq!(handle.queue().len(), 2);
    }

    #[test]
    fn test_panicking_layout_drops_record() {
        let handle = handle_with(
            Arc::new(|record: &Record| -> String {
                if record.message == "bad" {
                    panic!("layout failure");
                }
                record.message.clone()
            }),
            StackTraceFormat::None,
        );

        assert!(!handle.append(&Record::new(Level::INFO, "app", "bad")));
        assert!(handle.append(&Record::new(Level::INFO, "app", "good")));

        let messages: Vec<String> = handle
            .queue()
            .drain_up_to(10)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["good".to_string()]);
    }

    #[test]
    fn test_start_requires_runtime() {
        let config = Config::default();
        let result = Appender::builder(&config, Arc::new(InMemoryLogStore::new())).start();
        assert!(matches!(result, Err(StartError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_shutdown_delivers_queued_records() {
        let store = Arc::new(InMemoryLogStore::new());
        let config = Config {
            log_group: "app".to_string(),
            ..Config::default()
        };
        let appender = Appender::builder(&config, Arc::clone(&store) as Arc<dyn LogStoreClient>)
            .instance_id("host-1")
            .layout(|record: &Record| record.message.clone())
            .start()
            .unwrap();

        for i in 0..5 {
            assert!(appender.append(&Record::new(Level::INFO, "app", format!("m{i}"))));
        }
        appender.shutdown().await;

        let stream = store.stream_names("app").pop().unwrap();
        assert!(stream.ends_with("/host-1"));
        let messages: Vec<String> = store
            .events("app", &stream)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["m0", "m1", "m2", "m3", "m4"]);
    }
}
