// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` integration.
//!
//! [`ShippingLayer`] turns every event it sees into a [`Record`] and appends
//! it through an [`AppenderHandle`]. Events emitted by this crate and by the
//! HTTP stack it uses are skipped, so the shipper's own diagnostics stay
//! local and cannot feed back into the queue.

use std::error::Error;
use std::fmt;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::logs::appender::AppenderHandle;
use crate::logs::error_renderer::capture_frames;
use crate::logs::record::{Record, RecordedError};

const INTERNAL_TARGETS: &[&str] = &[
    "logstream_shipper",
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
];

fn is_internal(target: &str) -> bool {
    INTERNAL_TARGETS.iter().any(|internal| {
        target
            .strip_prefix(internal)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

#[derive(Clone)]
pub struct ShippingLayer {
    handle: AppenderHandle,
}

impl ShippingLayer {
    #[must_use]
    pub fn new(handle: AppenderHandle) -> Self {
        Self { handle }
    }
}

impl<S: Subscriber> Layer<S> for ShippingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_internal(metadata.target()) {
            return;
        }

        let mut visitor = RecordVisitor::new(self.handle.stack_trace().captures_frames());
        event.record(&mut visitor);

        let mut record = Record::new(*metadata.level(), metadata.target(), visitor.message);
        record.fields = visitor.fields;
        record.error = visitor.error;
        self.handle.append(&record);
    }
}

struct RecordVisitor {
    message: String,
    fields: Vec<(String, String)>,
    error: Option<RecordedError>,
    capture_frames: bool,
}

impl RecordVisitor {
    fn new(capture_frames: bool) -> Self {
        Self {
            message: String::new(),
            fields: Vec::new(),
            error: None,
            capture_frames,
        }
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        if self.error.is_none() {
            let frames = if self.capture_frames {
                capture_frames()
            } else {
                Vec::new()
            };
            self.error = Some(RecordedError::from_error(value, frames));
        }
        self.fields
            .push((field.name().to_string(), value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }
}
