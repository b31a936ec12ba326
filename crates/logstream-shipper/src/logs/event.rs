// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

/// A single formatted log line waiting to be appended to the remote stream.
///
/// Only the timestamp may change after the event is queued, when the
/// sequencer clamps it to keep a batch monotonic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    #[serde(rename = "timestamp")]
    pub timestamp_millis: i64,
    pub message: String,
}

impl LogEvent {
    #[must_use]
    pub fn new(timestamp_millis: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp_millis,
            message: message.into(),
        }
    }

    /// Creates an event stamped with the current wall-clock time.
    #[must_use]
    pub fn now(message: impl Into<String>) -> Self {
        Self::new(chrono::Utc::now().timestamp_millis(), message)
    }
}
