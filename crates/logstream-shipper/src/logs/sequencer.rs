// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sequencing state for the active log stream.
//!
//! The remote store accepts an append only when it carries the token returned
//! by the previous append, and only when the batch is ordered by timestamp.
//! The [`Sequencer`] keeps the token and the timestamp high-water mark, and
//! is owned by the delivery worker alone.

use crate::logs::event::LogEvent;

#[derive(Debug, Default, Clone)]
pub struct Sequencer {
    continuation_token: Option<String>,
    /// Timestamp of the last event handed to the remote store. `None` until
    /// the first non-empty batch.
    high_water_mark: Option<i64>,
}

impl Sequencer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts `batch` by timestamp and clamps stale leading events to the
    /// high-water mark.
    ///
    /// The sort is stable, so events sharing a timestamp keep their queue
    /// order. After sorting, only a prefix can be older than the mark, so
    /// clamping stops at the first event that is not. The mark then moves to
    /// the batch's last timestamp whether or not the append later succeeds.
    pub fn order_and_repair(&mut self, batch: &mut [LogEvent]) {
        batch.sort_by_key(|event| event.timestamp_millis);

        if let Some(mark) = self.high_water_mark {
            for event in batch.iter_mut() {
                if event.timestamp_millis >= mark {
                    break;
                }
                event.timestamp_millis = mark;
            }
        }

        if let Some(last) = batch.last() {
            self.high_water_mark = Some(last.timestamp_millis);
        }
    }

    #[must_use]
    pub fn current_token(&self) -> Option<&str> {
        self.continuation_token.as_deref()
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.continuation_token = token;
    }

    #[must_use]
    pub fn high_water_mark(&self) -> Option<i64> {
        self.high_water_mark
    }
}
