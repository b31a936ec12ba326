// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Day-bucketed destination stream names.
//!
//! A stream name looks like `2024-03-07/prod i-0abc123`: the UTC day, then
//! the configured prefix and the instance id separated by a space. With an
//! empty prefix the separator is dropped (`2024-03-07/i-0abc123`).

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

/// Source of wall-clock time for rotation decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[must_use]
pub fn stream_name(now: DateTime<Utc>, prefix: &str, instance_id: &str) -> String {
    let day = now.format("%Y-%m-%d");
    let suffix = [prefix, instance_id]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    format!("{day}/{suffix}")
}

/// Binds the prefix and instance id so the worker only supplies the time.
#[derive(Debug, Clone)]
pub struct StreamNamer {
    prefix: String,
    instance_id: String,
}

impl StreamNamer {
    #[must_use]
    pub fn new(prefix: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            instance_id: instance_id.into(),
        }
    }

    #[must_use]
    pub fn name_at(&self, now: DateTime<Utc>) -> String {
        stream_name(now, &self.prefix, &self.instance_id)
    }
}
