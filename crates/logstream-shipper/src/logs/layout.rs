// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::logs::record::Record;

/// Turns a record into the text of one remote log event.
///
/// Implementations run on producer threads and must not block.
pub trait Layout: Send + Sync {
    fn format(&self, record: &Record) -> String;
}

/// `<timestamp> [<thread>] <LEVEL> <target> - <message>[ key=value...]`
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLayout;

impl Layout for DefaultLayout {
    fn format(&self, record: &Record) -> String {
        let timestamp = DateTime::<Utc>::from_timestamp_millis(record.timestamp_millis)
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| record.timestamp_millis.to_string());

        let mut out = format!(
            "{timestamp} [{}] {} {} - {}",
            record.thread_name, record.level, record.target, record.message
        );
        for (key, value) in &record.fields {
            let _ = write!(out, " {key}={value}");
        }
        out.push('\n');
        out
    }
}

impl<F> Layout for F
where
    F: Fn(&Record) -> String + Send + Sync,
{
    fn format(&self, record: &Record) -> String {
        self(record)
    }
}
