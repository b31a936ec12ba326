// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Formatter for the shipper's own diagnostics.
//!
//! Diagnostics are written locally, never shipped, in this format:
//!
//! ```text
//! LOGSTREAM_SHIPPER | LEVEL | [span{fields}: ]message fields
//! ```
//!
//! ```text
//! LOGSTREAM_SHIPPER | WARN | LOGSTREAM | Log queue is full (10000 events), dropping new events
//! LOGSTREAM_SHIPPER | INFO | rotation{group="app"}: LOGSTREAM | Rotated to 2024-03-07/prod host-1
//! ```
//!
//! ```rust,ignore
//! let subscriber = tracing_subscriber::fmt()
//!     .event_format(logstream_shipper::logger::Formatter)
//!     .with_writer(std::io::stderr)
//!     .finish();
//! ```

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "LOGSTREAM_SHIPPER | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_formats_level_spans_and_fields() {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .event_format(Formatter)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("rotation", group = "app");
            let _guard = span.enter();
            tracing::warn!(attempt = 2, "LOGSTREAM | Failed to rotate");
        });

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            output,
            "LOGSTREAM_SHIPPER | WARN | rotation{group=\"app\"}: LOGSTREAM | Failed to rotate attempt=2\n"
        );
    }
}
