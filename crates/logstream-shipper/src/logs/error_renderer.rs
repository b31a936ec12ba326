// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rendering of errors attached to log records.
//!
//! The format is picked by name from a closed set:
//!
//! | Name           | Header | Frames | Causes |
//! |----------------|--------|--------|--------|
//! | `none`         | no     | -      | no     |
//! | `first`        | yes    | 1      | no     |
//! | `first+causes` | yes    | 1      | yes    |
//! | `full`         | yes    | all    | no     |
//! | `full+causes`  | yes    | all    | yes    |
//!
//! Output is appended after the formatted message:
//!
//! ```text
//! Error in thread "main": request failed
//!         at app::handler (src/handler.rs:42:9)
//! Caused by: connection reset
//! ```

use std::backtrace::Backtrace;
use std::convert::Infallible;
use std::fmt::Write;
use std::str::FromStr;

use crate::logs::record::{ErrorLink, RecordedError};

const FRAME_INDENT: &str = "        at ";

// Frames from the capture machinery itself. Only leading frames are skipped.
const SKIPPED_FRAME_PREFIXES: &[&str] = &[
    "std::backtrace",
    "backtrace::",
    "tracing::",
    "tracing_core::",
    "tracing_subscriber::",
    "logstream_shipper::logs::error_renderer",
    "logstream_shipper::logs::layer",
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StackTraceFormat {
    #[default]
    None,
    First,
    FirstPlusCauses,
    Full,
    FullPlusCauses,
}

impl StackTraceFormat {
    /// Case-insensitive lookup. Unknown names fall back to [`Self::None`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "first" => Self::First,
            "first+causes" => Self::FirstPlusCauses,
            "full" => Self::Full,
            "full+causes" => Self::FullPlusCauses,
            _ => Self::None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::First => "first",
            Self::FirstPlusCauses => "first+causes",
            Self::Full => "full",
            Self::FullPlusCauses => "full+causes",
        }
    }

    /// Whether stack frames need capturing at all for this format.
    #[must_use]
    pub fn captures_frames(self) -> bool {
        !matches!(self, Self::None)
    }

    fn frame_limit(self) -> usize {
        match self {
            Self::None => 0,
            Self::First | Self::FirstPlusCauses => 1,
            Self::Full | Self::FullPlusCauses => usize::MAX,
        }
    }

    fn includes_causes(self) -> bool {
        matches!(self, Self::FirstPlusCauses | Self::FullPlusCauses)
    }

    pub fn render(self, out: &mut String, thread_name: &str, error: &RecordedError) {
        if self == Self::None {
            return;
        }

        let limit = self.frame_limit();
        let _ = writeln!(
            out,
            "Error in thread \"{thread_name}\": {}",
            error.head.message
        );
        render_frames(out, &error.head, limit);

        if self.includes_causes() {
            for cause in &error.causes {
                let _ = writeln!(out, "Caused by: {}", cause.message);
                render_frames(out, cause, limit);
            }
        }
    }
}

impl FromStr for StackTraceFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

fn render_frames(out: &mut String, link: &ErrorLink, limit: usize) {
    for frame in link.frames.iter().take(limit) {
        out.push_str(FRAME_INDENT);
        out.push_str(frame);
        out.push('\n');
    }
}

/// Captures the calling thread's stack, without the capture machinery's own
/// leading frames.
#[must_use]
pub fn capture_frames() -> Vec<String> {
    frames_from_backtrace(&Backtrace::force_capture())
}

/// Parses the textual form of a [`Backtrace`] into `symbol (location)` frames.
#[must_use]
pub fn frames_from_backtrace(backtrace: &Backtrace) -> Vec<String> {
    parse_frames(&backtrace.to_string())
}

fn parse_frames(text: &str) -> Vec<String> {
    let mut frames: Vec<(String, Option<String>)> = Vec::new();

    for line in text.lines() {
        let line = line.trim_start();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some((_, slot)) = frames.last_mut() {
                if slot.is_none() {
                    *slot = Some(location.to_string());
                }
            }
        } else if let Some((index, symbol)) = line.split_once(": ") {
            if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
                frames.push((symbol.to_string(), None));
            }
        }
    }

    frames
        .into_iter()
        .skip_while(|(symbol, _)| is_capture_frame(symbol))
        .map(|(symbol, location)| match location {
            Some(location) => format!("{symbol} ({location})"),
            None => symbol,
        })
        .collect()
}

fn is_capture_frame(symbol: &str) -> bool {
    let symbol = symbol.trim_start_matches('<');
    // Trait impls such as `<&dyn Error as tracing_core::field::Value>::record`.
    symbol.contains(" as tracing")
        || SKIPPED_FRAME_PREFIXES
            .iter()
            .any(|prefix| symbol.starts_with(prefix))
}
