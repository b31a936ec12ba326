// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::error::Error;

use tracing::Level;

/// One error in a chain, flattened to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLink {
    pub message: String,
    /// Rendered stack frames, innermost first. Empty when none were captured.
    pub frames: Vec<String>,
}

/// An error attached to a record, with its `source()` chain captured eagerly
/// so that the record can outlive the original error value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedError {
    pub head: ErrorLink,
    pub causes: Vec<ErrorLink>,
}

impl RecordedError {
    /// Walks the `source()` chain of `error`. `frames` belongs to the head;
    /// causes carry no frames of their own.
    #[must_use]
    pub fn from_error(error: &(dyn Error + 'static), frames: Vec<String>) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(ErrorLink {
                message: cause.to_string(),
                frames: Vec::new(),
            });
            source = cause.source();
        }

        Self {
            head: ErrorLink {
                message: error.to_string(),
                frames,
            },
            causes,
        }
    }
}

/// A log record as handed to the appender, before layout.
#[derive(Debug, Clone)]
pub struct Record {
    pub timestamp_millis: i64,
    pub level: Level,
    pub target: String,
    pub thread_name: String,
    pub message: String,
    pub fields: Vec<(String, String)>,
    pub error: Option<RecordedError>,
}

impl Record {
    /// Creates a record stamped with the current time and calling thread.
    #[must_use]
    pub fn new(level: Level, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp_millis: chrono::Utc::now().timestamp_millis(),
            level,
            target: target.into(),
            thread_name: current_thread_name(),
            message: message.into(),
            fields: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp_millis: i64) -> Self {
        self.timestamp_millis = timestamp_millis;
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: RecordedError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Name of the calling thread, or its id when unnamed.
#[must_use]
pub fn current_thread_name() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Wrapped {
        message: &'static str,
        source: Option<Box<Wrapped>>,
    }

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.message)
        }
    }

    impl Error for Wrapped {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            self.source.as_deref().map(|s| s as &(dyn Error + 'static))
        }
    }

    #[test]
    fn test_from_error_walks_source_chain() {
        let error = Wrapped {
            message: "request failed",
            source: Some(Box::new(Wrapped {
                message: "connection reset",
                source: Some(Box::new(Wrapped {
                    message: "broken pipe",
                    source: None,
                })),
            })),
        };

        let recorded = RecordedError::from_error(&error, vec!["main".to_string()]);

        assert_eq!(recorded.head.message, "request failed");
        assert_eq!(recorded.head.frames, vec!["main".to_string()]);
        let causes: Vec<&str> = recorded.causes.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(causes, vec!["connection reset", "broken pipe"]);
    }

    #[test]
    fn test_new_uses_current_thread_name() {
        let record = std::thread::Builder::new()
            .name("worker-7".to_string())
            .spawn(|| Record::new(Level::INFO, "app", "hello"))
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(record.thread_name, "worker-7");
        assert_eq!(record.message, "hello");
        assert!(record.fields.is_empty());
    }
}
