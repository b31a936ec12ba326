// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process log store with the same token contract as the remote service.
//!
//! Used by tests and for running the pipeline without network access. Every
//! call is recorded so that tests can assert on the exact interaction.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::logs::event::LogEvent;
use crate::store::{LogStoreClient, StoreError, StreamDescription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    EnsureGroup(String),
    DescribeStreams {
        group: String,
        prefix: String,
    },
    CreateStream {
        group: String,
        stream: String,
    },
    AppendBatch {
        group: String,
        stream: String,
        token: Option<String>,
        events: Vec<LogEvent>,
    },
}

#[derive(Debug, Default)]
struct StreamState {
    events: Vec<LogEvent>,
    next_token: Option<String>,
    /// Token and contents of the last accepted batch, to recognize resends.
    last_accepted: Option<(Option<String>, Vec<LogEvent>)>,
}

#[derive(Debug, Default)]
struct State {
    groups: BTreeSet<String>,
    streams: BTreeMap<(String, String), StreamState>,
    calls: Vec<StoreCall>,
    append_failures: VecDeque<StoreError>,
    describe_failures: VecDeque<StoreError>,
    issued_tokens: u64,
}

impl State {
    fn issue_token(&mut self) -> String {
        self.issued_tokens += 1;
        format!("token-{}", self.issued_tokens)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    state: Mutex<State>,
}

impl InMemoryLogStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `stream` (and its group) ahead of time with the given token.
    pub fn insert_stream(&self, group: &str, stream: &str, token: Option<&str>) {
        let mut state = self.lock();
        state.groups.insert(group.to_string());
        state.streams.insert(
            (group.to_string(), stream.to_string()),
            StreamState {
                next_token: token.map(str::to_string),
                ..StreamState::default()
            },
        );
    }

    /// Replaces the expected token of a stream, as another writer would.
    pub fn set_stream_token(&self, group: &str, stream: &str, token: Option<&str>) {
        let mut state = self.lock();
        if let Some(stream) = state
            .streams
            .get_mut(&(group.to_string(), stream.to_string()))
        {
            stream.next_token = token.map(str::to_string);
        }
    }

    /// Makes the next append fail with `error` before any token check.
    pub fn fail_next_append(&self, error: StoreError) {
        self.lock().append_failures.push_back(error);
    }

    /// Makes the next describe fail with `error`, failing that rotation.
    pub fn fail_next_describe(&self, error: StoreError) {
        self.lock().describe_failures.push_back(error);
    }

    #[must_use]
    pub fn events(&self, group: &str, stream: &str) -> Vec<LogEvent> {
        self.lock()
            .streams
            .get(&(group.to_string(), stream.to_string()))
            .map(|stream| stream.events.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn stream_names(&self, group: &str) -> Vec<String> {
        self.lock()
            .streams
            .keys()
            .filter(|(g, _)| g == group)
            .map(|(_, stream)| stream.clone())
            .collect()
    }

    #[must_use]
    pub fn stream_token(&self, group: &str, stream: &str) -> Option<String> {
        self.lock()
            .streams
            .get(&(group.to_string(), stream.to_string()))
            .and_then(|stream| stream.next_token.clone())
    }

    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Append calls issued so far, whatever their outcome.
    #[must_use]
    pub fn append_calls(&self) -> Vec<StoreCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, StoreCall::AppendBatch { .. }))
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LogStoreClient for InMemoryLogStore {
    async fn ensure_group_exists(&self, group: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::EnsureGroup(group.to_string()));
        state.groups.insert(group.to_string());
        Ok(())
    }

    async fn describe_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<StreamDescription>, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::DescribeStreams {
            group: group.to_string(),
            prefix: prefix.to_string(),
        });
        if let Some(error) = state.describe_failures.pop_front() {
            return Err(error);
        }
        if !state.groups.contains(group) {
            return Err(StoreError::NotFound(format!("log group {group}")));
        }

        Ok(state
            .streams
            .iter()
            .filter(|((g, name), _)| g == group && name.starts_with(prefix))
            .map(|((_, name), stream)| StreamDescription {
                name: name.clone(),
                upload_token: stream.next_token.clone(),
            })
            .collect())
    }

    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::CreateStream {
            group: group.to_string(),
            stream: stream.to_string(),
        });
        if !state.groups.contains(group) {
            return Err(StoreError::NotFound(format!("log group {group}")));
        }
        state
            .streams
            .entry((group.to_string(), stream.to_string()))
            .or_default();
        Ok(())
    }

    async fn append_batch(
        &self,
        group: &str,
        stream: &str,
        token: Option<&str>,
        events: &[LogEvent],
    ) -> Result<Option<String>, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::AppendBatch {
            group: group.to_string(),
            stream: stream.to_string(),
            token: token.map(str::to_string),
            events: events.to_vec(),
        });
        if let Some(error) = state.append_failures.pop_front() {
            return Err(error);
        }

        if events
            .windows(2)
            .any(|pair| pair[0].timestamp_millis > pair[1].timestamp_millis)
        {
            return Err(StoreError::Service {
                status: 400,
                code: "InvalidParameterException".to_string(),
                message: "log events in a single batch must be in chronological order"
                    .to_string(),
            });
        }

        let next = state.issue_token();
        let Some(target) = state
            .streams
            .get_mut(&(group.to_string(), stream.to_string()))
        else {
            return Err(StoreError::NotFound(format!("log stream {stream}")));
        };

        if token != target.next_token.as_deref() {
            let expected_token = target.next_token.clone();
            let resend = target
                .last_accepted
                .as_ref()
                .is_some_and(|(used, batch)| used.as_deref() == token && batch == events);
            return Err(if resend {
                StoreError::DataAlreadyAccepted { expected_token }
            } else {
                StoreError::InvalidToken { expected_token }
            });
        }

        target.events.extend_from_slice(events);
        target.last_accepted = Some((token.map(str::to_string), events.to_vec()));
        target.next_token = Some(next);
        Ok(target.next_token.clone())
    }
}
