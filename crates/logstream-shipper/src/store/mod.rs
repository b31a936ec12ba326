// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Clients for the remote append-only log store.
//!
//! The store organizes events into groups of streams. Appending to a stream
//! requires the continuation token returned by the previous append; a stale
//! token is rejected with the token the store expected instead.

use async_trait::async_trait;
use thiserror::Error;

use crate::logs::event::LogEvent;

pub mod http;
pub mod memory;
pub mod sigv4;

/// A stream as reported by [`LogStoreClient::describe_streams`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    pub name: String,
    pub upload_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The batch was already stored by an earlier append.
    #[error("batch already accepted, expected token {expected_token:?}")]
    DataAlreadyAccepted { expected_token: Option<String> },
    /// The append carried a stale continuation token.
    #[error("invalid continuation token, expected {expected_token:?}")]
    InvalidToken { expected_token: Option<String> },
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("resource already exists: {0}")]
    AlreadyExists(String),
    #[error("service error {status} {code}: {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("request signing failed: {0}")]
    Signing(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Operations the delivery worker needs from the remote store.
///
/// Calls are only ever issued by the single delivery worker, so
/// implementations need not serialize appends themselves.
#[async_trait]
pub trait LogStoreClient: Send + Sync {
    /// Creates the group unless it already exists.
    async fn ensure_group_exists(&self, group: &str) -> Result<(), StoreError>;

    /// Lists streams of `group` whose names start with `prefix`.
    async fn describe_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<StreamDescription>, StoreError>;

    /// Creates the stream. Creating a stream that already exists succeeds.
    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), StoreError>;

    /// Appends `events` and returns the token for the next append.
    async fn append_batch(
        &self,
        group: &str,
        stream: &str,
        token: Option<&str>,
        events: &[LogEvent],
    ) -> Result<Option<String>, StoreError>;
}
