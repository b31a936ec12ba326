// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Limits imposed by the remote log-stream API.
//!
//! # API Constraints
//!
//! A single append call accepts:
//! - at most [`MAX_BATCH_EVENTS`] events,
//! - at most [`MAX_BATCH_SIZE_BYTES`] of payload.
//!
//! Only the count limit is enforced in-process. The byte limit is documented
//! here so that callers sizing the queue know when the service will reject a
//! batch outright.

/// Maximum number of events accepted by one append call.
pub const MAX_BATCH_EVENTS: usize = 10_000;

/// Maximum payload size accepted by one append call.
///
/// Each event counts its UTF-8 message length plus 26 bytes of overhead.
/// Not enforced by the delivery worker.
pub const MAX_BATCH_SIZE_BYTES: usize = 1_048_576;

/// Default number of events the record queue holds before rejecting.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
