// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log collection and delivery to a remote log stream.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────┐
//!            │ Producer threads │  (tracing events, forwarder lines)
//!            └────────┬─────────┘
//!                     │ append (never blocks)
//!                     v
//!            ┌──────────────────┐
//!            │  Appender facade │  (layout + error rendering)
//!            └────────┬─────────┘
//!                     │ enqueue
//!                     v
//!            ┌──────────────────┐
//!            │   Record queue   │  (bounded FIFO, rejects on overflow)
//!            └────────┬─────────┘
//!                     │ drain_up_to(drain limit)
//!                     v
//!            ┌──────────────────┐
//!            │  Delivery worker │  (sequencer, rotation, idle wait)
//!            └────────┬─────────┘
//!                     │ append_batch(token)
//!                     v
//!            ┌──────────────────┐
//!            │ Remote log store │
//!            └──────────────────┘
//! ```
//!
//! # Components
//!
//! - **[`queue`]**: bounded FIFO shared by producers and the worker
//! - **[`sequencer`]**: continuation token and timestamp high-water mark
//! - **[`stream_name`]**: day-bucketed destination stream names
//! - **[`worker`]**: the single background delivery task
//! - **[`appender`]**: producer-facing facade and worker lifecycle
//! - **[`layer`]**: `tracing` integration feeding the appender

pub mod appender;
pub mod constants;
pub mod error_renderer;
pub mod event;
pub mod layer;
pub mod layout;
pub mod queue;
pub mod record;
pub mod sequencer;
pub mod stream_name;
pub mod worker;
