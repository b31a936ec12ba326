// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO buffer between producer threads and the delivery worker.
//!
//! # Overflow Policy
//!
//! Unlike an evicting buffer, the record queue never drops what it already
//! holds. When the queue is at capacity a new event is rejected and counted:
//!
//! 1. The first rejection after a period of acceptance logs a "queue full"
//!    warning.
//! 2. Further rejections while still full are silent.
//! 3. The first accepted event after a rejection logs a "recovered" notice.
//!
//! Producers never block and never see an error; [`RecordQueue::enqueue`]
//! only reports acceptance as a `bool`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::logs::event::LogEvent;

#[derive(Debug, Default)]
struct Inner {
    events: VecDeque<LogEvent>,
    /// Whether the last enqueue attempt was rejected.
    full: bool,
}

/// Edge crossed by an enqueue attempt, reported after the lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    None,
    BecameFull,
    Recovered,
}

/// Thread-safe bounded queue of pending log events.
#[derive(Debug)]
pub struct RecordQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    dropped: AtomicU64,
}

impl RecordQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::with_capacity(capacity.min(1_024)),
                full: false,
            }),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends an event unless the queue is at capacity.
    ///
    /// Returns `false` when the event was rejected. Never blocks beyond the
    /// short critical section guarding the buffer.
    pub fn enqueue(&self, event: LogEvent) -> bool {
        let (accepted, transition) = {
            let mut inner = self.lock();
            if inner.events.len() >= self.capacity {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let transition = if inner.full {
                    Transition::None
                } else {
                    inner.full = true;
                    Transition::BecameFull
                };
                (false, transition)
            } else {
                inner.events.push_back(event);
                let transition = if inner.full {
                    inner.full = false;
                    Transition::Recovered
                } else {
                    Transition::None
                };
                (true, transition)
            }
        };

        match transition {
            Transition::BecameFull => warn!(
                "LOGSTREAM | Log queue is full ({} events), dropping new events",
                self.capacity
            ),
            Transition::Recovered => info!(
                "LOGSTREAM | Log queue is accepting events again, {} dropped so far",
                self.dropped()
            ),
            Transition::None => {}
        }
        accepted
    }

    /// Removes up to `max` events from the front of the queue, oldest first.
    pub fn drain_up_to(&self, max: usize) -> Vec<LogEvent> {
        let mut inner = self.lock();
        let count = max.min(inner.events.len());
        inner.events.drain(..count).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of events rejected since the queue was created.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    // A producer that panicked mid-push cannot leave the deque in a broken
    // state, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
