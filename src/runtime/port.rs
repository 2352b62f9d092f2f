/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Typed output ports.
//!
//! An [`OutputPort`] is the publish sink the scheduler core writes cycle
//! durations and profile vectors to. It is bound to a port element in the
//! runtime graph and latches the most recently published value; hosts and
//! tests read it back with [`OutputPort::get`]. There is no subscriber
//! machinery here - transport of published values is the host's concern.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::element::{ElementFlags, ElementHandle};
use super::Runtime;

/// Publish-only port latching the latest value.
pub struct OutputPort<T> {
    element: ElementHandle,
    value: Mutex<Option<T>>,
    publish_count: AtomicU64,
}

impl<T: Clone + Send> OutputPort<T> {
    /// Create a port element under `parent` and bind a publisher to it.
    ///
    /// The element carries `OUTPUT_PORT | EMITS_DATA | READY` plus any
    /// `extra_flags` (e.g. `SENSOR_DATA` on sensor-side ports).
    pub fn create(
        runtime: &Runtime,
        parent: ElementHandle,
        name: impl Into<String>,
        extra_flags: ElementFlags,
    ) -> Arc<OutputPort<T>> {
        let flags =
            ElementFlags::OUTPUT_PORT | ElementFlags::EMITS_DATA | ElementFlags::READY | extra_flags;
        let element = runtime.create_port(parent, name, flags);
        Arc::new(OutputPort {
            element,
            value: Mutex::new(None),
            publish_count: AtomicU64::new(0),
        })
    }

    /// Publish a value, replacing the previously latched one.
    pub fn publish(&self, value: T) {
        *self.value.lock() = Some(value);
        self.publish_count.fetch_add(1, Ordering::Release);
    }

    /// Latest published value, if any.
    pub fn get(&self) -> Option<T> {
        self.value.lock().clone()
    }

    /// Number of publications so far.
    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Acquire)
    }

    /// Port element in the runtime graph.
    pub fn element(&self) -> ElementHandle {
        self.element
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
