/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Periodic task annotation.
//!
//! A [`PeriodicTask`] attached to an element marks it as periodically
//! executable. The thread container owning the element executes all such
//! tasks once per cycle, ordered by the data-flow graph: the `incoming` and
//! `outgoing` interface references declared here are what the scheduler
//! traces to derive that order.
//!
//! # Ownership model
//! The annotation is shared (`Arc`) between the runtime graph and the
//! worker's schedule. Everything except the profiling counters is immutable
//! after attach; the counters are atomics written only by the single worker
//! thread that executes the task.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::runtime::{ElementFlags, ElementHandle, GraphView, OutputPort};

// ── CycleTask ─────────────────────────────────────────────────────────────────

/// The executable unit of a periodic task.
///
/// Called once per cycle from the container's worker thread. Implementations
/// use interior mutability for their state; the worker guarantees calls are
/// strictly sequential.
pub trait CycleTask: Send + Sync {
    fn execute(&self);
}

/// Closures are tasks; convenient for tests and small glue modules.
impl<F: Fn() + Send + Sync> CycleTask for F {
    fn execute(&self) {
        self()
    }
}

// ── Classification ────────────────────────────────────────────────────────────

bitflags::bitflags! {
    /// Scratch classification bits assigned during scheduling.
    ///
    /// `SENSE` / `CONTROL` come from the task's own interface flags; the
    /// four reachability bits are filled in by the flooding pass. Rebuilt
    /// from scratch on every reschedule, never carried over.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TaskClassification: u8 {
        const SENSE              = 1 << 0;
        const CONTROL            = 1 << 1;
        /// Some sense interface is reachable downstream of this task.
        const SENSE_DEPENDENCY   = 1 << 2;
        /// This task is reachable downstream of some sense interface.
        const SENSE_DEPENDENT    = 1 << 3;
        /// Some control interface is reachable downstream of this task.
        const CONTROL_DEPENDENCY = 1 << 4;
        /// This task is reachable downstream of some control interface.
        const CONTROL_DEPENDENT  = 1 << 5;
    }
}

// ── PeriodicTask ──────────────────────────────────────────────────────────────

/// Annotation marking an element as periodically executable.
pub struct PeriodicTask {
    /// The executable unit.
    task: Box<dyn CycleTask>,

    /// Interfaces the task reads from (relevant for execution order).
    incoming: Vec<ElementHandle>,

    /// Interfaces the task writes to (relevant for execution order).
    outgoing: Vec<ElementHandle>,

    /// Optional port publishing the last execution duration.
    duration_port: Option<Arc<OutputPort<Duration>>>,

    // Profiling counters. Written by the worker thread only; the first
    // (warm-up) cycle is excluded.
    last_ns: AtomicI64,
    max_ns: AtomicI64,
    total_ns: AtomicI64,
    executions: AtomicU64,
}

impl PeriodicTask {
    /// Task with a single incoming/outgoing interface pair.
    pub fn new(
        incoming: ElementHandle,
        outgoing: ElementHandle,
        task: Box<dyn CycleTask>,
    ) -> Self {
        Self::with_interfaces(vec![incoming], vec![outgoing], task)
    }

    /// Task with arbitrary interface sequences; either may be empty.
    pub fn with_interfaces(
        incoming: Vec<ElementHandle>,
        outgoing: Vec<ElementHandle>,
        task: Box<dyn CycleTask>,
    ) -> Self {
        PeriodicTask {
            task,
            incoming,
            outgoing,
            duration_port: None,
            last_ns: AtomicI64::new(0),
            max_ns: AtomicI64::new(0),
            total_ns: AtomicI64::new(0),
            executions: AtomicU64::new(0),
        }
    }

    /// Attach a port that receives the task's last execution duration each
    /// profiled cycle.
    pub fn with_duration_port(mut self, port: Arc<OutputPort<Duration>>) -> Self {
        self.duration_port = Some(port);
        self
    }

    /// Interfaces the task reads from.
    pub fn incoming(&self) -> &[ElementHandle] {
        &self.incoming
    }

    /// Interfaces the task writes to.
    pub fn outgoing(&self) -> &[ElementHandle] {
        &self.outgoing
    }

    pub(crate) fn duration_port(&self) -> Option<&Arc<OutputPort<Duration>>> {
        self.duration_port.as_ref()
    }

    /// True iff any referenced interface carries sensor data.
    pub fn is_sense_task(&self, view: &GraphView<'_>) -> bool {
        self.references_flag(view, ElementFlags::SENSOR_DATA)
    }

    /// True iff any referenced interface carries controller data.
    pub fn is_control_task(&self, view: &GraphView<'_>) -> bool {
        self.references_flag(view, ElementFlags::CONTROLLER_DATA)
    }

    fn references_flag(&self, view: &GraphView<'_>, flag: ElementFlags) -> bool {
        self.outgoing
            .iter()
            .chain(self.incoming.iter())
            .any(|&h| view.flags(h).contains(flag))
    }

    /// Run the task once.
    pub fn execute(&self) {
        self.task.execute();
    }

    // ── Profiling counters ────────────────────────────────────────────────────

    /// Fold one measured execution into the running totals.
    pub(crate) fn record_execution(&self, duration: Duration) {
        let ns = duration.as_nanos().min(i64::MAX as u128) as i64;
        self.last_ns.store(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn last_duration_ns(&self) -> i64 {
        self.last_ns.load(Ordering::Relaxed)
    }

    pub(crate) fn max_duration_ns(&self) -> i64 {
        self.max_ns.load(Ordering::Relaxed)
    }

    pub(crate) fn total_duration_ns(&self) -> i64 {
        self.total_ns.load(Ordering::Relaxed)
    }

    pub(crate) fn execution_count(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    /// Mean execution duration over all recorded executions, zero before the
    /// first record.
    pub(crate) fn average_duration_ns(&self) -> i64 {
        let count = self.execution_count();
        if count == 0 {
            0
        } else {
            self.total_duration_ns() / count as i64
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
