/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Thread container.
//!
//! A [`ThreadContainer`] is an element in the runtime graph whose subtree's
//! periodic tasks share one worker thread. It wires the static parameters
//! (cycle time, realtime request, overrun warning), owns the `"Profiling"`
//! output ports, and exposes the start/pause control surface - both directly
//! and through the [`ExecutionControl`] annotation it attaches to itself.
//!
//! Locking: the lifecycle mutex guards worker creation and teardown only.
//! It is released before the worker thread starts and is never held while
//! the structural lock is taken, except transiently during listener
//! registration inside start/stop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{self, ConfigError, ContainerParams};
use crate::control::{ExecutionControl, StartAndPausable};
use crate::profile::TaskProfile;
use crate::runtime::{ElementFlags, ElementHandle, OutputPort, Runtime};
use crate::scheduler::SchedulingError;
use crate::worker::{CycleState, ThreadWorker, WorkerShared};

/// Transient worker used by [`ThreadContainer::execute_cycle`]. It never
/// enters a run loop and registers no listener; cycle statistics persist
/// across manual cycles so profiling behaves like consecutive live cycles.
struct ManualCycle {
    shared: Arc<WorkerShared>,
    state: CycleState,
}

/// Element owning one periodic worker thread for the tasks in its subtree.
pub struct ThreadContainer {
    runtime: Arc<Runtime>,
    element: ElementHandle,
    name: String,

    /// Cycle period in nanoseconds, shared with a live worker.
    cycle_time_ns: Arc<AtomicU64>,
    realtime: bool,
    warn_on_cycle_time_exceed: bool,

    execution_duration: Arc<OutputPort<Duration>>,
    /// Present iff profiling was enabled when the container was constructed.
    details: Option<Arc<OutputPort<Vec<TaskProfile>>>>,

    /// Lifecycle mutex: worker present iff running.
    worker: Mutex<Option<ThreadWorker>>,
    manual: Mutex<Option<ManualCycle>>,
}

impl ThreadContainer {
    /// Container with default parameters (40 ms cycle, non-realtime,
    /// overrun warning enabled).
    pub fn new(runtime: &Arc<Runtime>, parent: ElementHandle, name: &str) -> Arc<ThreadContainer> {
        Self::with_params(runtime, parent, name, ContainerParams::default())
    }

    /// Container with explicit parameters.
    ///
    /// An out-of-bounds cycle time is clamped to the maximum with a warning;
    /// the parameter loader rejects such values earlier, so this only
    /// triggers on programmatic misuse.
    pub fn with_params(
        runtime: &Arc<Runtime>,
        parent: ElementHandle,
        name: &str,
        mut params: ContainerParams,
    ) -> Arc<ThreadContainer> {
        if params.validate().is_err() {
            warn!(
                container = name,
                requested = ?params.cycle_time,
                max = ?config::MAX_CYCLE_TIME,
                "cycle time out of bounds, clamping"
            );
            params.cycle_time = config::MAX_CYCLE_TIME;
        }

        let element = runtime.create_element(parent, name, ElementFlags::READY);
        let profiling_group = runtime.create_element(element, "Profiling", ElementFlags::READY);
        let execution_duration = OutputPort::create(
            runtime,
            profiling_group,
            "Execution Duration",
            ElementFlags::empty(),
        );
        let details = if config::is_profiling_enabled() {
            Some(OutputPort::create(
                runtime,
                profiling_group,
                "Details",
                ElementFlags::empty(),
            ))
        } else {
            None
        };

        let container = Arc::new(ThreadContainer {
            runtime: Arc::clone(runtime),
            element,
            name: name.to_string(),
            cycle_time_ns: Arc::new(AtomicU64::new(params.cycle_time.as_nanos() as u64)),
            realtime: params.realtime,
            warn_on_cycle_time_exceed: params.warn_on_cycle_time_exceed,
            execution_duration,
            details,
            worker: Mutex::new(None),
            manual: Mutex::new(None),
        });

        let container_dyn: Arc<dyn StartAndPausable> = container.clone();
        let weak: Weak<dyn StartAndPausable> = Arc::downgrade(&container_dyn);
        runtime.add_annotation(element, Arc::new(ExecutionControl::new(element, weak)));

        container
    }

    /// Element of this container in the runtime graph.
    pub fn element(&self) -> ElementHandle {
        self.element
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Port publishing the duration of the last cycle.
    pub fn execution_duration_port(&self) -> &Arc<OutputPort<Duration>> {
        &self.execution_duration
    }

    /// Port publishing per-task profiles; present iff profiling was enabled
    /// at construction.
    pub fn details_port(&self) -> Option<&Arc<OutputPort<Vec<TaskProfile>>>> {
        self.details.as_ref()
    }

    /// Current cycle period.
    pub fn cycle_time(&self) -> Duration {
        Duration::from_nanos(self.cycle_time_ns.load(Ordering::Relaxed))
    }

    /// Change the cycle period. Takes effect at the next cycle boundary of a
    /// live worker.
    pub fn set_cycle_time(&self, period: Duration) -> Result<(), ConfigError> {
        config::validate_cycle_time(period)?;
        self.cycle_time_ns
            .store(period.as_nanos() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Is the worker thread live?
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Start the worker thread. A second start while running is a logged
    /// no-op.
    pub fn start(&self) {
        let mut guard = self.worker.lock();
        if guard.is_some() {
            warn!(container = %self.name, "thread container is already executing");
            return;
        }
        let mut worker = ThreadWorker::new(self.make_shared());
        if self.realtime {
            worker.request_realtime();
        }
        *guard = Some(worker);
        drop(guard);

        // start outside the lifecycle lock
        if let Some(worker) = self.worker.lock().as_mut() {
            worker.start();
        }
        info!(container = %self.name, "execution started");
    }

    /// Stop the worker thread and block until it has exited.
    pub fn pause(&self) {
        let worker = self.worker.lock().take();
        match worker {
            Some(mut worker) => {
                worker.stop();
                worker.join();
                info!(container = %self.name, "execution paused");
            }
            None => {
                debug!(container = %self.name, "pause requested but no worker is live");
            }
        }
    }

    /// Run exactly one cycle on the calling thread. Test facility; only
    /// valid while no worker thread is live.
    pub fn execute_cycle(&self) -> Result<(), SchedulingError> {
        if self.worker.lock().is_some() {
            return Err(SchedulingError::WorkerActive {
                container: self.name.clone(),
            });
        }
        let mut manual = self.manual.lock();
        let cycle = manual.get_or_insert_with(|| ManualCycle {
            shared: self.make_shared(),
            state: CycleState::new(),
        });
        // no listener is registered for manual cycles: rebuild every tick
        cycle.shared.force_reschedule();
        let ManualCycle { shared, state } = cycle;
        shared.main_loop_callback(state);
        Ok(())
    }

    fn make_shared(&self) -> Arc<WorkerShared> {
        WorkerShared::new(
            Arc::clone(&self.runtime),
            self.element,
            format!("ThreadContainer {}", self.name),
            Arc::clone(&self.cycle_time_ns),
            self.warn_on_cycle_time_exceed,
            Arc::clone(&self.execution_duration),
            self.details.clone(),
        )
    }
}

impl StartAndPausable for ThreadContainer {
    fn is_executing(&self) -> bool {
        self.is_running()
    }

    fn start_execution(&self) {
        self.start();
    }

    fn pause_execution(&self) {
        self.pause();
    }
}

impl Drop for ThreadContainer {
    fn drop(&mut self) {
        self.pause();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
