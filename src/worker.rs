/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Worker thread of a thread container.
//!
//! The worker owns the periodic cycle: rebuild the schedule when flagged,
//! arm the watchdog, execute every scheduled task in order, publish timing
//! data, disarm the watchdog, sleep to the next cycle boundary. It also
//! implements the runtime-listener contract - structural changes below the
//! container merely set an atomic flag that the next cycle picks up, so
//! callbacks are cheap and re-entrant with respect to the structural lock.
//!
//! State is split in two: [`WorkerShared`] is reachable from the worker
//! thread, the watchdog thread and the runtime's listener registry;
//! [`CycleState`] (schedule, cycle counters) is owned by the executing
//! thread alone and never locked.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::profile::{TaskClass, TaskProfile};
use crate::runtime::{ElementHandle, OutputPort, Runtime, RuntimeListener, StructureEvent};
use crate::scheduler::{self, Schedule, TaskSet};
use crate::task::PeriodicTask;

/// Watchdog slack granted beyond four cycle periods.
const WATCHDOG_SLACK: Duration = Duration::from_secs(4);

// ── Stop flag ─────────────────────────────────────────────────────────────────

/// Cooperative stop signal with an interruptible sleep.
struct StopFlag {
    state: Mutex<bool>,
    signal: Condvar,
}

impl StopFlag {
    fn new() -> StopFlag {
        StopFlag {
            state: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn request(&self) {
        *self.state.lock() = true;
        self.signal.notify_all();
    }

    fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Sleep until `deadline` or until stop is requested, whichever comes
    /// first. Returns `true` if stop was requested.
    fn sleep_until(&self, deadline: Instant) -> bool {
        let mut guard = self.state.lock();
        while !*guard {
            if self.signal.wait_until(&mut guard, deadline).timed_out() {
                return *guard;
            }
        }
        true
    }
}

// ── Watchdog ──────────────────────────────────────────────────────────────────

/// Deadline cell observed by the watchdog thread.
///
/// The worker arms a deadline at the top of each cycle and disarms it at the
/// end; the monitor thread waits on the cell and raises an alert once a
/// deadline passes while still armed. An expired watchdog deactivates
/// itself: it logs once and stays silent until the next deadline is set.
pub(crate) struct Watchdog {
    state: Mutex<WatchdogState>,
    signal: Condvar,
}

struct WatchdogState {
    deadline: Option<Instant>,
    shutdown: bool,
}

impl Watchdog {
    fn new() -> Watchdog {
        Watchdog {
            state: Mutex::new(WatchdogState {
                deadline: None,
                shutdown: false,
            }),
            signal: Condvar::new(),
        }
    }

    pub(crate) fn set_deadline(&self, deadline: Instant) {
        self.state.lock().deadline = Some(deadline);
        self.signal.notify_all();
    }

    pub(crate) fn deactivate(&self) {
        self.state.lock().deadline = None;
        self.signal.notify_all();
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.signal.notify_all();
    }
}

/// Monitor loop run by the watchdog thread.
fn watchdog_monitor(shared: Arc<WorkerShared>) {
    let mut guard = shared.watchdog.state.lock();
    loop {
        if guard.shutdown {
            return;
        }
        match guard.deadline {
            None => {
                shared.watchdog.signal.wait(&mut guard);
            }
            Some(deadline) => {
                if Instant::now() >= deadline {
                    // deactivate before alerting so one expiry logs once
                    guard.deadline = None;
                    drop(guard);
                    shared.handle_watchdog_alert();
                    guard = shared.watchdog.state.lock();
                } else {
                    let _ = shared.watchdog.signal.wait_until(&mut guard, deadline);
                }
            }
        }
    }
}

// ── CycleState ────────────────────────────────────────────────────────────────

/// Cycle-local state, owned by the thread driving the cycles.
pub(crate) struct CycleState {
    schedule: Schedule,
    /// Completed cycles. The first cycle is the warm-up cycle and is never
    /// profiled.
    cycle_count: u64,
    last_cycle_duration: Duration,
    /// Container totals over profiled cycles.
    total_cycle_ns: i64,
    max_cycle_ns: i64,
    /// Schedule rebuilds performed so far.
    pub(crate) rebuild_count: u64,
}

impl CycleState {
    pub(crate) fn new() -> CycleState {
        CycleState {
            schedule: Schedule::empty(),
            cycle_count: 0,
            last_cycle_duration: Duration::ZERO,
            total_cycle_ns: 0,
            max_cycle_ns: 0,
            rebuild_count: 0,
        }
    }
}

// ── WorkerShared ──────────────────────────────────────────────────────────────

/// Worker state shared between the worker thread, the watchdog thread and
/// the runtime listener registry.
pub(crate) struct WorkerShared {
    runtime: Arc<Runtime>,
    container: ElementHandle,
    name: String,
    /// Cycle period in nanoseconds; shared with the container so
    /// `set_cycle_time` takes effect at the next cycle boundary.
    cycle_time_ns: Arc<AtomicU64>,
    warn_on_cycle_time_exceed: bool,
    reschedule: AtomicBool,
    stop: StopFlag,
    watchdog: Watchdog,
    /// Description of the task currently inside `execute()`; read by the
    /// watchdog alert.
    current_task: Mutex<Option<String>>,
    execution_duration: Arc<OutputPort<Duration>>,
    details: Option<Arc<OutputPort<Vec<TaskProfile>>>>,
}

impl WorkerShared {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        runtime: Arc<Runtime>,
        container: ElementHandle,
        name: String,
        cycle_time_ns: Arc<AtomicU64>,
        warn_on_cycle_time_exceed: bool,
        execution_duration: Arc<OutputPort<Duration>>,
        details: Option<Arc<OutputPort<Vec<TaskProfile>>>>,
    ) -> Arc<WorkerShared> {
        Arc::new(WorkerShared {
            runtime,
            container,
            name,
            cycle_time_ns,
            warn_on_cycle_time_exceed,
            // build a schedule on the very first cycle
            reschedule: AtomicBool::new(true),
            stop: StopFlag::new(),
            watchdog: Watchdog::new(),
            current_task: Mutex::new(None),
            execution_duration,
            details,
        })
    }

    fn cycle_time(&self) -> Duration {
        Duration::from_nanos(self.cycle_time_ns.load(Ordering::Relaxed))
    }

    pub(crate) fn force_reschedule(&self) {
        self.reschedule.store(true, Ordering::Release);
    }

    /// One cycle: reschedule if flagged, arm the watchdog, execute the
    /// schedule, publish timing, disarm the watchdog.
    pub(crate) fn main_loop_callback(&self, state: &mut CycleState) {
        if self.reschedule.swap(false, Ordering::AcqRel) {
            let view = self.runtime.read();
            state.schedule = scheduler::build_schedule(&view, self.container);
            state.rebuild_count += 1;
        }

        let period = self.cycle_time();
        self.watchdog
            .set_deadline(Instant::now() + period * 4 + WATCHDOG_SLACK);

        let cycle_start = Instant::now();

        let profiled = self.details.is_some() && state.cycle_count > 0;
        if profiled {
            self.run_profiled_cycle(state, cycle_start);
        } else {
            self.execution_duration.publish(state.last_cycle_duration);
            for entry in state.schedule.entries() {
                *self.current_task.lock() = Some(entry.description.clone());
                entry.task.execute();
                *self.current_task.lock() = None;
            }
        }

        state.cycle_count += 1;
        state.last_cycle_duration = cycle_start.elapsed();

        self.watchdog.deactivate();
    }

    /// Profiled variant: measure each task, update its running totals, fill
    /// the profile vector (entry 0 is the whole container) and publish.
    fn run_profiled_cycle(&self, state: &mut CycleState, cycle_start: Instant) {
        let schedule = &state.schedule;
        let mut profiles = vec![TaskProfile::default(); schedule.len() + 1];

        for (i, entry) in schedule.entries().iter().enumerate() {
            *self.current_task.lock() = Some(entry.description.clone());
            let task_start = Instant::now();
            entry.task.execute();
            let duration = task_start.elapsed();
            *self.current_task.lock() = None;

            entry.task.record_execution(duration);
            profiles[i + 1] = TaskProfile {
                last_duration_ns: entry.task.last_duration_ns(),
                max_duration_ns: entry.task.max_duration_ns(),
                average_duration_ns: entry.task.average_duration_ns(),
                total_duration_ns: entry.task.total_duration_ns(),
                handle: entry.element.as_u32(),
                classification: TaskClass::Other,
            };
            if let Some(port) = entry.task.duration_port() {
                port.publish(duration);
            }
        }
        for i in schedule.segment_range(TaskSet::Sense) {
            profiles[i + 1].classification = TaskClass::Sense;
        }
        for i in schedule.segment_range(TaskSet::Control) {
            profiles[i + 1].classification = TaskClass::Control;
        }

        let cycle_duration = cycle_start.elapsed();
        let cycle_ns = cycle_duration.as_nanos().min(i64::MAX as u128) as i64;
        state.total_cycle_ns += cycle_ns;
        state.max_cycle_ns = state.max_cycle_ns.max(cycle_ns);

        // profiled cycles so far: every cycle but the first warm-up one
        let profiled_cycles = state.cycle_count as i64;
        profiles[0] = TaskProfile {
            last_duration_ns: cycle_ns,
            max_duration_ns: state.max_cycle_ns,
            average_duration_ns: state.total_cycle_ns / profiled_cycles,
            total_duration_ns: state.total_cycle_ns,
            handle: self.container.as_u32(),
            classification: TaskClass::Other,
        };

        self.execution_duration.publish(cycle_duration);
        if let Some(details) = &self.details {
            details.publish(profiles);
        }
    }

    fn handle_watchdog_alert(&self) {
        match self.current_task.lock().clone() {
            Some(task) => error!(
                worker = %self.name,
                task = %task,
                "got stuck executing task, check the module for infinite loops"
            ),
            None => error!(
                worker = %self.name,
                "got stuck without executing any task, this should not happen"
            ),
        }
    }
}

impl RuntimeListener for WorkerShared {
    fn on_element_change(&self, _event: StructureEvent, element: ElementHandle) {
        let view = self.runtime.read();
        if view.annotation::<PeriodicTask>(element).is_some()
            && view.is_below(element, self.container, true)
        {
            self.reschedule.store(true, Ordering::Release);
        }
    }

    fn on_connector_change(
        &self,
        _event: StructureEvent,
        source: ElementHandle,
        target: ElementHandle,
    ) {
        let view = self.runtime.read();
        if view.is_below(source, self.container, true)
            && view.is_below(target, self.container, true)
        {
            self.reschedule.store(true, Ordering::Release);
        }
    }

    fn on_uri_connector_change(&self, _event: StructureEvent, _element: ElementHandle) {
        // observed but ignored
    }
}

// ── Worker loop ───────────────────────────────────────────────────────────────

fn run(shared: Arc<WorkerShared>) {
    info!(
        worker = %shared.name,
        cycle_time_ms = shared.cycle_time().as_millis() as u64,
        "worker thread started"
    );

    let mut state = CycleState::new();
    while !shared.stop.is_set() {
        let period = shared.cycle_time();
        let start = Instant::now();
        shared.main_loop_callback(&mut state);
        let elapsed = start.elapsed();

        if shared.stop.is_set() {
            break;
        }
        if elapsed > period {
            if shared.warn_on_cycle_time_exceed {
                warn!(
                    worker = %shared.name,
                    cycle_us = elapsed.as_micros() as u64,
                    budget_us = period.as_micros() as u64,
                    "cycle time exceeded"
                );
            }
        } else if shared.stop.sleep_until(start + period) {
            break;
        }
    }

    info!(worker = %shared.name, cycles = state.cycle_count, "worker thread stopped");
}

// ── ThreadWorker ──────────────────────────────────────────────────────────────

/// Handle owning the worker and watchdog threads of one container.
///
/// Life cycle: created, then [`start`](Self::start) registers the runtime
/// listener and spawns both threads; [`stop`](Self::stop) deregisters and
/// signals the loop; [`join`](Self::join) blocks until both threads exit.
pub(crate) struct ThreadWorker {
    shared: Arc<WorkerShared>,
    listener: Arc<dyn RuntimeListener>,
    thread: Option<thread::JoinHandle<()>>,
    watchdog_thread: Option<thread::JoinHandle<()>>,
    realtime: bool,
}

impl ThreadWorker {
    pub(crate) fn new(shared: Arc<WorkerShared>) -> ThreadWorker {
        let listener: Arc<dyn RuntimeListener> = shared.clone();
        ThreadWorker {
            shared,
            listener,
            thread: None,
            watchdog_thread: None,
            realtime: false,
        }
    }

    /// Request real-time scheduling for the worker thread.
    pub(crate) fn request_realtime(&mut self) {
        self.realtime = true;
    }

    pub(crate) fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        self.shared.runtime.add_listener(&self.listener);
        if self.realtime {
            info!(
                worker = %self.shared.name,
                "realtime scheduling requested, policy selection is delegated to the deployment"
            );
        }

        let watchdog_shared = self.shared.clone();
        self.watchdog_thread = Some(
            thread::Builder::new()
                .name(format!("{} watchdog", self.shared.name))
                .spawn(move || watchdog_monitor(watchdog_shared))
                .expect("failed to spawn watchdog thread"),
        );

        let run_shared = self.shared.clone();
        self.thread = Some(
            thread::Builder::new()
                .name(self.shared.name.clone())
                .spawn(move || run(run_shared))
                .expect("failed to spawn worker thread"),
        );
    }

    /// Deregister the listener and signal both threads to exit. Does not
    /// block; call [`join`](Self::join) to wait.
    pub(crate) fn stop(&mut self) {
        self.shared.runtime.remove_listener(&self.listener);
        self.shared.stop.request();
        self.shared.watchdog.shutdown();
        debug!(worker = %self.shared.name, "stop requested");
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.watchdog_thread.take() {
            let _ = handle.join();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ExecutionControl, StartAndPausable};
    use crate::runtime::ElementFlags;
    use std::sync::Weak;

    struct Inert;

    impl StartAndPausable for Inert {
        fn is_executing(&self) -> bool {
            false
        }
        fn start_execution(&self) {}
        fn pause_execution(&self) {}
    }

    struct Fixture {
        rt: Arc<Runtime>,
        container: ElementHandle,
        shared: Arc<WorkerShared>,
        _keepalive: Arc<Inert>,
    }

    fn fixture() -> Fixture {
        let rt = Runtime::new();
        let container = rt.create_element(rt.root(), "Main", ElementFlags::READY);
        let target = Arc::new(Inert);
        let target_dyn: Arc<dyn StartAndPausable> = target.clone();
        let weak: Weak<dyn StartAndPausable> = Arc::downgrade(&target_dyn);
        rt.add_annotation(container, Arc::new(ExecutionControl::new(container, weak)));

        let execution_duration =
            OutputPort::create(&rt, container, "Execution Duration", ElementFlags::empty());
        let shared = WorkerShared::new(
            rt.clone(),
            container,
            "ThreadContainer Main".to_string(),
            Arc::new(AtomicU64::new(1_000_000)),
            true,
            execution_duration,
            None,
        );
        Fixture {
            rt,
            container,
            shared,
            _keepalive: target,
        }
    }

    /// Module with one connected port pair and a task annotation.
    fn add_task_module(f: &Fixture, name: &str) -> (ElementHandle, ElementHandle, ElementHandle) {
        let iface_flags =
            ElementFlags::READY | ElementFlags::EDGE_AGGREGATOR | ElementFlags::INTERFACE;
        let module = f.rt.create_element(f.container, name, ElementFlags::READY);
        let input = f.rt.create_element(module, "Input", iface_flags);
        let in_port = f.rt.create_port(
            input,
            "in",
            ElementFlags::READY | ElementFlags::ACCEPTS_DATA,
        );
        let output = f.rt.create_element(module, "Output", iface_flags);
        let out_port = f.rt.create_port(
            output,
            "out",
            ElementFlags::READY | ElementFlags::EMITS_DATA,
        );
        f.rt.add_annotation(module, Arc::new(PeriodicTask::new(input, output, Box::new(|| {}))));
        (module, in_port, out_port)
    }

    // ── Reschedule triggers ───────────────────────────────────────────────────

    #[test]
    fn connector_change_inside_container_sets_reschedule() {
        let f = fixture();
        let (_, _, out_a) = add_task_module(&f, "A");
        let (_, in_b, _) = add_task_module(&f, "B");

        f.shared.reschedule.store(false, Ordering::Release);
        f.shared
            .on_connector_change(StructureEvent::Added, out_a, in_b);
        assert!(f.shared.reschedule.load(Ordering::Acquire));
    }

    #[test]
    fn connector_change_with_outside_endpoint_is_ignored() {
        let f = fixture();
        let (_, _, out_a) = add_task_module(&f, "A");
        // port outside the container subtree
        let stray = f.rt.create_port(
            f.rt.root(),
            "stray",
            ElementFlags::READY | ElementFlags::ACCEPTS_DATA,
        );

        f.shared.reschedule.store(false, Ordering::Release);
        f.shared
            .on_connector_change(StructureEvent::Added, out_a, stray);
        assert!(!f.shared.reschedule.load(Ordering::Acquire));
    }

    #[test]
    fn element_change_requires_task_annotation() {
        let f = fixture();
        let (module, _, _) = add_task_module(&f, "A");
        let bare = f.rt.create_element(f.container, "bare", ElementFlags::READY);

        f.shared.reschedule.store(false, Ordering::Release);
        f.shared.on_element_change(StructureEvent::Changed, bare);
        assert!(!f.shared.reschedule.load(Ordering::Acquire));

        f.shared.on_element_change(StructureEvent::Changed, module);
        assert!(f.shared.reschedule.load(Ordering::Acquire));
    }

    #[test]
    fn element_change_outside_container_is_ignored() {
        let f = fixture();
        let outside = f.rt.create_element(f.rt.root(), "Elsewhere", ElementFlags::READY);
        let iface_flags =
            ElementFlags::READY | ElementFlags::EDGE_AGGREGATOR | ElementFlags::INTERFACE;
        let input = f.rt.create_element(outside, "Input", iface_flags);
        let output = f.rt.create_element(outside, "Output", iface_flags);
        f.rt.add_annotation(
            outside,
            Arc::new(PeriodicTask::new(input, output, Box::new(|| {}))),
        );

        f.shared.reschedule.store(false, Ordering::Release);
        f.shared.on_element_change(StructureEvent::Changed, outside);
        assert!(!f.shared.reschedule.load(Ordering::Acquire));
    }

    #[test]
    fn uri_connector_change_is_ignored() {
        let f = fixture();
        f.shared.reschedule.store(false, Ordering::Release);
        f.shared
            .on_uri_connector_change(StructureEvent::Changed, f.container);
        assert!(!f.shared.reschedule.load(Ordering::Acquire));
    }

    // ── Cycle behavior ────────────────────────────────────────────────────────

    #[test]
    fn schedule_is_rebuilt_exactly_once_per_trigger() {
        let f = fixture();
        let (_, _, out_a) = add_task_module(&f, "A");
        let (_, in_b, _) = add_task_module(&f, "B");

        let mut state = CycleState::new();
        f.shared.main_loop_callback(&mut state);
        assert_eq!(state.rebuild_count, 1, "initial cycle builds the schedule");

        f.shared.main_loop_callback(&mut state);
        assert_eq!(state.rebuild_count, 1, "no trigger, no rebuild");

        f.rt.connect(out_a, in_b);
        f.shared
            .on_connector_change(StructureEvent::Added, out_a, in_b);
        f.shared.main_loop_callback(&mut state);
        f.shared.main_loop_callback(&mut state);
        assert_eq!(state.rebuild_count, 2, "one trigger, one rebuild");
    }

    #[test]
    fn unprofiled_cycle_publishes_previous_cycle_duration() {
        let f = fixture();
        add_task_module(&f, "A");

        let mut state = CycleState::new();
        f.shared.main_loop_callback(&mut state);
        // the very first publication reports the (zero) previous duration
        assert_eq!(f.shared.execution_duration.get(), Some(Duration::ZERO));
        assert_eq!(f.shared.execution_duration.publish_count(), 1);

        f.shared.main_loop_callback(&mut state);
        assert_eq!(f.shared.execution_duration.publish_count(), 2);
    }

    #[test]
    fn schedule_survives_between_cycles() {
        let f = fixture();
        add_task_module(&f, "A");
        add_task_module(&f, "B");

        let mut state = CycleState::new();
        f.shared.main_loop_callback(&mut state);
        assert_eq!(state.schedule.len(), 2);
        f.shared.main_loop_callback(&mut state);
        assert_eq!(state.schedule.len(), 2);
    }

    #[test]
    fn watchdog_deadline_is_cleared_after_cycle() {
        let f = fixture();
        let mut state = CycleState::new();
        f.shared.main_loop_callback(&mut state);
        assert!(f.shared.watchdog.state.lock().deadline.is_none());
    }

    #[test]
    fn watchdog_alert_with_and_without_current_task() {
        // must not panic either way
        let f = fixture();
        f.shared.handle_watchdog_alert();
        *f.shared.current_task.lock() = Some("Main/A".to_string());
        f.shared.handle_watchdog_alert();
    }

    // ── Stop flag ─────────────────────────────────────────────────────────────

    #[test]
    fn stop_flag_interrupts_sleep() {
        let flag = Arc::new(StopFlag::new());
        let sleeper = flag.clone();
        let handle = thread::spawn(move || {
            // far-future deadline: only a stop request can end this early
            sleeper.sleep_until(Instant::now() + Duration::from_secs(30))
        });
        thread::sleep(Duration::from_millis(20));
        flag.request();
        assert!(handle.join().unwrap(), "sleep must report the stop request");
    }

    #[test]
    fn stop_flag_reports_timeout_without_request() {
        let flag = StopFlag::new();
        let stopped = flag.sleep_until(Instant::now() + Duration::from_millis(5));
        assert!(!stopped);
    }
}
