/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Execution control annotation.
//!
//! [`ExecutionControl`] gives tooling one uniform handle to start and pause
//! execution anywhere in the element tree. A thread container attaches one
//! to itself at construction; the scheduler uses [`ExecutionControl::find`]
//! during task discovery to decide which container owns an element (elements
//! whose nearest control is a nested container are not scheduled here).

use std::sync::{Arc, Weak};

use crate::runtime::{ElementHandle, GraphView, Runtime};

// ── StartAndPausable ──────────────────────────────────────────────────────────

/// Object whose execution can be started and paused.
pub trait StartAndPausable: Send + Sync {
    /// Whether the object is currently executing.
    fn is_executing(&self) -> bool;

    /// Start or resume execution.
    fn start_execution(&self);

    /// Stop execution and wait for it to cease.
    fn pause_execution(&self);
}

// ── ExecutionControl ──────────────────────────────────────────────────────────

/// Annotation wrapping a startable/pausable target.
///
/// Holds the target weakly: a control outlives its container only as a dead
/// handle ([`is_running`](Self::is_running) returns `false`, start/pause
/// become no-ops).
pub struct ExecutionControl {
    element: ElementHandle,
    target: Weak<dyn StartAndPausable>,
}

impl ExecutionControl {
    /// Create a control for `target`, to be attached to `element`.
    pub fn new(element: ElementHandle, target: Weak<dyn StartAndPausable>) -> Self {
        ExecutionControl { element, target }
    }

    /// Element this control is attached to.
    pub fn element(&self) -> ElementHandle {
        self.element
    }

    /// Is the target currently executing?
    pub fn is_running(&self) -> bool {
        self.target.upgrade().map(|t| t.is_executing()).unwrap_or(false)
    }

    /// Start or resume the target.
    pub fn start(&self) {
        if let Some(t) = self.target.upgrade() {
            t.start_execution();
        }
    }

    /// Stop or pause the target.
    pub fn pause(&self) {
        if let Some(t) = self.target.upgrade() {
            t.pause_execution();
        }
    }

    /// Find the control responsible for executing `element`: the nearest
    /// ancestor (including `element` itself) carrying this annotation.
    pub fn find(view: &GraphView<'_>, element: ElementHandle) -> Option<Arc<ExecutionControl>> {
        let mut current = Some(element);
        while let Some(h) = current {
            if let Some(control) = view.annotation::<ExecutionControl>(h) {
                return Some(control);
            }
            current = view.parent(h);
        }
        None
    }

    /// All controls attached below `root`, including `root` itself.
    /// Returns nothing if `root` is not ready.
    pub fn find_all(view: &GraphView<'_>, root: ElementHandle) -> Vec<Arc<ExecutionControl>> {
        let mut result = Vec::new();
        if !view.is_ready(root) {
            return result;
        }
        for element in view.subtree(root) {
            if let Some(control) = view.annotation::<ExecutionControl>(element) {
                result.push(control);
            }
        }
        result
    }

    /// Start every control below `root` that is not already running.
    /// Idempotent.
    pub fn start_all(runtime: &Runtime, root: ElementHandle) {
        // Collect under the read lock, act after it is released: starting a
        // container takes its lifecycle mutex, which must never be acquired
        // below the structural lock.
        let controls = {
            let view = runtime.read();
            Self::find_all(&view, root)
        };
        for control in controls {
            if !control.is_running() {
                control.start();
            }
        }
    }

    /// Pause every control below `root` that is currently running.
    /// Idempotent.
    pub fn pause_all(runtime: &Runtime, root: ElementHandle) {
        let controls = {
            let view = runtime.read();
            Self::find_all(&view, root)
        };
        for control in controls {
            if control.is_running() {
                control.pause();
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ElementFlags;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Minimal startable target counting transitions.
    struct Toggle {
        running: AtomicBool,
        starts: AtomicUsize,
        pauses: AtomicUsize,
    }

    impl Toggle {
        fn new() -> Arc<Toggle> {
            Arc::new(Toggle {
                running: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                pauses: AtomicUsize::new(0),
            })
        }
    }

    impl StartAndPausable for Toggle {
        fn is_executing(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
        fn start_execution(&self) {
            self.running.store(true, Ordering::SeqCst);
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn pause_execution(&self) {
            self.running.store(false, Ordering::SeqCst);
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn attach_control(rt: &Runtime, element: ElementHandle, target: &Arc<Toggle>) {
        let target_dyn: Arc<dyn StartAndPausable> = target.clone();
        let weak: Weak<dyn StartAndPausable> = Arc::downgrade(&target_dyn);
        rt.add_annotation(element, Arc::new(ExecutionControl::new(element, weak)));
    }

    #[test]
    fn find_walks_ancestors_inclusive() {
        let rt = Runtime::new();
        let group = rt.create_element(rt.root(), "group", ElementFlags::READY);
        let module = rt.create_element(group, "module", ElementFlags::READY);
        let toggle = Toggle::new();
        attach_control(&rt, group, &toggle);

        let view = rt.read();
        assert_eq!(ExecutionControl::find(&view, module).unwrap().element(), group);
        assert_eq!(ExecutionControl::find(&view, group).unwrap().element(), group);
        assert!(ExecutionControl::find(&view, rt.root()).is_none());
    }

    #[test]
    fn find_prefers_nearest_control() {
        let rt = Runtime::new();
        let outer = rt.create_element(rt.root(), "outer", ElementFlags::READY);
        let inner = rt.create_element(outer, "inner", ElementFlags::READY);
        let leaf = rt.create_element(inner, "leaf", ElementFlags::READY);
        let outer_toggle = Toggle::new();
        let inner_toggle = Toggle::new();
        attach_control(&rt, outer, &outer_toggle);
        attach_control(&rt, inner, &inner_toggle);

        let view = rt.read();
        assert_eq!(ExecutionControl::find(&view, leaf).unwrap().element(), inner);
    }

    #[test]
    fn find_all_collects_whole_subtree() {
        let rt = Runtime::new();
        let outer = rt.create_element(rt.root(), "outer", ElementFlags::READY);
        let inner = rt.create_element(outer, "inner", ElementFlags::READY);
        let t1 = Toggle::new();
        let t2 = Toggle::new();
        attach_control(&rt, outer, &t1);
        attach_control(&rt, inner, &t2);

        let view = rt.read();
        let all = ExecutionControl::find_all(&view, outer);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn find_all_skips_non_ready_root() {
        let rt = Runtime::new();
        let group = rt.create_element(rt.root(), "group", ElementFlags::empty());
        let toggle = Toggle::new();
        attach_control(&rt, group, &toggle);

        let view = rt.read();
        assert!(ExecutionControl::find_all(&view, group).is_empty());
    }

    #[test]
    fn start_all_and_pause_all_are_idempotent() {
        let rt = Runtime::new();
        let group = rt.create_element(rt.root(), "group", ElementFlags::READY);
        let toggle = Toggle::new();
        attach_control(&rt, group, &toggle);

        ExecutionControl::start_all(&rt, rt.root());
        ExecutionControl::start_all(&rt, rt.root());
        assert_eq!(toggle.starts.load(Ordering::SeqCst), 1, "second start is a no-op");

        ExecutionControl::pause_all(&rt, rt.root());
        ExecutionControl::pause_all(&rt, rt.root());
        assert_eq!(toggle.pauses.load(Ordering::SeqCst), 1, "second pause is a no-op");
    }

    #[test]
    fn dead_target_reads_as_not_running() {
        let rt = Runtime::new();
        let group = rt.create_element(rt.root(), "group", ElementFlags::READY);
        let toggle = Toggle::new();
        attach_control(&rt, group, &toggle);
        drop(toggle);

        let view = rt.read();
        let control = ExecutionControl::find(&view, group).unwrap();
        assert!(!control.is_running());
        control.start(); // must not panic
    }
}
