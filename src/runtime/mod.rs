/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Runtime graph: the hierarchical element tree that scheduling operates on.
//!
//! The graph is a slab of [`Element`]s behind one `parking_lot::RwLock` - the
//! *structural mutex*. Mutating operations take the write lock, apply the
//! change, release the lock and then fire listener callbacks. Readers obtain
//! a [`GraphView`] (a read guard) and query the graph through it; the
//! scheduler holds one view for the whole duration of a schedule rebuild so
//! the graph cannot mutate mid-trace.
//!
//! Lifecycle convention: elements are created non-ready, annotations and
//! ports are wired, then [`Runtime::mark_ready`] publishes the element to
//! the schedulers (and fires the element-change event they listen for).

pub mod element;
pub mod listener;
pub mod port;

pub use element::{ElementFlags, ElementHandle};
pub use listener::{RuntimeListener, StructureEvent};
pub use port::OutputPort;

use element::Element;

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::debug;

// ── Graph storage ─────────────────────────────────────────────────────────────

pub(crate) struct Graph {
    elements: Vec<Element>,
}

impl Graph {
    fn element(&self, h: ElementHandle) -> &Element {
        &self.elements[h.index()]
    }

    fn element_mut(&mut self, h: ElementHandle) -> &mut Element {
        &mut self.elements[h.index()]
    }
}

// ── Runtime ───────────────────────────────────────────────────────────────────

/// Owner of the element graph and the listener registry.
///
/// Cheaply shared via `Arc`; all methods take `&self`.
pub struct Runtime {
    graph: RwLock<Graph>,
    listeners: Mutex<Vec<Weak<dyn RuntimeListener>>>,
}

impl Runtime {
    /// Create a runtime containing only the root element (ready, unnamed
    /// parentless group).
    pub fn new() -> Arc<Runtime> {
        let root = Element::new("", None, ElementFlags::READY);
        Arc::new(Runtime {
            graph: RwLock::new(Graph { elements: vec![root] }),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Handle of the root element.
    pub fn root(&self) -> ElementHandle {
        ElementHandle::from_index(0)
    }

    // ── Structure mutation ────────────────────────────────────────────────────

    /// Create a child element under `parent`. Fires an `Added` element event.
    ///
    /// Elements are typically created without `READY` and published later via
    /// [`mark_ready`](Self::mark_ready), once annotations and ports are
    /// attached.
    pub fn create_element(
        &self,
        parent: ElementHandle,
        name: impl Into<String>,
        flags: ElementFlags,
    ) -> ElementHandle {
        let handle = {
            let mut graph = self.graph.write();
            let handle = ElementHandle::from_index(graph.elements.len());
            graph.elements.push(Element::new(name, Some(parent), flags));
            graph.element_mut(parent).children.push(handle);
            handle
        };
        self.fire_element_change(StructureEvent::Added, handle);
        handle
    }

    /// Create a port element under `parent`. Identical to
    /// [`create_element`](Self::create_element); the port nature is carried
    /// entirely by `flags` (`ACCEPTS_DATA` / `EMITS_DATA` / `OUTPUT_PORT`).
    pub fn create_port(
        &self,
        parent: ElementHandle,
        name: impl Into<String>,
        flags: ElementFlags,
    ) -> ElementHandle {
        self.create_element(parent, name, flags)
    }

    /// Replace the flags of `element`. Fires a `Changed` element event.
    pub fn set_flags(&self, element: ElementHandle, flags: ElementFlags) {
        {
            let mut graph = self.graph.write();
            graph.element_mut(element).flags = flags;
        }
        self.fire_element_change(StructureEvent::Changed, element);
    }

    /// Add `READY` to the element's flags, publishing it to schedulers.
    /// Fires a `Changed` element event.
    pub fn mark_ready(&self, element: ElementHandle) {
        {
            let mut graph = self.graph.write();
            let e = graph.element_mut(element);
            e.flags |= ElementFlags::READY;
        }
        self.fire_element_change(StructureEvent::Changed, element);
    }

    /// Connect two ports with a directed edge. Fires an `Added` connector
    /// event with both endpoints.
    pub fn connect(&self, source: ElementHandle, target: ElementHandle) {
        {
            let mut graph = self.graph.write();
            graph.element_mut(source).outgoing.push(target);
            graph.element_mut(target).incoming.push(source);
        }
        debug!(source = %source, target = %target, "connector added");
        self.fire_connector_change(StructureEvent::Added, source, target);
    }

    /// Remove the directed edge between two ports, if present. Fires a
    /// `Removed` connector event.
    pub fn disconnect(&self, source: ElementHandle, target: ElementHandle) {
        {
            let mut graph = self.graph.write();
            graph.element_mut(source).outgoing.retain(|&t| t != target);
            graph.element_mut(target).incoming.retain(|&s| s != source);
        }
        self.fire_connector_change(StructureEvent::Removed, source, target);
    }

    /// Attach an annotation to `element`, replacing any previous annotation
    /// of the same type. Annotations are not structural: no event fires.
    pub fn add_annotation<T: Any + Send + Sync>(&self, element: ElementHandle, annotation: Arc<T>) {
        let mut graph = self.graph.write();
        graph
            .element_mut(element)
            .annotations
            .insert(std::any::TypeId::of::<T>(), annotation);
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Take the structural read lock and return a queryable view.
    ///
    /// The view pins the graph: no mutation can happen while it is alive.
    pub fn read(&self) -> GraphView<'_> {
        GraphView {
            guard: self.graph.read(),
        }
    }

    /// Annotation lookup without keeping a view alive.
    pub fn annotation<T: Any + Send + Sync>(&self, element: ElementHandle) -> Option<Arc<T>> {
        self.read().annotation::<T>(element)
    }

    /// Slash-separated path of `element` from the root.
    pub fn qualified_name(&self, element: ElementHandle) -> String {
        self.read().qualified_name(element)
    }

    // ── Listeners ─────────────────────────────────────────────────────────────

    /// Register a structural-change listener. Held weakly; dead listeners
    /// are pruned on the next notification.
    pub fn add_listener(&self, listener: &Arc<dyn RuntimeListener>) {
        self.listeners.lock().push(Arc::downgrade(listener));
    }

    /// Deregister a previously registered listener (pointer identity).
    pub fn remove_listener(&self, listener: &Arc<dyn RuntimeListener>) {
        let target = Arc::as_ptr(listener) as *const ();
        self.listeners
            .lock()
            .retain(|w| match w.upgrade() {
                Some(l) => Arc::as_ptr(&l) as *const () != target,
                None => false,
            });
    }

    fn live_listeners(&self) -> Vec<Arc<dyn RuntimeListener>> {
        let mut listeners = self.listeners.lock();
        listeners.retain(|w| w.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }

    fn fire_element_change(&self, event: StructureEvent, element: ElementHandle) {
        for l in self.live_listeners() {
            l.on_element_change(event, element);
        }
    }

    fn fire_connector_change(
        &self,
        event: StructureEvent,
        source: ElementHandle,
        target: ElementHandle,
    ) {
        for l in self.live_listeners() {
            l.on_connector_change(event, source, target);
        }
    }
}

// ── GraphView ─────────────────────────────────────────────────────────────────

/// Read-locked view of the graph.
///
/// All scheduler queries go through a view so one lock acquisition covers an
/// entire rebuild.
pub struct GraphView<'a> {
    guard: RwLockReadGuard<'a, Graph>,
}

impl GraphView<'_> {
    pub fn name(&self, element: ElementHandle) -> &str {
        &self.guard.element(element).name
    }

    pub fn flags(&self, element: ElementHandle) -> ElementFlags {
        self.guard.element(element).flags
    }

    pub fn parent(&self, element: ElementHandle) -> Option<ElementHandle> {
        self.guard.element(element).parent
    }

    pub fn children(&self, element: ElementHandle) -> &[ElementHandle] {
        &self.guard.element(element).children
    }

    pub fn outgoing(&self, port: ElementHandle) -> &[ElementHandle] {
        &self.guard.element(port).outgoing
    }

    pub fn incoming(&self, port: ElementHandle) -> &[ElementHandle] {
        &self.guard.element(port).incoming
    }

    pub fn is_ready(&self, element: ElementHandle) -> bool {
        self.flags(element).contains(ElementFlags::READY)
    }

    pub fn annotation<T: Any + Send + Sync>(&self, element: ElementHandle) -> Option<Arc<T>> {
        self.guard.element(element).annotation::<T>()
    }

    /// Slash-separated path from the root, e.g. `"MainLoop/Vision/Output"`.
    pub fn qualified_name(&self, element: ElementHandle) -> String {
        let mut parts = Vec::new();
        let mut current = Some(element);
        while let Some(h) = current {
            let e = self.guard.element(h);
            if !e.name.is_empty() {
                parts.push(e.name.clone());
            }
            current = e.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Is `element` below `root` in the tree? With `include_self`, an element
    /// is considered below itself.
    pub fn is_below(&self, element: ElementHandle, root: ElementHandle, include_self: bool) -> bool {
        if element == root {
            return include_self;
        }
        let mut current = self.parent(element);
        while let Some(h) = current {
            if h == root {
                return true;
            }
            current = self.parent(h);
        }
        false
    }

    /// Depth-first preorder walk of the subtree rooted at `root`, including
    /// `root` itself. Child order is creation order, making iteration (and
    /// therefore scheduling) deterministic.
    pub fn subtree(&self, root: ElementHandle) -> Vec<ElementHandle> {
        let mut result = Vec::new();
        let mut stack = vec![root];
        while let Some(h) = stack.pop() {
            result.push(h);
            // push reversed so children pop in creation order
            for &c in self.children(h).iter().rev() {
                stack.push(c);
            }
        }
        result
    }

    /// Nearest ancestor of `port` (inclusive) that is an interface, i.e. the
    /// aggregator a port belongs to.
    pub fn aggregator_of(&self, port: ElementHandle) -> Option<ElementHandle> {
        let mut current = Some(port);
        while let Some(h) = current {
            if self.flags(h).is_interface() {
                return Some(h);
            }
            current = self.parent(h);
        }
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ready(flags: ElementFlags) -> ElementFlags {
        flags | ElementFlags::READY
    }

    #[test]
    fn subtree_is_preorder_in_creation_order() {
        let rt = Runtime::new();
        let a = rt.create_element(rt.root(), "a", ready(ElementFlags::empty()));
        let a1 = rt.create_element(a, "a1", ready(ElementFlags::empty()));
        let a2 = rt.create_element(a, "a2", ready(ElementFlags::empty()));
        let a1x = rt.create_element(a1, "a1x", ready(ElementFlags::empty()));

        let view = rt.read();
        assert_eq!(view.subtree(a), vec![a, a1, a1x, a2]);
    }

    #[test]
    fn qualified_name_joins_path_without_root() {
        let rt = Runtime::new();
        let grp = rt.create_element(rt.root(), "Main", ElementFlags::READY);
        let module = rt.create_element(grp, "Vision", ElementFlags::READY);

        assert_eq!(rt.qualified_name(module), "Main/Vision");
    }

    #[test]
    fn is_below_respects_include_self() {
        let rt = Runtime::new();
        let grp = rt.create_element(rt.root(), "g", ElementFlags::READY);
        let child = rt.create_element(grp, "c", ElementFlags::READY);

        let view = rt.read();
        assert!(view.is_below(child, grp, false));
        assert!(view.is_below(grp, grp, true));
        assert!(!view.is_below(grp, grp, false));
        assert!(!view.is_below(grp, child, false));
    }

    #[test]
    fn connect_mirrors_edges_on_both_ports() {
        let rt = Runtime::new();
        let src = rt.create_port(rt.root(), "out", ready(ElementFlags::EMITS_DATA));
        let dst = rt.create_port(rt.root(), "in", ready(ElementFlags::ACCEPTS_DATA));
        rt.connect(src, dst);

        let view = rt.read();
        assert_eq!(view.outgoing(src), &[dst]);
        assert_eq!(view.incoming(dst), &[src]);
    }

    #[test]
    fn disconnect_removes_both_directions() {
        let rt = Runtime::new();
        let src = rt.create_port(rt.root(), "out", ready(ElementFlags::EMITS_DATA));
        let dst = rt.create_port(rt.root(), "in", ready(ElementFlags::ACCEPTS_DATA));
        rt.connect(src, dst);
        rt.disconnect(src, dst);

        let view = rt.read();
        assert!(view.outgoing(src).is_empty());
        assert!(view.incoming(dst).is_empty());
    }

    #[test]
    fn aggregator_of_walks_to_nearest_interface() {
        let rt = Runtime::new();
        let iface = rt.create_element(
            rt.root(),
            "iface",
            ready(ElementFlags::EDGE_AGGREGATOR | ElementFlags::INTERFACE),
        );
        let port = rt.create_port(iface, "p", ready(ElementFlags::EMITS_DATA));

        let view = rt.read();
        assert_eq!(view.aggregator_of(port), Some(iface));
        assert_eq!(view.aggregator_of(iface), Some(iface));
        assert_eq!(view.aggregator_of(rt.root()), None);
    }

    // ── Listeners ─────────────────────────────────────────────────────────────

    struct CountingListener {
        element_events: AtomicUsize,
        connector_events: AtomicUsize,
    }

    impl RuntimeListener for CountingListener {
        fn on_element_change(&self, _event: StructureEvent, _element: ElementHandle) {
            self.element_events.fetch_add(1, Ordering::SeqCst);
        }

        fn on_connector_change(
            &self,
            _event: StructureEvent,
            _source: ElementHandle,
            _target: ElementHandle,
        ) {
            self.connector_events.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_listener() -> Arc<CountingListener> {
        Arc::new(CountingListener {
            element_events: AtomicUsize::new(0),
            connector_events: AtomicUsize::new(0),
        })
    }

    #[test]
    fn listeners_observe_structure_changes() {
        let rt = Runtime::new();
        let listener = counting_listener();
        let as_dyn: Arc<dyn RuntimeListener> = listener.clone();
        rt.add_listener(&as_dyn);

        let e = rt.create_element(rt.root(), "m", ElementFlags::empty());
        rt.mark_ready(e);
        let src = rt.create_port(e, "out", ElementFlags::EMITS_DATA);
        let dst = rt.create_port(e, "in", ElementFlags::ACCEPTS_DATA);
        rt.connect(src, dst);

        // create + mark_ready + two ports = 4 element events, 1 connector event
        assert_eq!(listener.element_events.load(Ordering::SeqCst), 4);
        assert_eq!(listener.connector_events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_listener_no_longer_fires() {
        let rt = Runtime::new();
        let listener = counting_listener();
        let as_dyn: Arc<dyn RuntimeListener> = listener.clone();
        rt.add_listener(&as_dyn);
        rt.remove_listener(&as_dyn);

        rt.create_element(rt.root(), "m", ElementFlags::READY);
        assert_eq!(listener.element_events.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_may_read_graph_from_callback() {
        // Callbacks fire after the write lock is released; taking the read
        // lock inside one must not deadlock.
        struct ReadingListener {
            rt: Arc<Runtime>,
            seen: AtomicUsize,
        }
        impl RuntimeListener for ReadingListener {
            fn on_element_change(&self, _event: StructureEvent, element: ElementHandle) {
                let view = self.rt.read();
                let _ = view.flags(element);
                self.seen.fetch_add(1, Ordering::SeqCst);
            }
        }

        let rt = Runtime::new();
        let listener = Arc::new(ReadingListener {
            rt: rt.clone(),
            seen: AtomicUsize::new(0),
        });
        let as_dyn: Arc<dyn RuntimeListener> = listener.clone();
        rt.add_listener(&as_dyn);

        rt.create_element(rt.root(), "m", ElementFlags::READY);
        assert_eq!(listener.seen.load(Ordering::SeqCst), 1);
    }
}
