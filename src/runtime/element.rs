/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Element model of the runtime graph.
//!
//! Every node in the hierarchical graph is an [`Element`]: modules, groups,
//! interfaces and ports are all elements, distinguished only by their
//! [`ElementFlags`]. Elements are stored in a slab owned by
//! [`Runtime`](super::Runtime) and referenced by stable [`ElementHandle`]s,
//! never by pointers, so graph traversal code stays free of lifetime
//! entanglement with the slab.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ── Handles ───────────────────────────────────────────────────────────────────

/// Stable identifier of an element in the runtime graph.
///
/// Handles are never reused within one [`Runtime`](super::Runtime); they stay
/// valid for the lifetime of the runtime. The inner value is the wire
/// representation used in [`TaskProfile`](crate::profile::TaskProfile)
/// records.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(u32);

impl ElementHandle {
    pub(crate) fn from_index(index: usize) -> Self {
        ElementHandle(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw handle value as published in profile records.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Flags ─────────────────────────────────────────────────────────────────────

bitflags::bitflags! {
    /// Property flags of an element.
    ///
    /// The scheduler reads these during discovery and tracing; hosts set them
    /// when building the graph. `READY` marks an element as fully constructed
    /// and wired - non-ready elements are invisible to the scheduler.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ElementFlags: u16 {
        /// Element is initialized and participates in scheduling.
        const READY            = 1 << 0;
        /// Element is an interface grouping ports.
        const INTERFACE        = 1 << 1;
        /// Element aggregates port edges for coarse traversal.
        const EDGE_AGGREGATOR  = 1 << 2;
        /// Interface carries sensor data.
        const SENSOR_DATA      = 1 << 3;
        /// Interface carries controller data.
        const CONTROLLER_DATA  = 1 << 4;
        /// Port accepts incoming data.
        const ACCEPTS_DATA     = 1 << 5;
        /// Port emits outgoing data.
        const EMITS_DATA       = 1 << 6;
        /// Element is an output port.
        const OUTPUT_PORT      = 1 << 7;
    }
}

impl ElementFlags {
    /// Is this element an interface in the traversal sense (either flavor)?
    pub fn is_interface(self) -> bool {
        self.intersects(ElementFlags::EDGE_AGGREGATOR | ElementFlags::INTERFACE)
    }

    /// Is this element a data-flow port (accepts or emits data)?
    pub fn is_data_port(self) -> bool {
        self.intersects(ElementFlags::ACCEPTS_DATA | ElementFlags::EMITS_DATA)
    }

    /// Is this element a pure input port (accepts and never emits)?
    pub fn is_pure_input(self) -> bool {
        self.contains(ElementFlags::ACCEPTS_DATA) && !self.contains(ElementFlags::EMITS_DATA)
    }
}

// ── Element ───────────────────────────────────────────────────────────────────

/// One node of the runtime graph.
///
/// Annotations are a typed side-table: arbitrary `Send + Sync` values keyed
/// by their `TypeId`, at most one per type. Port connections are directed;
/// `outgoing` on the source mirrors `incoming` on the target.
pub(crate) struct Element {
    pub name: String,
    pub parent: Option<ElementHandle>,
    pub children: Vec<ElementHandle>,
    pub flags: ElementFlags,
    pub annotations: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    pub outgoing: Vec<ElementHandle>,
    pub incoming: Vec<ElementHandle>,
}

impl Element {
    pub fn new(name: impl Into<String>, parent: Option<ElementHandle>, flags: ElementFlags) -> Self {
        Element {
            name: name.into(),
            parent,
            children: Vec::new(),
            flags,
            annotations: HashMap::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }

    pub fn annotation<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.annotations
            .get(&TypeId::of::<T>())
            .and_then(|a| Arc::clone(a).downcast::<T>().ok())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
