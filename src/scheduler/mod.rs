//! Schedule construction.
//!
//! [`build_schedule`] turns the subtree of one thread container into a
//! linear execution order for its periodic tasks. The order is derived from
//! the data-flow graph so that producers run before consumers within a
//! cycle. Construction happens in four passes, all under the structural read
//! lock held by the caller:
//!
//! 1. **Discovery** - walk the container's ready descendants, collect
//!    `PeriodicTask` annotations into four scratch sets (initial / sense /
//!    control / other) and collect the sensor and controller interfaces.
//! 2. **Classification by flooding** - propagate reachability bits from every
//!    sensor/controller interface through the port graph, then move tasks of
//!    the `other` set into the segment their bits indicate.
//! 3. **Dependency tracing** - per set, trace each task's outgoing
//!    connections until another task of the same set is reached, recording
//!    predecessor/successor edges.
//! 4. **Topological sort** - per set, repeatedly emit tasks without
//!    predecessors; when only cycles remain, trace back to a break point,
//!    warn, and cut it.
//!
//! | Pass / set | Traversal stops at |
//! |---|---|
//! | Flooding | sensor *and* controller interfaces |
//! | Tracing, `initial` | sensor *and* controller interfaces |
//! | Tracing, `sense` | controller interfaces |
//! | Tracing, `control` | sensor interfaces |
//! | Tracing, `other` | nothing |
//!
//! All scratch state (classification bits, predecessor/successor edges)
//! lives in a builder-owned arena keyed by task index and dies with the
//! build; nothing persists between reschedules. Determinism: sets and
//! traversal results are `Vec`s filled in discovery order, hash containers
//! are used for membership only.

pub mod error;

pub use error::SchedulingError;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::control::ExecutionControl;
use crate::profile::TaskClass;
use crate::runtime::{ElementFlags, ElementHandle, GraphView};
use crate::task::{PeriodicTask, TaskClassification};

// ── Task sets ─────────────────────────────────────────────────────────────────

/// The four schedule segments, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSet {
    /// Runs before everything else (feeds both sense and control).
    Initial = 0,
    /// Sensor acquisition side of the cycle.
    Sense = 1,
    /// Command computation side of the cycle.
    Control = 2,
    /// Tasks unrelated to the sense/control partition.
    Other = 3,
}

impl TaskSet {
    /// All sets in schedule order.
    pub const ALL: [TaskSet; 4] = [TaskSet::Initial, TaskSet::Sense, TaskSet::Control, TaskSet::Other];

    fn index(self) -> usize {
        self as usize
    }
}

// ── Schedule ──────────────────────────────────────────────────────────────────

/// One entry of a built schedule.
pub struct ScheduleEntry {
    pub(crate) task: Arc<PeriodicTask>,
    pub(crate) element: ElementHandle,
    /// Qualified name of the annotated element, precomputed for log output
    /// on the hot path.
    pub(crate) description: String,
}

/// Ordered task sequence for one container, partitioned into four contiguous
/// segments.
///
/// Built entirely under the container's structural read lock; afterwards read
/// only by the worker thread.
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
    first_index: [usize; 4],
}

impl Schedule {
    /// Schedule with no tasks.
    pub fn empty() -> Schedule {
        Schedule {
            entries: Vec::new(),
            first_index: [0; 4],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Starting index of each segment, in set order.
    pub fn first_index(&self) -> [usize; 4] {
        self.first_index
    }

    /// Index range of one segment.
    pub fn segment_range(&self, set: TaskSet) -> std::ops::Range<usize> {
        let start = self.first_index[set.index()];
        let end = if set.index() + 1 < self.first_index.len() {
            self.first_index[set.index() + 1]
        } else {
            self.entries.len()
        };
        start..end
    }

    /// Profile classification of the entry at `index`.
    pub fn class_of_index(&self, index: usize) -> TaskClass {
        if self.segment_range(TaskSet::Sense).contains(&index) {
            TaskClass::Sense
        } else if self.segment_range(TaskSet::Control).contains(&index) {
            TaskClass::Control
        } else {
            TaskClass::Other
        }
    }

    /// Elements of the scheduled tasks, in execution order.
    pub fn element_order(&self) -> Vec<ElementHandle> {
        self.entries.iter().map(|e| e.element).collect()
    }

    /// Position of the task annotated on `element`, if scheduled.
    pub fn position_of(&self, element: ElementHandle) -> Option<usize> {
        self.entries.iter().position(|e| e.element == element)
    }
}

// ── Public entry point ────────────────────────────────────────────────────────

/// Build the schedule for `container`.
///
/// The caller holds the structural read lock (the `view`) for the whole
/// call, so the graph cannot mutate mid-trace. Elements whose nearest
/// [`ExecutionControl`] is not `container` belong to a nested container and
/// are skipped.
pub fn build_schedule(view: &GraphView<'_>, container: ElementHandle) -> Schedule {
    let mut builder = ScheduleBuilder::new(view, container);
    builder.discover();
    builder.classify_by_flooding();
    builder.reclassify_other_tasks();
    builder.build_dependency_graph();
    let (order, first_index) = builder.topological_sort();

    let entries: Vec<ScheduleEntry> = order
        .into_iter()
        .map(|i| ScheduleEntry {
            task: Arc::clone(&builder.nodes[i].task),
            element: builder.nodes[i].element,
            description: view.qualified_name(builder.nodes[i].element),
        })
        .collect();

    debug!(
        container = %view.qualified_name(container),
        tasks = entries.len(),
        initial = first_index[1] - first_index[0],
        sense = first_index[2] - first_index[1],
        control = first_index[3] - first_index[2],
        other = entries.len() - first_index[3],
        "schedule rebuilt"
    );

    Schedule { entries, first_index }
}

// ── Internal scratch state ────────────────────────────────────────────────────

/// Direction of a port-graph traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TraceDirection {
    /// Follow outgoing connections (data flow direction).
    Forward,
    /// Follow incoming connections (against data flow).
    Reverse,
}

/// Which classified interfaces a traversal must not cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbortAt {
    Nothing,
    SensorInterfaces,
    ControllerInterfaces,
    AllClassifiedInterfaces,
}

/// Per-task scratch: the task, its element, classification bits and the
/// dependency edges (indices into the builder's arena).
struct TaskNode {
    task: Arc<PeriodicTask>,
    element: ElementHandle,
    classification: TaskClassification,
    previous: Vec<usize>,
    next: Vec<usize>,
}

struct ScheduleBuilder<'v, 'g> {
    view: &'v GraphView<'g>,
    container: ElementHandle,

    nodes: Vec<TaskNode>,
    /// Annotated element of a task, for direct hits during tracing.
    by_element: HashMap<ElementHandle, usize>,
    /// Outgoing interface of a task, for reverse-trace hits.
    by_outgoing: HashMap<ElementHandle, usize>,

    /// Sensor/controller interfaces in discovery order plus membership sets
    /// (the abort predicate tests membership on the hot path).
    sense_interfaces: Vec<ElementHandle>,
    control_interfaces: Vec<ElementHandle>,
    sense_membership: HashSet<ElementHandle>,
    control_membership: HashSet<ElementHandle>,

    /// Task indices per set, in discovery order.
    sets: [Vec<usize>; 4],
}

impl<'v, 'g> ScheduleBuilder<'v, 'g> {
    fn new(view: &'v GraphView<'g>, container: ElementHandle) -> Self {
        ScheduleBuilder {
            view,
            container,
            nodes: Vec::new(),
            by_element: HashMap::new(),
            by_outgoing: HashMap::new(),
            sense_interfaces: Vec::new(),
            control_interfaces: Vec::new(),
            sense_membership: HashSet::new(),
            control_membership: HashSet::new(),
            sets: [Vec::new(), Vec::new(), Vec::new(), Vec::new()],
        }
    }

    // ── Pass 1: discovery ─────────────────────────────────────────────────────

    fn discover(&mut self) {
        for element in self.view.subtree(self.container) {
            if !self.view.is_ready(element) || !self.managed_here(element) {
                continue;
            }

            let flags = self.view.flags(element);
            if flags.is_interface() {
                if flags.contains(ElementFlags::SENSOR_DATA) {
                    self.add_sense_interface(element);
                }
                if flags.contains(ElementFlags::CONTROLLER_DATA) {
                    self.add_control_interface(element);
                }
            }

            let Some(task) = self.view.annotation::<PeriodicTask>(element) else {
                continue;
            };
            let index = self.nodes.len();
            self.by_element.insert(element, index);
            for &aggregator in task.outgoing() {
                self.by_outgoing.entry(aggregator).or_insert(index);
            }

            let mut classification = TaskClassification::empty();
            let set = if task.is_sense_task(self.view) {
                classification |= TaskClassification::SENSE;
                TaskSet::Sense
            } else if task.is_control_task(self.view) {
                classification |= TaskClassification::CONTROL;
                TaskSet::Control
            } else {
                TaskSet::Other
            };
            self.sets[set.index()].push(index);

            self.nodes.push(TaskNode {
                task,
                element,
                classification,
                previous: Vec::new(),
                next: Vec::new(),
            });
        }

        // The interfaces referenced by already-classified tasks count as
        // sensor/controller interfaces as well, whether flagged or not.
        let sense_seeds = self.referenced_interfaces(TaskSet::Sense);
        for aggregator in sense_seeds {
            self.add_sense_interface(aggregator);
        }
        let control_seeds = self.referenced_interfaces(TaskSet::Control);
        for aggregator in control_seeds {
            self.add_control_interface(aggregator);
        }
    }

    fn referenced_interfaces(&self, set: TaskSet) -> Vec<ElementHandle> {
        self.sets[set.index()]
            .iter()
            .flat_map(|&i| {
                let task = &self.nodes[i].task;
                task.incoming().iter().chain(task.outgoing().iter()).copied()
            })
            .collect()
    }

    fn add_sense_interface(&mut self, aggregator: ElementHandle) {
        if self.sense_membership.insert(aggregator) {
            self.sense_interfaces.push(aggregator);
        }
    }

    fn add_control_interface(&mut self, aggregator: ElementHandle) {
        if self.control_membership.insert(aggregator) {
            self.control_interfaces.push(aggregator);
        }
    }

    // ── Pass 2: classification by flooding ────────────────────────────────────

    fn classify_by_flooding(&mut self) {
        let sense = self.sense_interfaces.clone();
        for &interface in &sense {
            let mut trace = Vec::new();
            self.flood(
                interface,
                TraceDirection::Forward,
                TaskClassification::SENSE_DEPENDENT,
                &mut trace,
            );
            trace.clear();
            self.flood(
                interface,
                TraceDirection::Reverse,
                TaskClassification::SENSE_DEPENDENCY,
                &mut trace,
            );
        }

        let control = self.control_interfaces.clone();
        for &interface in &control {
            let mut trace = Vec::new();
            self.flood(
                interface,
                TraceDirection::Forward,
                TaskClassification::CONTROL_DEPENDENT,
                &mut trace,
            );
            trace.clear();
            self.flood(
                interface,
                TraceDirection::Reverse,
                TaskClassification::CONTROL_DEPENDENCY,
                &mut trace,
            );
        }
    }

    /// Propagate `bit` from `aggregator` in `direction`. Tasks classified
    /// SENSE or CONTROL are never overwritten and end the branch; any other
    /// task absorbs the bit and the flood continues from its
    /// opposite-direction interfaces.
    fn flood(
        &mut self,
        aggregator: ElementHandle,
        direction: TraceDirection,
        bit: TaskClassification,
        trace: &mut Vec<ElementHandle>,
    ) {
        trace.push(aggregator);

        for dest in self.destinations(aggregator, direction) {
            if trace.contains(&dest)
                || !self.view.is_ready(dest)
                || !self.managed_here(dest)
                || self.aborts(dest, AbortAt::AllClassifiedInterfaces)
            {
                continue;
            }

            if let Some(index) = self.task_at(dest, direction) {
                let node = &mut self.nodes[index];
                if node
                    .classification
                    .intersects(TaskClassification::SENSE | TaskClassification::CONTROL)
                    || node.classification.contains(bit)
                {
                    continue;
                }
                node.classification |= bit;

                let continue_from: Vec<ElementHandle> = match direction {
                    TraceDirection::Forward => self.nodes[index].task.outgoing().to_vec(),
                    TraceDirection::Reverse => self.nodes[index].task.incoming().to_vec(),
                };
                for next_aggregator in continue_from {
                    if !trace.contains(&next_aggregator) {
                        self.flood(next_aggregator, direction, bit, trace);
                    }
                }
                continue;
            }

            if self.has_connections(dest, direction) {
                self.flood(dest, direction, bit, trace);
            } else if self.looks_like_module_input(dest) {
                for sibling in self.matching_siblings(dest) {
                    if !trace.contains(&sibling) {
                        self.flood(sibling, direction, bit, trace);
                    }
                }
            }
        }

        trace.pop();
    }

    /// Move `other` tasks into the segment their reachability bits indicate.
    fn reclassify_other_tasks(&mut self) {
        use TaskClassification as C;

        let others = std::mem::take(&mut self.sets[TaskSet::Other.index()]);
        for index in others {
            let c = self.nodes[index].classification;
            let sense_side = c.intersects(C::SENSE_DEPENDENCY | C::SENSE_DEPENDENT);
            let control_side = c.intersects(C::CONTROL_DEPENDENCY | C::CONTROL_DEPENDENT);

            let target = if c.contains(C::SENSE_DEPENDENCY | C::SENSE_DEPENDENT) {
                TaskSet::Sense
            } else if c.contains(C::CONTROL_DEPENDENCY | C::CONTROL_DEPENDENT) {
                TaskSet::Control
            } else if c == (C::SENSE_DEPENDENCY | C::CONTROL_DEPENDENCY) {
                // feeds both sides without depending on either: run first
                TaskSet::Initial
            } else if c.contains(C::SENSE_DEPENDENCY) && c.contains(C::CONTROL_DEPENDENT) {
                TaskSet::Sense
            } else if c.contains(C::SENSE_DEPENDENT) && c.contains(C::CONTROL_DEPENDENCY) {
                TaskSet::Control
            } else if sense_side && !control_side {
                TaskSet::Sense
            } else if control_side && !sense_side {
                TaskSet::Control
            } else {
                TaskSet::Other
            };
            self.sets[target.index()].push(index);
        }
    }

    // ── Pass 3: dependency tracing ────────────────────────────────────────────

    fn build_dependency_graph(&mut self) {
        for set in TaskSet::ALL {
            let abort = Self::abort_for(set);
            let members: Vec<usize> = self.sets[set.index()].clone();
            let membership: HashSet<usize> = members.iter().copied().collect();
            for &task_index in &members {
                let outgoing = self.nodes[task_index].task.outgoing().to_vec();
                for aggregator in outgoing {
                    let mut trace = Vec::new();
                    self.trace_successors(task_index, aggregator, &membership, abort, &mut trace);
                }
            }
        }
    }

    fn abort_for(set: TaskSet) -> AbortAt {
        match set {
            TaskSet::Initial => AbortAt::AllClassifiedInterfaces,
            TaskSet::Sense => AbortAt::ControllerInterfaces,
            TaskSet::Control => AbortAt::SensorInterfaces,
            TaskSet::Other => AbortAt::Nothing,
        }
    }

    /// Trace forward from one of `from`'s outgoing aggregators; record an
    /// edge when another task of the same set is reached.
    fn trace_successors(
        &mut self,
        from: usize,
        aggregator: ElementHandle,
        members: &HashSet<usize>,
        abort: AbortAt,
        trace: &mut Vec<ElementHandle>,
    ) {
        trace.push(aggregator);

        for dest in self.destinations(aggregator, TraceDirection::Forward) {
            if trace.contains(&dest)
                || !self.view.is_ready(dest)
                || !self.managed_here(dest)
                || self.aborts(dest, abort)
            {
                continue;
            }

            if let Some(found) = self.task_at(dest, TraceDirection::Forward) {
                if found != from
                    && members.contains(&found)
                    && !self.nodes[from].next.contains(&found)
                {
                    self.nodes[from].next.push(found);
                    self.nodes[found].previous.push(from);
                }
                continue;
            }

            if self.has_connections(dest, TraceDirection::Forward) {
                self.trace_successors(from, dest, members, abort, trace);
            } else if self.looks_like_module_input(dest) {
                for sibling in self.matching_siblings(dest) {
                    if !trace.contains(&sibling) {
                        self.trace_successors(from, sibling, members, abort, trace);
                    }
                }
            }
        }

        trace.pop();
    }

    // ── Pass 4: topological sort ──────────────────────────────────────────────

    fn topological_sort(&mut self) -> (Vec<usize>, [usize; 4]) {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut first_index = [0usize; 4];

        for set in TaskSet::ALL {
            first_index[set.index()] = order.len();
            let mut remaining = std::mem::take(&mut self.sets[set.index()]);

            while !remaining.is_empty() {
                if let Some(pos) = remaining
                    .iter()
                    .position(|&i| self.nodes[i].previous.is_empty())
                {
                    let index = remaining.remove(pos);
                    self.emit(index, &mut order);
                    continue;
                }

                // Only cycles remain. Trace back along unvisited
                // predecessors; the task whose predecessors were all seen is
                // the break point.
                let (break_point, predecessor, path) = self.find_break_point(remaining[0]);
                warn!(
                    path = %path,
                    predecessor = %self.describe(predecessor),
                    chosen = %self.describe(break_point),
                    "cycle in task graph, breaking schedule loop"
                );
                remaining.retain(|&i| i != break_point);
                self.emit(break_point, &mut order);
            }
        }

        (order, first_index)
    }

    fn emit(&mut self, index: usize, order: &mut Vec<usize>) {
        order.push(index);
        let next = self.nodes[index].next.clone();
        for n in next {
            self.nodes[n].previous.retain(|&p| p != index);
        }
    }

    fn find_break_point(&self, start: usize) -> (usize, usize, String) {
        let mut trace_back = vec![start];
        let mut current = start;
        loop {
            let unseen = self.nodes[current]
                .previous
                .iter()
                .copied()
                .find(|p| !trace_back.contains(p));
            match unseen {
                Some(prev) => {
                    current = prev;
                    trace_back.push(prev);
                }
                None => break,
            }
        }
        let predecessor = if trace_back.len() >= 2 {
            trace_back[trace_back.len() - 2]
        } else {
            current
        };
        let path = trace_back
            .iter()
            .map(|&i| self.describe(i))
            .collect::<Vec<_>>()
            .join(" <- ");
        (current, predecessor, path)
    }

    // ── Shared traversal helpers ──────────────────────────────────────────────

    /// Aggregators reachable from `aggregator` over one hop of port
    /// connections, in connection order, deduplicated.
    fn destinations(&self, aggregator: ElementHandle, direction: TraceDirection) -> Vec<ElementHandle> {
        let mut result = Vec::new();
        for &port in self.view.children(aggregator) {
            if !self.view.flags(port).is_data_port() {
                continue;
            }
            let peers = match direction {
                TraceDirection::Forward => self.view.outgoing(port),
                TraceDirection::Reverse => self.view.incoming(port),
            };
            for &peer in peers {
                if let Some(dest) = self.view.aggregator_of(peer) {
                    if !result.contains(&dest) {
                        result.push(dest);
                    }
                }
            }
        }
        result
    }

    fn has_connections(&self, aggregator: ElementHandle, direction: TraceDirection) -> bool {
        self.view.children(aggregator).iter().any(|&port| {
            self.view.flags(port).is_data_port()
                && !match direction {
                    TraceDirection::Forward => self.view.outgoing(port),
                    TraceDirection::Reverse => self.view.incoming(port),
                }
                .is_empty()
        })
    }

    /// The task a traversal arriving at `dest` should report: the annotation
    /// on `dest` itself, on its parent (plain interfaces), or - in reverse
    /// mode - the task declaring `dest` as one of its outgoing interfaces.
    fn task_at(&self, dest: ElementHandle, direction: TraceDirection) -> Option<usize> {
        if let Some(&index) = self.by_element.get(&dest) {
            return Some(index);
        }
        if self.view.flags(dest).is_interface() {
            if let Some(parent) = self.view.parent(dest) {
                if let Some(&index) = self.by_element.get(&parent) {
                    return Some(index);
                }
            }
            if direction == TraceDirection::Reverse {
                if let Some(&index) = self.by_outgoing.get(&dest) {
                    return Some(index);
                }
            }
        }
        None
    }

    fn managed_here(&self, element: ElementHandle) -> bool {
        ExecutionControl::find(self.view, element)
            .map(|control| control.element() == self.container)
            .unwrap_or(false)
    }

    fn aborts(&self, aggregator: ElementHandle, abort: AbortAt) -> bool {
        match abort {
            AbortAt::Nothing => false,
            AbortAt::SensorInterfaces => self.sense_membership.contains(&aggregator),
            AbortAt::ControllerInterfaces => self.control_membership.contains(&aggregator),
            AbortAt::AllClassifiedInterfaces => {
                self.sense_membership.contains(&aggregator)
                    || self.control_membership.contains(&aggregator)
            }
        }
    }

    /// Heuristic: an aggregator whose data-flow ports are at least 50% pure
    /// inputs looks like the input interface of a module. Event-triggered
    /// modules have no periodic task but still pass data through; traversal
    /// continues on the module's matching sibling interfaces.
    fn looks_like_module_input(&self, aggregator: ElementHandle) -> bool {
        let mut data_ports = 0usize;
        let mut pure_inputs = 0usize;
        for &port in self.view.children(aggregator) {
            let flags = self.view.flags(port);
            if flags.is_data_port() {
                data_ports += 1;
                if flags.is_pure_input() {
                    pure_inputs += 1;
                }
            }
        }
        data_ports > 0 && pure_inputs * 2 >= data_ports
    }

    /// Sibling interfaces of `aggregator`'s parent that are ready
    /// edge-aggregator interfaces and carry the same sensor/controller
    /// data flags as `aggregator`.
    fn matching_siblings(&self, aggregator: ElementHandle) -> Vec<ElementHandle> {
        let Some(parent) = self.view.parent(aggregator) else {
            return Vec::new();
        };
        let data_flags = ElementFlags::SENSOR_DATA | ElementFlags::CONTROLLER_DATA;
        let origin_data = self.view.flags(aggregator) & data_flags;
        let required =
            ElementFlags::READY | ElementFlags::EDGE_AGGREGATOR | ElementFlags::INTERFACE;

        self.view
            .children(parent)
            .iter()
            .copied()
            .filter(|&sibling| {
                sibling != aggregator
                    && self.view.flags(sibling).contains(required)
                    && (self.view.flags(sibling) & data_flags) == origin_data
            })
            .collect()
    }

    fn describe(&self, index: usize) -> String {
        self.view.qualified_name(self.nodes[index].element)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
