//! Structural-change notification.
//!
//! The runtime notifies registered listeners after every graph mutation:
//! element creation and flag changes, port connector changes, and URI
//! connector changes. Callbacks run on the mutating thread *after* the
//! structural write lock has been released, so a listener may take the read
//! lock itself. Listeners in this crate only set an atomic flag; anything
//! heavier belongs on the listener's own thread.

use super::element::ElementHandle;

/// Kind of structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureEvent {
    /// Element or connector came into existence.
    Added,
    /// Flags or wiring of an existing element changed.
    Changed,
    /// Element or connector was removed.
    Removed,
}

/// Receiver of runtime structural changes.
///
/// All callbacks have empty default bodies; implementors override the ones
/// they care about.
pub trait RuntimeListener: Send + Sync {
    /// An element was added, changed or removed.
    fn on_element_change(&self, _event: StructureEvent, _element: ElementHandle) {}

    /// A port connector between `source` and `target` was added or removed.
    fn on_connector_change(
        &self,
        _event: StructureEvent,
        _source: ElementHandle,
        _target: ElementHandle,
    ) {
    }

    /// A URI connector changed. Observed by the scheduler but ignored.
    fn on_uri_connector_change(&self, _event: StructureEvent, _element: ElementHandle) {}
}
