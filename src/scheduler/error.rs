/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the scheduling core.
//!
//! Most runtime conditions are deliberately *not* errors: the cycle loop is
//! resilient by design and never propagates a failure out of its callback.
//! They are logged instead:
//!
//! | Condition | Handling |
//! |---|---|
//! | `start()` while a worker exists | `warn!`, no-op |
//! | Cycle graph loop | `warn!` with the chosen break point, edge broken |
//! | Cycle time exceeded | `warn!` iff configured |
//! | Watchdog deadline expired | `error!` naming the stuck task, watchdog deactivates |
//! | Element owned by a nested container | silently skipped during discovery |
//!
//! The variants below cover the remaining cases where a caller made a
//! request that cannot be honored and must find out programmatically.
//!
//! **Do not** replace these with `anyhow::Error` - the structured variants
//! are intentional.

use thiserror::Error;

/// Errors returned from the container control surface.
#[derive(Debug, Error)]
pub enum SchedulingError {
    /// `execute_cycle()` was called while the container's worker thread is
    /// live. Manual cycles are a test facility and are only valid on a
    /// paused container.
    #[error("container '{container}' has a live worker thread - manual cycles require a paused container")]
    WorkerActive { container: String },
}
