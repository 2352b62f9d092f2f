//! Scheduling configuration: the process-wide profiling switch and
//! per-container static parameters.
//!
//! Containers recognize three named parameters, loaded either
//! programmatically or from a YAML file:
//! ```yaml
//! containers:
//!   MainLoop:
//!     Realtime Thread: true
//!     Cycle Time: 10          # milliseconds
//!     Warn on cycle time exceed: true
//!   Diagnostics:
//!     Cycle Time: 500
//! ```
//! Missing fields fall back to their defaults (40 ms cycle, non-realtime,
//! warn enabled). Cycle times are bounded to 0..=60 s; out-of-bounds values
//! are rejected at load time, never at cycle time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

// ── Process-wide profiling switch ─────────────────────────────────────────────

static PROFILING_ENABLED: AtomicBool = AtomicBool::new(false);

/// Is task profiling enabled? Defaults to `false`.
pub fn is_profiling_enabled() -> bool {
    PROFILING_ENABLED.load(Ordering::SeqCst)
}

/// Enable or disable task profiling.
///
/// Containers snapshot this flag when they are constructed: enabling
/// profiling creates the additional `"Details"` output port on containers
/// created afterwards. Set it before building the application graph;
/// changes never affect already-constructed containers.
pub fn set_profiling_enabled(enabled: bool) {
    PROFILING_ENABLED.store(enabled, Ordering::SeqCst);
}

// ── Defaults and bounds ───────────────────────────────────────────────────────

/// Default thread cycle time.
pub const DEFAULT_CYCLE_TIME: Duration = Duration::from_millis(40);

/// Upper bound on the thread cycle time.
pub const MAX_CYCLE_TIME: Duration = Duration::from_secs(60);

// ── Errors ────────────────────────────────────────────────────────────────────

/// Parameter validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A cycle time outside 0..=[`MAX_CYCLE_TIME`] was requested.
    #[error("cycle time {requested:?} is outside the accepted range 0..={max:?}")]
    CycleTimeOutOfBounds {
        requested: Duration,
        max: Duration,
    },
}

/// Check a cycle time against the accepted bounds.
pub fn validate_cycle_time(period: Duration) -> Result<(), ConfigError> {
    if period > MAX_CYCLE_TIME {
        return Err(ConfigError::CycleTimeOutOfBounds {
            requested: period,
            max: MAX_CYCLE_TIME,
        });
    }
    Ok(())
}

// ── ContainerParams ───────────────────────────────────────────────────────────

/// Static parameters of one thread container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerParams {
    /// Thread cycle time. Bounded to 0..=[`MAX_CYCLE_TIME`].
    pub cycle_time: Duration,
    /// Request real-time scheduling policy for the worker thread.
    pub realtime: bool,
    /// Emit a warning when a cycle exceeds its budget.
    pub warn_on_cycle_time_exceed: bool,
}

impl Default for ContainerParams {
    fn default() -> Self {
        ContainerParams {
            cycle_time: DEFAULT_CYCLE_TIME,
            realtime: false,
            warn_on_cycle_time_exceed: true,
        }
    }
}

impl ContainerParams {
    /// Default parameters with a specific cycle time.
    pub fn with_cycle_time(cycle_time: Duration) -> Result<Self, ConfigError> {
        validate_cycle_time(cycle_time)?;
        Ok(ContainerParams {
            cycle_time,
            ..Default::default()
        })
    }

    /// Validate all bounded fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_cycle_time(self.cycle_time)
    }
}

// ── YAML deserialization types ────────────────────────────────────────────────

/// Top-level wrapper mapping directly onto the YAML file layout. Kept
/// private; callers work with [`ContainerParams`] / [`ContainerParamsManager`].
#[derive(Debug, Deserialize)]
struct ContainerParamsFile {
    containers: HashMap<String, ContainerParamsEntry>,
}

/// Per-container fields as they appear in the YAML file. Every field is
/// optional so partial configurations are accepted gracefully.
#[derive(Debug, Deserialize)]
struct ContainerParamsEntry {
    #[serde(rename = "Realtime Thread")]
    realtime: Option<bool>,
    /// Cycle time in milliseconds.
    #[serde(rename = "Cycle Time")]
    cycle_time_ms: Option<u64>,
    #[serde(rename = "Warn on cycle time exceed")]
    warn_on_cycle_time_exceed: Option<bool>,
}

// ── ContainerParamsManager ────────────────────────────────────────────────────

/// Loads and hands out per-container parameters from a YAML file.
#[derive(Debug, Default)]
pub struct ContainerParamsManager {
    /// Map of container name to its parameters.
    params: HashMap<String, ContainerParams>,

    /// Set to `true` after a successful [`load_from_file`](Self::load_from_file).
    loaded: bool,
}

impl ContainerParamsManager {
    /// Creates a new, empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `path` and populates the internal parameter map.
    ///
    /// Calling this a second time replaces all previously loaded entries.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the YAML is
    /// structurally invalid, or any entry carries an out-of-bounds cycle
    /// time.
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading container parameters from: {}", path.display());

        self.params.clear();
        self.loaded = false;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open parameter file: {}", path.display()))?;

        let file: ContainerParamsFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        for (name, entry) in file.containers {
            let defaults = ContainerParams::default();
            let params = ContainerParams {
                cycle_time: entry
                    .cycle_time_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.cycle_time),
                realtime: entry.realtime.unwrap_or(defaults.realtime),
                warn_on_cycle_time_exceed: entry
                    .warn_on_cycle_time_exceed
                    .unwrap_or(defaults.warn_on_cycle_time_exceed),
            };
            params
                .validate()
                .with_context(|| format!("Invalid parameters for container '{name}'"))?;

            debug!(
                container = %name,
                cycle_time_ms = params.cycle_time.as_millis() as u64,
                realtime = params.realtime,
                "  container parameters"
            );
            self.params.insert(name, params);
        }

        if self.params.is_empty() {
            warn!("No containers found in parameter file, defaults apply to all containers");
        }

        self.loaded = true;
        info!(
            "Successfully loaded parameters for {} container(s)",
            self.params.len()
        );

        Ok(())
    }

    /// Parameters for `name`, or `None` if the file carried no entry.
    pub fn get(&self, name: &str) -> Option<&ContainerParams> {
        self.params.get(name)
    }

    /// Parameters for `name`, falling back to the defaults.
    pub fn get_or_default(&self, name: &str) -> ContainerParams {
        self.params.get(name).cloned().unwrap_or_default()
    }

    /// Returns `true` after a successful [`load_from_file`](Self::load_from_file).
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

/// Serializes tests touching the process-wide profiling flag; tests run in
/// parallel and the flag is global.
#[cfg(test)]
pub(crate) static PROFILING_TEST_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

// ── Tests ─────────────────────────────────────────────────────────────────────
