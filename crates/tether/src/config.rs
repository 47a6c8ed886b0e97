//! Configuration Module - Diagnostics Parameters
//!
//! Observation itself has no tunables; configuration only controls how much
//! the crate reports about block and handle lifecycles.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Process-wide tether configuration
///
/// # Examples
///
/// ```rust
/// use tether::TetherConfig;
///
/// tether::configure(TetherConfig {
///     verbose: true,
///     ..Default::default()
/// });
/// assert!(tether::config::current().verbose);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TetherConfig {
    /// Log block lifecycle events (create, bind, invalidate, free)
    ///
    /// Default: false
    pub verbose: bool,

    /// Also log every handle acquire and release
    ///
    /// Very noisy. Only honoured when `verbose` is set.
    /// Default: false
    pub trace_handles: bool,

    /// Emit events as JSON objects instead of text
    ///
    /// Default: false
    pub json: bool,

    /// Maintain per-thread lifecycle counters (see [`crate::stats`])
    ///
    /// Default: true
    pub stats_enabled: bool,
}

impl Default for TetherConfig {
    fn default() -> Self {
        TetherConfig {
            verbose: false,
            trace_handles: false,
            json: false,
            stats_enabled: true,
        }
    }
}

impl TetherConfig {
    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - TETHER_VERBOSE
    /// - TETHER_TRACE_HANDLES
    /// - TETHER_LOG_JSON
    /// - TETHER_STATS
    ///
    /// Values `1` and `true` (any case) enable a flag, anything else
    /// disables it. Unset variables keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(flag) = env_flag("TETHER_VERBOSE") {
            config.verbose = flag;
        }
        if let Some(flag) = env_flag("TETHER_TRACE_HANDLES") {
            config.trace_handles = flag;
        }
        if let Some(flag) = env_flag("TETHER_LOG_JSON") {
            config.json = flag;
        }
        if let Some(flag) = env_flag("TETHER_STATS") {
            config.stats_enabled = flag;
        }

        config
    }

    /// Whether handle-level events should be emitted
    pub fn handle_tracing(&self) -> bool {
        self.verbose && self.trace_handles
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|val| val == "1" || val.eq_ignore_ascii_case("true"))
}

lazy_static::lazy_static! {
    /// Seeded from the environment on first use
    static ref GLOBAL_CONFIG: RwLock<TetherConfig> = RwLock::new(TetherConfig::from_env());
}

/// Bumped on every `configure`, so threads know their cached flags are stale
static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Flags consulted on every handle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Flags {
    pub(crate) verbose: bool,
    pub(crate) handles: bool,
    pub(crate) json: bool,
    pub(crate) stats: bool,
}

impl From<&TetherConfig> for Flags {
    fn from(config: &TetherConfig) -> Self {
        Flags {
            verbose: config.verbose,
            handles: config.handle_tracing(),
            json: config.json,
            stats: config.stats_enabled,
        }
    }
}

thread_local! {
    static CACHED: Cell<Option<(u64, Flags)>> = const { Cell::new(None) };
}

/// Replace the process-wide configuration
pub fn configure(config: TetherConfig) {
    *GLOBAL_CONFIG.write() = config;
    GENERATION.fetch_add(1, Ordering::Release);
}

/// Snapshot of the process-wide configuration
pub fn current() -> TetherConfig {
    GLOBAL_CONFIG.read().clone()
}

/// This thread's view of the hot-path flags
///
/// Takes the global lock only after a `configure` since the last call.
pub(crate) fn flags() -> Flags {
    let generation = GENERATION.load(Ordering::Acquire);
    CACHED.with(|cached| match cached.get() {
        Some((seen, flags)) if seen == generation => flags,
        _ => {
            let flags = Flags::from(&*GLOBAL_CONFIG.read());
            cached.set(Some((generation, flags)));
            flags
        },
    })
}
