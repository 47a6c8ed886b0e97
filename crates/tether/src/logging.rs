//! Lifecycle Logging
//!
//! Block and handle lifecycle events, routed through the `log` facade under
//! the `tether` target. Nothing is emitted unless [`TetherConfig::verbose`]
//! is set; handle-level events additionally need `trace_handles`.
//!
//! Log Levels:
//! - ERROR: Owner dropped while its object was being accessed
//! - DEBUG: Block created, bound, invalidated, freed
//! - TRACE: Handle acquire/release, rejected downcasts
//!
//! [`TetherConfig::verbose`]: crate::TetherConfig::verbose

use std::fmt;

use log::Level;
use serde::Serialize;

use crate::config;

/// Log target for every event emitted by this crate
pub const LOG_TARGET: &str = "tether";

/// Lifecycle event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Anchor allocated a fresh block
    BlockCreated { block: u64 },

    /// Block recorded the address of a pinned object
    Bound {
        block: u64,
        type_name: &'static str,
        address: usize,
    },

    /// Anchor dropped, block object pointer cleared
    Invalidated { block: u64, observers: usize },

    /// Last reference gone, block memory released
    BlockFreed { block: u64 },

    /// Object destroyed while an access guard was alive
    DestroyedWhileBorrowed { block: u64, borrows: usize },

    /// Runtime type test failed in `downcast`
    DowncastRejected {
        block: u64,
        expected: &'static str,
        actual: &'static str,
    },

    /// Handle acquired a block reference
    HandleAcquired { block: u64, observers: usize },

    /// Handle released a block reference
    HandleReleased { block: u64, observers: usize },
}

impl LifecycleEvent {
    /// Log level for this event
    pub fn level(&self) -> Level {
        match self {
            LifecycleEvent::DestroyedWhileBorrowed { .. } => Level::Error,
            LifecycleEvent::BlockCreated { .. }
            | LifecycleEvent::Bound { .. }
            | LifecycleEvent::Invalidated { .. }
            | LifecycleEvent::BlockFreed { .. } => Level::Debug,
            LifecycleEvent::DowncastRejected { .. }
            | LifecycleEvent::HandleAcquired { .. }
            | LifecycleEvent::HandleReleased { .. } => Level::Trace,
        }
    }

    /// Whether this is a per-handle event
    pub fn is_handle_event(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::HandleAcquired { .. } | LifecycleEvent::HandleReleased { .. }
        )
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::BlockCreated { block } => write!(f, "block #{} created", block),
            LifecycleEvent::Bound {
                block,
                type_name,
                address,
            } => write!(f, "block #{} bound to {} at {:#x}", block, type_name, address),
            LifecycleEvent::Invalidated { block, observers } => write!(
                f,
                "block #{} invalidated ({} observers outstanding)",
                block, observers
            ),
            LifecycleEvent::BlockFreed { block } => write!(f, "block #{} freed", block),
            LifecycleEvent::DestroyedWhileBorrowed { block, borrows } => write!(
                f,
                "block #{}: object destroyed with {} live access guard(s)",
                block, borrows
            ),
            LifecycleEvent::DowncastRejected {
                block,
                expected,
                actual,
            } => write!(
                f,
                "block #{}: downcast to {} rejected, object is {}",
                block, expected, actual
            ),
            LifecycleEvent::HandleAcquired { block, observers } => {
                write!(f, "block #{}: handle acquired ({} observers)", block, observers)
            },
            LifecycleEvent::HandleReleased { block, observers } => {
                write!(f, "block #{}: handle released ({} observers)", block, observers)
            },
        }
    }
}

/// Log a lifecycle event according to the current configuration
///
/// Errors are always emitted; everything else needs `verbose`.
pub fn log_event(event: LifecycleEvent) {
    let config::Flags {
        verbose,
        handles,
        json,
        ..
    } = config::flags();

    let level = event.level();
    if level != Level::Error && !verbose {
        return;
    }
    if event.is_handle_event() && !handles {
        return;
    }
    if !log::log_enabled!(target: LOG_TARGET, level) {
        return;
    }

    if json {
        match serde_json::to_string(&event) {
            Ok(line) => log::log!(target: LOG_TARGET, level, "{}", line),
            Err(_) => log::log!(target: LOG_TARGET, level, "{}", event),
        }
    } else {
        log::log!(target: LOG_TARGET, level, "{}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_levels() {
        assert_eq!(
            LifecycleEvent::DestroyedWhileBorrowed { block: 1, borrows: 1 }.level(),
            Level::Error
        );
        assert_eq!(LifecycleEvent::BlockFreed { block: 1 }.level(), Level::Debug);
        assert_eq!(
            LifecycleEvent::HandleAcquired {
                block: 1,
                observers: 2
            }
            .level(),
            Level::Trace
        );
    }

    #[test]
    fn test_json_shape() {
        let event = LifecycleEvent::Invalidated {
            block: 7,
            observers: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "invalidated");
        assert_eq!(json["block"], 7);
        assert_eq!(json["observers"], 3);
    }

    #[test]
    fn test_human_format() {
        let event = LifecycleEvent::DowncastRejected {
            block: 4,
            expected: "Circle",
            actual: "Square",
        };
        assert_eq!(
            event.to_string(),
            "block #4: downcast to Circle rejected, object is Square"
        );
    }

    #[test]
    fn test_log_event_without_logger_is_noop() {
        log_event(LifecycleEvent::BlockCreated { block: 1 });
    }
}
