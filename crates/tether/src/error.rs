//! Error Module - Tether Error Types
//!
//! Defines the errors surfaced by checked handle access and anchor binding.
//!
//! # Error Categories
//!
//! ## Access Errors
//! - `Empty` - Handle never bound to a block, or cleared
//! - `Dead` - Observed object destroyed (or not yet bound)
//!
//! ## Contract Violations
//! - `NotEmbedded` - Owner does not physically contain the anchor
//! - `AlreadyBound` - Anchor bound to a different address before
//!
//! A failed `downcast` is not an error: it yields an empty handle.

use thiserror::Error;

/// Main error type for all tether operations
///
/// # Examples
///
/// ```rust
/// use tether::{TetherError, Weak};
///
/// let handle: Weak<u32> = Weak::new();
/// match handle.try_borrow() {
///     Err(TetherError::Empty) => {}
///     other => panic!("unexpected: {:?}", other.map(|v| *v)),
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TetherError {
    /// Handle holds no block reference
    ///
    /// **When returned:** Access through a default-constructed, cleared, or
    /// failed-downcast handle
    ///
    /// **Recovery strategy:** Treat as "nothing to observe"
    #[error("handle is empty")]
    Empty,

    /// Observed object is gone
    ///
    /// **When returned:** Access after the owner dropped the object, or
    /// through a handle issued before the owner was bound
    ///
    /// **Recovery strategy:** Drop the handle; the object will not return
    #[error("observed {type_name} is no longer alive")]
    Dead { type_name: &'static str },

    /// Owner does not contain the anchor
    ///
    /// **When returned:** Binding or same-object re-typing with an owner
    /// whose memory does not enclose the anchor
    ///
    /// **Recovery strategy:** Cannot recover - caller bug
    #[error("anchor at {anchor:#x} is not embedded in owner at {owner:#x} ({owner_size} bytes)")]
    NotEmbedded {
        anchor: usize,
        owner: usize,
        owner_size: usize,
    },

    /// Anchor already bound elsewhere
    ///
    /// **When returned:** Binding an anchor whose block already records a
    /// different object address
    ///
    /// **Recovery strategy:** Cannot recover - caller bug
    #[error("anchor already bound to {bound:#x}, refusing to rebind to {requested:#x}")]
    AlreadyBound { bound: usize, requested: usize },
}

impl TetherError {
    /// Check if this error is an expected outcome of observation
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TetherError::Empty | TetherError::Dead { .. })
    }

    /// Check if this error indicates a broken caller contract
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            TetherError::NotEmbedded { .. } | TetherError::AlreadyBound { .. }
        )
    }
}

/// Result type alias for tether operations
pub type Result<T> = std::result::Result<T, TetherError>;
