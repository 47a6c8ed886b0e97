//! # Tether - Non-owning Observer Handles
//!
//! Tether lets any number of parties hold a reference to an object they do
//! not own, ask whether it is still alive, and stop using it the moment its
//! owner drops it. Observers never extend the object's lifetime: it keeps a
//! single owner, and its destruction timing stays entirely with that owner.
//!
//! ## Overview
//!
//! Three pieces cooperate:
//!
//! - **Anchor** ([`Anchor<T>`]): a field inside the observed object. It
//!   creates the indirection block, hands out handles, and clears the block
//!   when the object is dropped.
//! - **Indirection block**: a small shared record holding the object's
//!   type-erased address and the number of live handles. It outlives the
//!   object for as long as handles reference it.
//! - **Handle** ([`Weak<T>`]): a cheap, clonable observer. Checks liveness,
//!   borrows the object through an [`Observed`] guard, and re-types along
//!   declared base/derived relations ([`Upcast`]).
//!
//! ```text
//!   owner (Pin<Box<Widget>>)                      observers
//!  ┌──────────────────────────┐
//!  │ anchor: Anchor<Widget> ──┼──┐        ┌──── Weak<Widget>
//!  │ ...                      │  ▼        ▼
//!  └──────────────────────────┘ ┌─────────────────┐
//!                               │ block           │◄─── Weak<dyn Shape>
//!                               │  object: *const │
//!                               │  observers: 3   │◄─── Weak<Widget>
//!                               └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::cell::Cell;
//! use tether::{anchored, upcast, Anchor, Anchored, Weak};
//!
//! trait Shape {
//!     fn area(&self) -> f64;
//! }
//!
//! struct Circle {
//!     anchor: Anchor<Circle>,
//!     radius: Cell<f64>,
//! }
//!
//! impl Shape for Circle {
//!     fn area(&self) -> f64 {
//!         3.0 * self.radius.get() * self.radius.get()
//!     }
//! }
//!
//! anchored!(Circle, anchor);
//! upcast!(Circle => dyn Shape);
//!
//! let circle = tether::pin_box(Circle {
//!     anchor: Anchor::new(),
//!     radius: Cell::new(1.0),
//! })?;
//!
//! let exact: Weak<Circle> = circle.weak();
//! let shape: Weak<dyn Shape> = exact.upcast();
//! assert_eq!(shape.borrow().area(), 3.0);
//!
//! // Back down, checked against the live object
//! let again = shape.downcast::<Circle>();
//! assert_eq!(again.addr(), exact.addr());
//!
//! drop(circle);
//! assert!(shape.is_null() && again.is_null());
//! # Ok::<(), tether::TetherError>(())
//! ```
//!
//! ## Binding
//!
//! An anchor learns its owner's address when the owner is pinned and bound
//! ([`bind`], or [`pin_box`] for the common boxed case). Handles obtained
//! before that are counted but never observe anything.
//!
//! ## Safety
//!
//! Handles reach the object through a raw address. The crate keeps that
//! sound by combining:
//!
//! 1. **Pinning**: [`Anchor`] is `!Unpin`, so a bound owner cannot move.
//! 2. **Invalidation on drop**: the anchor clears the block before the rest of
//!    the owner is torn down, as long as it is declared first.
//! 3. **Scoped access**: every dereference goes through an [`Observed`]
//!    guard. Dropping the owner while a guard is alive aborts the process.
//! 4. **The [`Anchored`] contract**: implementors promise inline storage,
//!    declaration order, no `Drop` impl on the owner, and no mutable
//!    access while pinned. The declaration macros check `!Unpin` and
//!    `!Drop` at compile time.
//!
//! ### Thread Safety
//!
//! - [`Weak`] and [`Anchor`] are `!Send + !Sync`: one thread owns the object
//!   and all its observers.
//! - The [`sync`] module provides `Send + Sync` variants where the owner's
//!   drop waits for outstanding guards.
//!
//! ## Modules
//!
//! - [`anchor`]: Anchors, binding, and the [`Anchored`] contract
//! - [`weak`]: Observer handles and access guards
//! - [`cast`]: The static up/down-cast relation
//! - [`sync`]: Thread-safe variants
//! - [`config`]: Diagnostics configuration
//! - [`error`]: Error types
//! - [`logging`]: Lifecycle events over the `log` facade
//! - [`stats`]: Per-thread lifecycle counters

mod block;

pub mod anchor;
pub mod cast;
pub mod config;
pub mod error;
pub mod logging;
pub mod stats;
pub mod sync;
pub mod weak;

pub use anchor::{bind, pin_box, Anchor, Anchored, ViewSet};
pub use cast::Upcast;
pub use config::{configure, TetherConfig};
pub use error::{Result, TetherError};
pub use weak::{Observed, Weak};

/// Tether version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[doc(hidden)]
pub mod __private {
    pub use static_assertions;
}

static_assertions::assert_not_impl_any!(Weak<u32>: Send, Sync);
static_assertions::assert_not_impl_any!(Anchor<u32>: Send, Sync);
static_assertions::assert_not_impl_any!(Anchor<u32>: Unpin);
static_assertions::assert_impl_all!(sync::Weak<u32>: Send, Sync, Clone);
static_assertions::assert_impl_all!(sync::Anchor<u32>: Send, Sync);
static_assertions::assert_not_impl_any!(sync::Weak<std::cell::Cell<u32>>: Send, Sync);
