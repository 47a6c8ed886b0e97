//! Indirection Block
//!
//! The shared record between an anchored object and its observers. It holds
//! the object's type-erased views recorded at bind time (gone once the object
//! is) and the number of live observer handles. A view pairs a type tag with
//! an address, one for the object itself and one per embedded base, which is
//! what `downcast` checks against.
//!
//! The block is reference counted through `Rc`: every handle and the anchor
//! each hold one reference, and the memory goes away with the last of them.
//! Only handles are counted as observers.

use std::any::{type_name, TypeId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, TetherError};
use crate::logging::{log_event, LifecycleEvent};
use crate::stats::{self, Counter};

static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique block id
pub(crate) fn next_block_id() -> u64 {
    NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Type tag and address of one way of looking at a bound object
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct View {
    pub(crate) ptr: NonNull<()>,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
}

impl View {
    pub(crate) fn of<T: 'static>(ptr: NonNull<T>) -> Self {
        View {
            ptr: ptr.cast(),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    pub(crate) fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Typed address if the tag matches `T`
    pub(crate) fn typed<T: 'static>(&self) -> Option<NonNull<T>> {
        (self.type_id == TypeId::of::<T>()).then(|| self.ptr.cast())
    }
}

/// Every type a bound object can be downcast to
///
/// The root is the object itself; the rest are bases embedded in it, each
/// at its own address.
#[derive(Clone)]
pub(crate) struct Views {
    root: View,
    bases: Vec<View>,
}

impl Views {
    pub(crate) fn new(root: View) -> Self {
        Views {
            root,
            bases: Vec::new(),
        }
    }

    pub(crate) fn root(&self) -> View {
        self.root
    }

    /// Record another view; a type already present keeps its first address
    pub(crate) fn push(&mut self, view: View) {
        let known = self.root.type_id == view.type_id
            || self.bases.iter().any(|base| base.type_id == view.type_id);
        if !known {
            self.bases.push(view);
        }
    }

    pub(crate) fn typed<T: 'static>(&self) -> Option<NonNull<T>> {
        self.root
            .typed::<T>()
            .or_else(|| self.bases.iter().find_map(View::typed::<T>))
    }
}

/// Shared liveness record for one anchored object
pub(crate) struct Block {
    id: u64,
    object: RefCell<Option<Views>>,
    /// Last bound type, kept after invalidation for diagnostics
    type_name: Cell<&'static str>,
    observers: Cell<usize>,
    borrows: Cell<usize>,
}

impl Block {
    pub(crate) fn new() -> Rc<Block> {
        let block = Block {
            id: next_block_id(),
            object: RefCell::new(None),
            type_name: Cell::new("<unbound>"),
            observers: Cell::new(0),
            borrows: Cell::new(0),
        };
        stats::record(Counter::BlockCreated);
        log_event(LifecycleEvent::BlockCreated { block: block.id });
        Rc::new(block)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Record the views of the object this block tracks
    pub(crate) fn bind(&self, views: Views) -> Result<()> {
        let root = views.root();
        let current = self.object.borrow().as_ref().map(Views::root);
        if let Some(bound) = current {
            if bound == root {
                return Ok(());
            }
            return Err(TetherError::AlreadyBound {
                bound: bound.addr(),
                requested: root.addr(),
            });
        }

        *self.object.borrow_mut() = Some(views);
        self.type_name.set(root.type_name);
        log_event(LifecycleEvent::Bound {
            block: self.id,
            type_name: root.type_name,
            address: root.addr(),
        });
        Ok(())
    }

    pub(crate) fn increment(&self) {
        let observers = self.observers.get() + 1;
        self.observers.set(observers);
        stats::record(Counter::HandleAcquired);
        log_event(LifecycleEvent::HandleAcquired {
            block: self.id,
            observers,
        });
    }

    /// Drop one observer reference held in `slot`
    ///
    /// Empty slots are a no-op, so releasing twice is harmless. The slot is
    /// always left empty; the block is freed here if this was its last
    /// reference.
    pub(crate) fn release(slot: &mut Option<Rc<Block>>) {
        let Some(block) = slot.take() else {
            return;
        };

        let observers = block.observers.get();
        debug_assert!(observers > 0, "block #{} released with no observers", block.id);
        let observers = observers.saturating_sub(1);
        block.observers.set(observers);
        stats::record(Counter::HandleReleased);
        log_event(LifecycleEvent::HandleReleased {
            block: block.id,
            observers,
        });
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.object.borrow().is_some()
    }

    /// Address of the `T` view, only if alive and `T` is one of its views
    pub(crate) fn typed<T: 'static>(&self) -> Option<NonNull<T>> {
        self.object.borrow().as_ref().and_then(Views::typed::<T>)
    }

    pub(crate) fn type_name(&self) -> &'static str {
        self.type_name.get()
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.observers.get()
    }

    pub(crate) fn borrows(&self) -> usize {
        self.borrows.get()
    }

    pub(crate) fn begin_borrow(&self) {
        self.borrows.set(self.borrows.get() + 1);
    }

    pub(crate) fn end_borrow(&self) {
        let borrows = self.borrows.get();
        debug_assert!(borrows > 0, "block #{} ended a borrow it never began", self.id);
        self.borrows.set(borrows.saturating_sub(1));
    }

    /// Mark the object as destroyed. Called once, from the anchor's drop.
    pub(crate) fn invalidate(&self) {
        let cleared = self.object.borrow_mut().take();
        if cleared.is_some() {
            stats::record(Counter::Invalidated);
            log_event(LifecycleEvent::Invalidated {
                block: self.id,
                observers: self.observers.get(),
            });
        }
    }

    pub(crate) fn dead_error(&self) -> TetherError {
        TetherError::Dead {
            type_name: self.type_name(),
        }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        stats::record(Counter::BlockFreed);
        log_event(LifecycleEvent::BlockFreed { block: self.id });
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .field("type", &self.type_name())
            .field("observers", &self.observers.get())
            .finish()
    }
}
