//! Observer Handles
//!
//! [`Weak<T>`] is a non-owning reference to an object that embeds an
//! [`Anchor`](crate::Anchor). Handles never keep the object alive: once the
//! owner drops it, every handle to it turns null. Access goes through an
//! [`Observed`] guard, which pins down the object's liveness for as long as
//! the borrow lasts.
//!
//! A handle moves through these states:
//!
//! ```text
//! Empty ──► Bound(alive) ──► Bound(dead) ──► Empty
//!                 │  anchor dropped  ▲          ▲
//!                 └──────────────────┴── clear / drop / overwrite
//! ```

use std::any::{type_name, Any};
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::block::Block;
use crate::cast::Upcast;
use crate::error::{Result, TetherError};
use crate::logging::{log_event, LifecycleEvent};
use crate::stats::{self, Counter};

/// Non-owning observer handle
///
/// Cloning is cheap and bumps the block's observer count; dropping or
/// [`clear`](Weak::clear)ing gives the increment back.
///
/// # Examples
///
/// ```rust
/// use tether::{anchored, Anchor, Weak};
///
/// struct Sensor {
///     anchor: Anchor<Sensor>,
///     reading: u32,
/// }
///
/// anchored!(Sensor, anchor);
///
/// let sensor = tether::pin_box(Sensor {
///     anchor: Anchor::new(),
///     reading: 42,
/// })?;
///
/// let handle: Weak<Sensor> = sensor.anchor.weak();
/// assert_eq!(handle.borrow().reading, 42);
///
/// drop(sensor);
/// assert!(handle.is_null());
/// # Ok::<(), tether::TetherError>(())
/// ```
pub struct Weak<T: ?Sized + 'static> {
    block: Option<Rc<Block>>,
    /// `T` view of the object; `None` if issued while the block was dead
    ptr: Option<NonNull<T>>,
}

impl<T: ?Sized + 'static> Weak<T> {
    /// Create an empty handle
    pub const fn new() -> Self {
        Weak {
            block: None,
            ptr: None,
        }
    }

    /// Attach to `block`, taking one observer increment
    ///
    /// The typed address is dropped when the block is not alive, so a handle
    /// issued before binding cannot later observe a moved object.
    pub(crate) fn from_block(block: &Rc<Block>, ptr: Option<NonNull<T>>) -> Self {
        block.increment();
        Weak {
            ptr: ptr.filter(|_| block.is_alive()),
            block: Some(Rc::clone(block)),
        }
    }

    /// Release the block reference; the handle becomes empty
    pub fn clear(&mut self) {
        Block::release(&mut self.block);
        self.ptr = None;
    }

    /// True if empty, or the observed object is gone
    pub fn is_null(&self) -> bool {
        self.live_block().is_none()
    }

    /// Whether this handle references a block at all, alive or not
    pub fn is_bound(&self) -> bool {
        self.block.is_some()
    }

    /// Borrow the object if it is alive
    ///
    /// Never panics.
    pub fn get(&self) -> Option<Observed<'_, T>> {
        self.try_borrow().ok()
    }

    /// Borrow the object, reporting why it is unavailable
    pub fn try_borrow(&self) -> Result<Observed<'_, T>> {
        let block = self.block.as_deref().ok_or(TetherError::Empty)?;
        match self.ptr {
            Some(ptr) if block.is_alive() => Ok(Observed::new(block, ptr)),
            _ => Err(block.dead_error()),
        }
    }

    /// Borrow the object
    ///
    /// # Panics
    ///
    /// Panics if the handle is null. Use [`get`](Weak::get) or
    /// [`try_borrow`](Weak::try_borrow) when that is an expected outcome.
    #[track_caller]
    pub fn borrow(&self) -> Observed<'_, T> {
        match self.try_borrow() {
            Ok(observed) => observed,
            Err(err) => panic!("dereferenced a null handle: {}", err),
        }
    }

    /// Address of the `T` view if alive
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.live_block().and(self.ptr)
    }

    /// Thin address of the `T` view if alive
    ///
    /// For identity checks across handles of different types.
    pub fn addr(&self) -> Option<usize> {
        self.as_ptr().map(|ptr| ptr.cast::<()>().as_ptr() as usize)
    }

    /// Number of live handles sharing this handle's block
    pub fn ref_count(&self) -> usize {
        self.block.as_ref().map_or(0, |block| block.ref_count())
    }

    /// Whether both handles reference the same block
    pub fn same_block<U: ?Sized>(&self, other: &Weak<U>) -> bool {
        match (&self.block, &other.block) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Re-type to a base view
    ///
    /// The relation is checked at compile time, so this never fails. The
    /// result shares the block even when the object is already gone.
    pub fn upcast<B: ?Sized + 'static>(&self) -> Weak<B>
    where
        T: Upcast<B>,
    {
        match &self.block {
            Some(block) => {
                let ptr = self.as_ptr().map(<T as Upcast<B>>::upcast_ptr);
                Weak::from_block(block, ptr)
            },
            None => Weak::new(),
        }
    }

    /// Re-type to a derived type, checked against the live object
    ///
    /// Succeeds if the object is alive and `D` is one of its recorded views:
    /// the bound type itself, the type owning its anchor, or a base listed
    /// in [`Anchored::views`](crate::Anchored::views). Otherwise returns an
    /// empty handle; the source handle and the observer count are left
    /// alone. A dead object is never inspected.
    pub fn downcast<D>(&self) -> Weak<D>
    where
        D: Upcast<T> + Any,
    {
        let Some(block) = self.live_block() else {
            return Weak::new();
        };

        match block.typed::<D>() {
            Some(ptr) => Weak::from_block(block, Some(ptr)),
            None => {
                stats::record(Counter::DowncastRejected);
                log_event(LifecycleEvent::DowncastRejected {
                    block: block.id(),
                    expected: type_name::<D>(),
                    actual: block.type_name(),
                });
                Weak::new()
            },
        }
    }

    fn live_block(&self) -> Option<&Rc<Block>> {
        self.block
            .as_ref()
            .filter(|block| self.ptr.is_some() && block.is_alive())
    }
}

impl<T: ?Sized + 'static> Default for Weak<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> Clone for Weak<T> {
    fn clone(&self) -> Self {
        match &self.block {
            Some(block) => {
                block.increment();
                Weak {
                    block: Some(Rc::clone(block)),
                    ptr: self.ptr,
                }
            },
            None => Weak::new(),
        }
    }

    /// Overwrite with `source`, acquiring before releasing
    ///
    /// Assigning a handle that shares this handle's block leaves the
    /// observer count untouched.
    fn clone_from(&mut self, source: &Self) {
        if self.same_block(source) {
            self.ptr = source.ptr;
            return;
        }
        let mut previous = std::mem::replace(self, source.clone());
        previous.clear();
    }
}

impl<T: ?Sized + 'static> Drop for Weak<T> {
    fn drop(&mut self) {
        Block::release(&mut self.block);
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.block {
            None => "empty",
            Some(_) if self.is_null() => "dead",
            Some(_) => "alive",
        };
        f.debug_struct("Weak")
            .field("type", &type_name::<T>())
            .field("state", &state)
            .field("observers", &self.ref_count())
            .finish()
    }
}

/// Scoped shared borrow of a live observed object
///
/// While any guard is alive, dropping the owner is a fatal error: the
/// process aborts rather than leave this reference dangling.
pub struct Observed<'a, T: ?Sized> {
    block: &'a Block,
    ptr: NonNull<T>,
}

impl<'a, T: ?Sized> Observed<'a, T> {
    fn new(block: &'a Block, ptr: NonNull<T>) -> Self {
        block.begin_borrow();
        Observed { block, ptr }
    }
}

impl<T: ?Sized> Deref for Observed<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the block was alive when the guard was created, and the
        // anchor refuses to let the object die while `borrows > 0`.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ?Sized> Drop for Observed<'_, T> {
    fn drop(&mut self) {
        self.block.end_borrow();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Observed<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{View, Views};

    fn bound_block(value: &mut u32) -> Rc<Block> {
        let block = Block::new();
        block.bind(Views::new(View::of(NonNull::from(value)))).unwrap();
        block
    }

    #[test]
    fn test_empty_handle() {
        let handle: Weak<u32> = Weak::new();
        assert!(handle.is_null());
        assert!(!handle.is_bound());
        assert_eq!(handle.ref_count(), 0);
        assert!(handle.get().is_none());
        assert_eq!(handle.try_borrow().err(), Some(TetherError::Empty));
    }

    #[test]
    fn test_clone_and_drop_track_count() {
        let mut value = 3u32;
        let block = bound_block(&mut value);
        let ptr = Some(NonNull::from(&mut value));

        let a: Weak<u32> = Weak::from_block(&block, ptr);
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        assert_eq!(*b.borrow(), 3);

        drop(b);
        assert_eq!(a.ref_count(), 1);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut value = 3u32;
        let block = bound_block(&mut value);
        let mut a: Weak<u32> = Weak::from_block(&block, Some(NonNull::from(&mut value)));
        a.clear();
        a.clear();
        assert!(!a.is_bound());
        assert_eq!(block.ref_count(), 0);
    }

    #[test]
    fn test_invalidated_block_reads_dead() {
        let mut value = 3u32;
        let block = bound_block(&mut value);
        let a: Weak<u32> = Weak::from_block(&block, Some(NonNull::from(&mut value)));

        block.invalidate();
        assert!(a.is_null());
        assert!(a.as_ptr().is_none());
        assert_eq!(a.try_borrow().err(), Some(TetherError::Dead { type_name: "u32" }));
    }

    #[test]
    fn test_issued_before_bind_never_observes() {
        let mut value = 3u32;
        let block = Block::new();
        let early: Weak<u32> = Weak::from_block(&block, Some(NonNull::from(&mut value)));
        block.bind(Views::new(View::of(NonNull::from(&mut value)))).unwrap();

        assert!(early.is_null());
        assert!(early.is_bound());
        assert_eq!(early.ref_count(), 1);
    }

    #[test]
    fn test_guard_counts_borrows() {
        let mut value = 3u32;
        let block = bound_block(&mut value);
        let a: Weak<u32> = Weak::from_block(&block, Some(NonNull::from(&mut value)));
        {
            let _g1 = a.borrow();
            let _g2 = a.get().unwrap();
            assert_eq!(block.borrows(), 2);
        }
        assert_eq!(block.borrows(), 0);
    }

    #[test]
    #[should_panic(expected = "dereferenced a null handle")]
    fn test_borrow_null_panics() {
        let handle: Weak<u32> = Weak::new();
        let _ = handle.borrow();
    }

    #[test]
    fn test_clone_from_same_block_keeps_count() {
        let mut value = 3u32;
        let block = bound_block(&mut value);
        let mut a: Weak<u32> = Weak::from_block(&block, Some(NonNull::from(&mut value)));
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);

        a.clone_from(&b);
        assert_eq!(a.ref_count(), 2);
        assert!(!a.is_null());
    }

    #[test]
    fn test_clone_from_other_block_moves_count() {
        let mut x = 1u32;
        let mut y = 2u32;
        let bx = bound_block(&mut x);
        let by = bound_block(&mut y);
        let mut a: Weak<u32> = Weak::from_block(&bx, Some(NonNull::from(&mut x)));
        let b: Weak<u32> = Weak::from_block(&by, Some(NonNull::from(&mut y)));

        a.clone_from(&b);
        assert_eq!(bx.ref_count(), 0);
        assert_eq!(by.ref_count(), 2);
        assert_eq!(*a.borrow(), 2);
    }
}
