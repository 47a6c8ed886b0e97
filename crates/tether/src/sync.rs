//! Thread-safe observation
//!
//! Same shape as the crate-root types, for owners and observers on different
//! threads. The observer count is atomic and the object pointer sits behind a
//! reader-writer lock: an [`Observed`] guard holds a read lock, and the
//! anchor's drop takes the write lock before clearing the pointer. Dropping
//! the owner therefore waits for outstanding guards instead of aborting.
//!
//! Dropping the owner on a thread that itself holds a guard to it deadlocks.
//!
//! Guards take the read lock recursively, so a thread already holding one
//! can take another while the owner's drop is waiting. The flip side is that
//! readers are never held back for a waiting drop: as long as some guard is
//! alive at every instant, the drop never gets the lock.
//!
//! ```rust
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::thread;
//! use tether::sync::{self, Anchor};
//!
//! struct Gauge {
//!     anchor: Anchor<Gauge>,
//!     level: AtomicU32,
//! }
//!
//! tether::sync_anchored!(Gauge, anchor);
//!
//! let gauge = sync::pin_box(Gauge {
//!     anchor: Anchor::new(),
//!     level: AtomicU32::new(3),
//! })?;
//! let handle = gauge.anchor.weak();
//!
//! let seen = thread::spawn(move || {
//!     let level = handle.get().map(|g| g.level.load(Ordering::Relaxed));
//!     level
//! })
//! .join()
//! .unwrap();
//! assert_eq!(seen, Some(3));
//! # Ok::<(), tether::TetherError>(())
//! ```

use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomPinned;
use std::ops::Deref;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::anchor::{ensure_embedded, ViewSet};
use crate::block::{next_block_id, Views};
use crate::cast::Upcast;
use crate::error::{Result, TetherError};
use crate::logging::{log_event, LifecycleEvent};

struct Slot {
    views: Option<Views>,
    type_name: &'static str,
}

/// Indirection block shared across threads
struct SyncBlock {
    id: u64,
    slot: RwLock<Slot>,
    observers: AtomicUsize,
}

// SAFETY: the erased root pointer is only read under the lock and only
// dereferenced through typed handles whose `T: Sync`.
unsafe impl Send for SyncBlock {}
unsafe impl Sync for SyncBlock {}

impl SyncBlock {
    fn new() -> Arc<SyncBlock> {
        let block = SyncBlock {
            id: next_block_id(),
            slot: RwLock::new(Slot {
                views: None,
                type_name: "<unbound>",
            }),
            observers: AtomicUsize::new(0),
        };
        log_event(LifecycleEvent::BlockCreated { block: block.id });
        Arc::new(block)
    }

    fn bind(&self, views: Views) -> Result<()> {
        let root = views.root();
        let mut slot = self.slot.write();
        if let Some(bound) = slot.views.as_ref().map(Views::root) {
            if bound == root {
                return Ok(());
            }
            return Err(TetherError::AlreadyBound {
                bound: bound.addr(),
                requested: root.addr(),
            });
        }
        slot.views = Some(views);
        slot.type_name = root.type_name;
        drop(slot);

        log_event(LifecycleEvent::Bound {
            block: self.id,
            type_name: root.type_name,
            address: root.addr(),
        });
        Ok(())
    }

    fn increment(&self) {
        let observers = self.observers.fetch_add(1, Ordering::AcqRel) + 1;
        log_event(LifecycleEvent::HandleAcquired {
            block: self.id,
            observers,
        });
    }

    fn release(slot: &mut Option<Arc<SyncBlock>>) {
        let Some(block) = slot.take() else {
            return;
        };
        let previous = block.observers.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "block #{} released with no observers", block.id);
        let observers = previous.wrapping_sub(1);
        log_event(LifecycleEvent::HandleReleased {
            block: block.id,
            observers,
        });
    }

    fn is_alive(&self) -> bool {
        self.slot.read_recursive().views.is_some()
    }

    fn type_name(&self) -> &'static str {
        self.slot.read_recursive().type_name
    }

    fn ref_count(&self) -> usize {
        self.observers.load(Ordering::Acquire)
    }

    /// Clear the object pointer, waiting for readers to finish
    fn invalidate(&self) {
        let mut slot = self.slot.write();
        if slot.views.take().is_some() {
            drop(slot);
            log_event(LifecycleEvent::Invalidated {
                block: self.id,
                observers: self.ref_count(),
            });
        }
    }
}

impl Drop for SyncBlock {
    fn drop(&mut self) {
        log_event(LifecycleEvent::BlockFreed { block: self.id });
    }
}

/// Thread-safe observer handle
pub struct Weak<T: ?Sized + 'static> {
    block: Option<Arc<SyncBlock>>,
    ptr: Option<NonNull<T>>,
}

// SAFETY: a handle only ever hands out `&T`, under the block's read lock.
unsafe impl<T: ?Sized + Sync> Send for Weak<T> {}
unsafe impl<T: ?Sized + Sync> Sync for Weak<T> {}

impl<T: ?Sized + 'static> Weak<T> {
    /// Create an empty handle
    pub const fn new() -> Self {
        Weak {
            block: None,
            ptr: None,
        }
    }

    fn from_block(block: &Arc<SyncBlock>, ptr: Option<NonNull<T>>) -> Self {
        block.increment();
        Weak {
            ptr: ptr.filter(|_| block.is_alive()),
            block: Some(Arc::clone(block)),
        }
    }

    /// Release the block reference; the handle becomes empty
    pub fn clear(&mut self) {
        SyncBlock::release(&mut self.block);
        self.ptr = None;
    }

    /// True if empty, or the observed object is gone
    ///
    /// Only a snapshot: the owner may be dropped right after this returns.
    /// Use [`get`](Weak::get) to observe and hold the object.
    pub fn is_null(&self) -> bool {
        match &self.block {
            Some(block) => self.ptr.is_none() || !block.is_alive(),
            None => true,
        }
    }

    /// Borrow the object if it is alive; blocks its destruction meanwhile
    pub fn get(&self) -> Option<Observed<'_, T>> {
        self.try_borrow().ok()
    }

    /// Borrow the object, reporting why it is unavailable
    pub fn try_borrow(&self) -> Result<Observed<'_, T>> {
        let block = self.block.as_deref().ok_or(TetherError::Empty)?;
        let guard = block.slot.read_recursive();
        match (self.ptr, guard.views.is_some()) {
            (Some(ptr), true) => Ok(Observed { _guard: guard, ptr }),
            _ => Err(TetherError::Dead {
                type_name: guard.type_name,
            }),
        }
    }

    /// Borrow the object
    ///
    /// # Panics
    ///
    /// Panics if the handle is null.
    #[track_caller]
    pub fn borrow(&self) -> Observed<'_, T> {
        match self.try_borrow() {
            Ok(observed) => observed,
            Err(err) => panic!("dereferenced a null handle: {}", err),
        }
    }

    /// Thin address of the `T` view if alive
    pub fn addr(&self) -> Option<usize> {
        if self.is_null() {
            return None;
        }
        self.ptr.map(|ptr| ptr.cast::<()>().as_ptr() as usize)
    }

    /// Number of live handles sharing this handle's block
    pub fn ref_count(&self) -> usize {
        self.block.as_ref().map_or(0, |block| block.ref_count())
    }

    /// Re-type to a base view; never fails
    pub fn upcast<B: ?Sized + 'static>(&self) -> Weak<B>
    where
        T: Upcast<B>,
    {
        let Some(block) = &self.block else {
            return Weak::new();
        };
        // Hold the read lock so the projection reads a live object.
        let slot = block.slot.read_recursive();
        let ptr = match slot.views {
            Some(_) => self.ptr.map(<T as Upcast<B>>::upcast_ptr),
            None => None,
        };
        let weak = Weak::from_block(block, ptr);
        drop(slot);
        weak
    }

    /// Re-type to a derived type, checked against the live object
    ///
    /// Returns an empty handle if the object is gone or `D` is not one of
    /// its views.
    pub fn downcast<D>(&self) -> Weak<D>
    where
        D: Upcast<T> + Any,
    {
        let Some(block) = &self.block else {
            return Weak::new();
        };
        if self.ptr.is_none() {
            return Weak::new();
        }

        let slot = block.slot.read_recursive();
        let Some(views) = &slot.views else {
            return Weak::new();
        };
        match views.typed::<D>() {
            Some(ptr) => Weak::from_block(block, Some(ptr)),
            None => {
                log_event(LifecycleEvent::DowncastRejected {
                    block: block.id,
                    expected: type_name::<D>(),
                    actual: views.root().type_name,
                });
                Weak::new()
            },
        }
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
                    block: Some(Arc::clone(block)),
                    ptr: self.ptr,
                }
            },
            None => Weak::new(),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        let same = match (&self.block, &source.block) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        if same {
            self.ptr = source.ptr;
            return;
        }
        let mut previous = std::mem::replace(self, source.clone());
        previous.clear();
    }
}

impl<T: ?Sized + 'static> Drop for Weak<T> {
    fn drop(&mut self) {
        SyncBlock::release(&mut self.block);
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("sync::Weak")
            .field("type", &type_name::<T>())
            .field("alive", &!self.is_null())
            .field("observers", &self.ref_count())
            .finish()
    }
}

/// Shared borrow of a live object; holds off its destruction
pub struct Observed<'a, T: ?Sized> {
    _guard: RwLockReadGuard<'a, Slot>,
    ptr: NonNull<T>,
}

impl<T: ?Sized> Deref for Observed<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the read lock keeps the anchor from clearing the block,
        // and the anchor clears it before the object is destroyed.
        unsafe { self.ptr.as_ref() }
    }
}

/// Thread-safe liveness anchor
pub struct Anchor<T: ?Sized + 'static> {
    block: Arc<SyncBlock>,
    target: Mutex<Option<NonNull<T>>>,
    _pin: PhantomPinned,
}

// SAFETY: `target` is only copied into handles, which require `T: Sync` to
// cross threads.
unsafe impl<T: ?Sized + Sync> Send for Anchor<T> {}
unsafe impl<T: ?Sized + Sync> Sync for Anchor<T> {}

impl<T: ?Sized + 'static> Anchor<T> {
    /// Create an unbound anchor with a fresh block
    pub fn new() -> Self {
        Anchor {
            block: SyncBlock::new(),
            target: Mutex::new(None),
            _pin: PhantomPinned,
        }
    }

    /// Get a handle to the anchored object
    pub fn weak(&self) -> Weak<T> {
        Weak::from_block(&self.block, *self.target.lock())
    }

    /// Handle typed as `owner`, which must contain this anchor
    pub fn try_weak_as<D: ?Sized + 'static>(&self, owner: &D) -> Result<Weak<D>> {
        ensure_embedded(self, owner)?;
        Ok(Weak::from_block(&self.block, Some(NonNull::from(owner))))
    }

    /// Like [`try_weak_as`](Anchor::try_weak_as)
    ///
    /// # Panics
    ///
    /// Panics if `owner` does not contain this anchor.
    #[track_caller]
    pub fn weak_as<D: ?Sized + 'static>(&self, owner: &D) -> Weak<D> {
        match self.try_weak_as(owner) {
            Ok(weak) => weak,
            Err(err) => panic!("same-object re-typing misused: {}", err),
        }
    }

    /// Whether the owner has been bound and is alive
    pub fn is_bound(&self) -> bool {
        self.block.is_alive()
    }

    /// Number of live handles to this anchor's block
    pub fn ref_count(&self) -> usize {
        self.block.ref_count()
    }

    fn arm(&self, views: Views, target: NonNull<T>) -> Result<()> {
        self.block.bind(views)?;
        *self.target.lock() = Some(target);
        Ok(())
    }
}

impl<T: ?Sized + 'static> Default for Anchor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> Drop for Anchor<T> {
    fn drop(&mut self) {
        self.block.invalidate();
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Anchor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("sync::Anchor")
            .field("block", &self.block.id)
            .field("bound", &self.is_bound())
            .field("type", &self.block.type_name())
            .field("observers", &self.ref_count())
            .finish()
    }
}

/// Thread-safe counterpart of [`crate::Anchored`]
///
/// Implement with [`sync_anchored!`](crate::sync_anchored).
///
/// # Safety
///
/// Same obligations as [`crate::Anchored`]. The ban on `Drop` matters even
/// more here: the owner's drop is what guards on other threads wait for,
/// and a `Drop` impl on `Self` would run before that wait.
pub unsafe trait Anchored: Any + Sized + Sync {
    /// Type that declares the anchor this type reaches
    type Root: Any;

    /// The anchor embedded in this object
    fn anchor(&self) -> &Anchor<Self::Root>;

    /// Record extra downcast targets, as in [`crate::Anchored::views`]
    fn views(_views: &mut ViewSet<Self>) {}

    /// Handle typed as `Self`
    fn weak(&self) -> Weak<Self> {
        self.anchor().weak_as(self)
    }
}

/// Bind a pinned owner to its anchor
pub fn bind<A>(owner: Pin<&A>) -> Result<()>
where
    A: Anchored + Upcast<<A as Anchored>::Root>,
{
    let owner = owner.get_ref();
    let anchor = owner.anchor();
    ensure_embedded(anchor, owner)?;

    let root = NonNull::from(owner);
    let mut views = ViewSet::new(root);
    views.add::<A::Root>();
    A::views(&mut views);

    let target = <A as Upcast<A::Root>>::upcast_ptr(root);
    anchor.arm(views.into_views(), target)
}

/// Box, pin and bind `value` in one step
pub fn pin_box<A>(value: A) -> Result<Pin<Box<A>>>
where
    A: Anchored + Upcast<<A as Anchored>::Root>,
{
    let boxed = Box::pin(value);
    bind(boxed.as_ref())?;
    Ok(boxed)
}

/// Implement [`sync::Anchored`](crate::sync::Anchored) for a type
///
/// Same forms and compile-time checks as [`anchored!`](crate::anchored).
///
/// ```compile_fail
/// use std::sync::atomic::AtomicU64;
/// use tether::sync::Anchor;
///
/// struct Gauge {
///     anchor: Anchor<Gauge>,
///     value: AtomicU64,
/// }
///
/// impl Drop for Gauge {
///     fn drop(&mut self) {
///         *self.value.get_mut() = 0;
///     }
/// }
///
/// tether::sync_anchored!(Gauge, anchor);
/// ```
#[macro_export]
macro_rules! sync_anchored {
    ($ty:ty, $($field:ident).+ $(; $($view:ty),+ $(,)?)?) => {
        $crate::sync_anchored!($ty => $ty, $($field).+ $(; $($view),+)?);
    };
    ($ty:ty => $root:ty, $($field:ident).+ $(; $($view:ty),+ $(,)?)?) => {
        $crate::__private::static_assertions::assert_not_impl_any!($ty: ::core::marker::Unpin);

        #[allow(drop_bounds)]
        const _: () = {
            $crate::__private::static_assertions::assert_not_impl_any!($ty: ::core::ops::Drop);
        };

        unsafe impl $crate::sync::Anchored for $ty {
            type Root = $root;

            #[inline]
            fn anchor(&self) -> &$crate::sync::Anchor<$root> {
                &self.$($field).+
            }

            $(
                fn views(views: &mut $crate::ViewSet<Self>) {
                    $(views.add::<$view>();)+
                }
            )?
        }
    };
}
