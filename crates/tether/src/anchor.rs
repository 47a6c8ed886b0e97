//! Owner Anchors
//!
//! An [`Anchor`] lives inside the object it anchors. It creates the
//! indirection block, hands out [`Weak`] handles, and clears the block when
//! the object is dropped. It never frees the block: outstanding handles keep
//! the (now empty) record alive until the last one goes.
//!
//! Objects move in Rust, so the anchor cannot learn its owner's address at
//! construction time. Instead the owner is bound once it sits at a stable,
//! pinned address:
//!
//! ```text
//! Anchor::new()  ──►  pin (Box::pin / pin!)  ──►  bind()  ──►  drop owner
//!  block created        address fixed           block alive    block cleared
//! ```
//!
//! [`pin_box`] does the first three steps at once.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomPinned;
use std::mem;
use std::pin::Pin;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::block::{Block, View, Views};
use crate::cast::Upcast;
use crate::error::{Result, TetherError};
use crate::logging::{log_event, LifecycleEvent};
use crate::weak::Weak;

/// Liveness anchor embedded in an observed object
///
/// `T` is the type handed out by [`weak`](Anchor::weak): the struct that
/// declares this anchor as a field.
pub struct Anchor<T: ?Sized + 'static> {
    block: Rc<Block>,
    /// Address of the `T` holding this anchor, set at bind
    target: Cell<Option<NonNull<T>>>,
    _pin: PhantomPinned,
}

impl<T: ?Sized + 'static> Anchor<T> {
    /// Create an unbound anchor with a fresh block
    pub fn new() -> Self {
        Anchor {
            block: Block::new(),
            target: Cell::new(None),
            _pin: PhantomPinned,
        }
    }

    /// Get a handle to the anchored object
    ///
    /// Always succeeds. A handle obtained before the owner is bound is
    /// counted but never observes the object.
    pub fn weak(&self) -> Weak<T> {
        Weak::from_block(&self.block, self.target.get())
    }

    /// Get a handle typed as `owner`, which must contain this anchor
    ///
    /// This is the unchecked counterpart of [`Weak::downcast`]: no runtime
    /// type test happens. What is checked instead is that `owner`'s memory
    /// encloses the anchor, which ties the owner's lifetime to the anchor's.
    /// Meant for types that reach a base type's anchor and want handles
    /// typed as themselves.
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
        self.target.set(Some(target));
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
        let borrows = self.block.borrows();
        if borrows > 0 {
            let event = LifecycleEvent::DestroyedWhileBorrowed {
                block: self.block.id(),
                borrows,
            };
            eprintln!("tether: fatal: {}", event);
            log_event(event);
            std::process::abort();
        }
        self.block.invalidate();
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Anchor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Anchor").field("block", &*self.block).finish()
    }
}

/// Types that embed an [`Anchor`], directly or through a base field
///
/// Implement with the [`anchored!`](crate::anchored) macro.
///
/// # Safety
///
/// Handles dereference the object through a raw address, so implementors
/// vouch that:
///
/// - `anchor()` returns an anchor stored inline in `self`, declared before
///   every field an observer could read, so it is dropped first (for a base
///   held in a field, declare that field first);
/// - `Self` does not implement `Unpin`;
/// - `Self` does not implement `Drop`: its `drop(&mut self)` would run
///   before the anchor invalidates the block, while observers may still
///   hold guards. Put teardown logic in a field declared after the anchor;
/// - once pinned, no `&mut Self` or mutable projection of its fields is
///   handed out. Use interior mutability for state observers can see;
/// - every view added in [`views`](Anchored::views) projects into `self`.
pub unsafe trait Anchored: Any + Sized {
    /// Type that declares the anchor this type reaches
    type Root: Any;

    /// The anchor embedded in this object
    fn anchor(&self) -> &Anchor<Self::Root>;

    /// Record bases, besides `Self` and [`Root`](Anchored::Root), that a
    /// handle to this object may be downcast to
    fn views(_views: &mut ViewSet<Self>) {}

    /// Handle typed as `Self`
    fn weak(&self) -> Weak<Self> {
        self.anchor().weak_as(self)
    }
}

/// Downcast targets of an object being bound
///
/// Starts out with the object's own type. Every added type is recorded with
/// the address its [`Upcast`] projection yields.
pub struct ViewSet<A> {
    owner: NonNull<A>,
    views: Views,
}

impl<A: Any> ViewSet<A> {
    pub(crate) fn new(owner: NonNull<A>) -> Self {
        ViewSet {
            owner,
            views: Views::new(View::of(owner)),
        }
    }

    /// Record `B` as a type handles to this object may be downcast to
    pub fn add<B: Any>(&mut self)
    where
        A: Upcast<B>,
    {
        let ptr = <A as Upcast<B>>::upcast_ptr(self.owner);
        self.views.push(View::of(ptr));
    }

    pub(crate) fn into_views(self) -> Views {
        self.views
    }
}

/// Bind a pinned owner to its anchor
///
/// Records the owner's address and its views in the block; handles obtained
/// from then on observe it. Rebinding the same owner is a no-op.
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

/// Check that `inner` lies entirely within `outer`'s memory
pub(crate) fn ensure_embedded<I, O: ?Sized>(inner: &I, outer: &O) -> Result<()> {
    let inner_start = inner as *const I as usize;
    let inner_end = inner_start + mem::size_of::<I>();
    let outer_start = outer as *const O as *const () as usize;
    let outer_size = mem::size_of_val(outer);

    if inner_start >= outer_start && inner_end <= outer_start + outer_size {
        Ok(())
    } else {
        Err(TetherError::NotEmbedded {
            anchor: inner_start,
            owner: outer_start,
            owner_size: outer_size,
        })
    }
}

/// Implement [`Anchored`] for a type
///
/// - `anchored!(Widget, anchor)`: `Widget` owns `anchor: Anchor<Widget>`.
/// - `anchored!(Button => Widget, widget.anchor)`: `Button` defers to the
///   anchor of its embedded `Widget`; `Button::weak()` still returns
///   `Weak<Button>`. Requires `upcast!(Button => Widget, widget)`.
/// - `anchored!(Toggle => Widget, button.widget.anchor; Button)`: same, and
///   also records the intermediate `Button` as a downcast target. Each
///   listed type needs its own `upcast!`.
///
/// The generated impl asserts at compile time that the type is neither
/// `Unpin` nor `Drop`. The remaining obligations of [`Anchored`] (anchor
/// declared first, no mutable access while pinned) are on the caller.
///
/// ```compile_fail
/// use tether::{anchored, Anchor};
///
/// struct Noisy {
///     anchor: Anchor<Noisy>,
/// }
///
/// impl Drop for Noisy {
///     fn drop(&mut self) {}
/// }
///
/// anchored!(Noisy, anchor);
/// ```
#[macro_export]
macro_rules! anchored {
    ($ty:ty, $($field:ident).+ $(; $($view:ty),+ $(,)?)?) => {
        $crate::anchored!($ty => $ty, $($field).+ $(; $($view),+)?);
    };
    ($ty:ty => $root:ty, $($field:ident).+ $(; $($view:ty),+ $(,)?)?) => {
        $crate::__private::static_assertions::assert_not_impl_any!($ty: ::core::marker::Unpin);

        #[allow(drop_bounds)]
        const _: () = {
            $crate::__private::static_assertions::assert_not_impl_any!($ty: ::core::ops::Drop);
        };

        unsafe impl $crate::Anchored for $ty {
            type Root = $root;

            #[inline]
            fn anchor(&self) -> &$crate::Anchor<$root> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counter {
        anchor: Anchor<Counter>,
        hits: Cell<u32>,
    }

    crate::anchored!(Counter, anchor);

    fn counter() -> Counter {
        Counter {
            anchor: Anchor::new(),
            hits: Cell::new(0),
        }
    }

    #[test]
    fn test_unbound_anchor_hands_out_dead_handles() {
        let c = counter();
        let handle = c.anchor.weak();
        assert!(!c.anchor.is_bound());
        assert!(handle.is_null());
        assert_eq!(c.anchor.ref_count(), 1);
    }

    #[test]
    fn test_pin_box_binds() {
        let c = pin_box(counter()).unwrap();
        assert!(c.anchor.is_bound());

        let handle = c.weak();
        handle.borrow().hits.set(5);
        assert_eq!(c.hits.get(), 5);
        assert_eq!(handle.addr(), Some(&*c as *const Counter as usize));
    }

    #[test]
    fn test_bind_stack_pinned() {
        let c = std::pin::pin!(counter());
        bind(c.as_ref()).unwrap();
        let handle = c.anchor.weak();
        assert!(!handle.is_null());
        // Binding again is harmless
        bind(c.as_ref()).unwrap();
    }

    #[test]
    fn test_drop_clears_but_keeps_block() {
        let c = pin_box(counter()).unwrap();
        let a = c.weak();
        let b = a.clone();
        drop(c);

        assert!(a.is_null());
        assert!(b.is_null());
        assert_eq!(a.ref_count(), 2);
    }

    #[test]
    fn test_weak_as_rejects_foreign_owner() {
        let c = pin_box(counter()).unwrap();
        let stranger = 0u64;
        let err = c.anchor.try_weak_as(&stranger).unwrap_err();
        assert!(matches!(err, TetherError::NotEmbedded { .. }));
        assert_eq!(c.anchor.ref_count(), 0);
    }

    #[test]
    fn test_ensure_embedded_bounds() {
        struct Pair {
            a: u32,
            b: u32,
        }
        let pair = Pair { a: 1, b: 2 };
        assert!(ensure_embedded(&pair.a, &pair).is_ok());
        assert!(ensure_embedded(&pair.b, &pair).is_ok());
        assert!(ensure_embedded(&pair, &pair.a).is_err());
    }
}
