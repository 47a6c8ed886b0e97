//! Static "is-a" relation between observed types
//!
//! Rust has no class inheritance, so the base/derived relation that handles
//! are re-typed along has to be declared explicitly. `Derived: Upcast<Base>` says that a
//! `Derived` value can be viewed as a `Base` living inside the same object,
//! either as a trait object (`Circle => dyn Shape`) or as an embedded base
//! struct (`Button => Widget` through a field).
//!
//! Handles use the relation in both directions: [`Weak::upcast`] requires
//! `T: Upcast<B>` and always succeeds, [`Weak::downcast`] requires
//! `D: Upcast<T>` and tests the live object's type at runtime.
//!
//! [`Weak::upcast`]: crate::Weak::upcast
//! [`Weak::downcast`]: crate::Weak::downcast

use std::ptr::NonNull;

/// Pointer projection from `Self` to its base view `B`
///
/// # Safety
///
/// `upcast_ptr` must return a pointer into the same allocation as `this`,
/// valid for exactly as long as `this` is. It is only ever called with a
/// pointer to a live value. Prefer the [`upcast!`](crate::upcast) macro,
/// which generates correct implementations.
pub unsafe trait Upcast<B: ?Sized> {
    /// Project a pointer to `Self` onto its `B` view
    fn upcast_ptr(this: NonNull<Self>) -> NonNull<B>;
}

// Every type is trivially a view of itself.
unsafe impl<T: ?Sized> Upcast<T> for T {
    #[inline]
    fn upcast_ptr(this: NonNull<T>) -> NonNull<T> {
        this
    }
}

/// Declare that a type can be viewed as a base type
///
/// Two forms:
///
/// - `upcast!(Circle => dyn Shape)`: unsizing coercion, for trait objects.
/// - `upcast!(Button => Widget, widget)`: the base lives in field `widget`.
///   The field's type must coerce into the base, so
///   `upcast!(Button => dyn Shape, widget)` works when `Widget: Shape`.
///
/// # Examples
///
/// ```rust
/// trait Shape {
///     fn area(&self) -> f64;
/// }
///
/// struct Square {
///     side: f64,
/// }
///
/// impl Shape for Square {
///     fn area(&self) -> f64 {
///         self.side * self.side
///     }
/// }
///
/// tether::upcast!(Square => dyn Shape);
/// ```
#[macro_export]
macro_rules! upcast {
    ($derived:ty => $base:ty) => {
        unsafe impl $crate::Upcast<$base> for $derived {
            #[inline]
            fn upcast_ptr(
                this: ::core::ptr::NonNull<$derived>,
            ) -> ::core::ptr::NonNull<$base> {
                this
            }
        }
    };
    ($derived:ty => $base:ty, $($field:ident).+) => {
        unsafe impl $crate::Upcast<$base> for $derived {
            #[inline]
            fn upcast_ptr(
                this: ::core::ptr::NonNull<$derived>,
            ) -> ::core::ptr::NonNull<$base> {
                // SAFETY: `this` points to a live value; the projection stays
                // inside it.
                unsafe {
                    ::core::ptr::NonNull::new_unchecked(::core::ptr::addr_of_mut!(
                        (*this.as_ptr()).$($field).+
                    ))
                }
            }
        }
    };
}
