//! # Type-erased values crossing the definition boundary.
//!
//! Task inputs and outputs, resource values, event payloads, and captured
//! configuration all travel through the runtime as [`Dynamic`] values:
//! cheaply cloneable, type-erased, downcast on the consuming side.
//!
//! ## Rules
//! - A `Dynamic` is immutable from the runtime's point of view; interior
//!   mutability is the application's choice.
//! - Downcasting to the wrong type returns `None`; it never panics.

use std::any::Any;
use std::sync::Arc;

/// Shared, type-erased value.
///
/// Everything the runtime passes between definitions is a `Dynamic`:
/// cloning is an `Arc` bump, and the concrete type is recovered with
/// [`downcast`] / [`downcast_ref`] at the consuming site.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// Wraps a concrete value into a [`Dynamic`].
#[inline]
pub fn dynamic<T: Send + Sync + 'static>(value: T) -> Dynamic {
    Arc::new(value)
}

/// The unit value, used where a body produces nothing meaningful.
#[inline]
pub fn unit() -> Dynamic {
    Arc::new(())
}

/// Recovers `Arc<T>` from a [`Dynamic`], sharing ownership.
///
/// Returns `None` when the erased type is not `T`.
#[inline]
pub fn downcast<T: Send + Sync + 'static>(value: Dynamic) -> Option<Arc<T>> {
    value.downcast::<T>().ok()
}

/// Borrows the concrete `T` behind a [`Dynamic`].
///
/// Returns `None` when the erased type is not `T`.
#[inline]
pub fn downcast_ref<T: 'static>(value: &Dynamic) -> Option<&T> {
    value.downcast_ref::<T>()
}
