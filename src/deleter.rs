//! Destroy policies for objects adopted by a [`Shared`](crate::Shared).
//!
//! An object placed in a handle with [`Shared::new`](crate::Shared::new) lives
//! inside its control block and is simply dropped in place. An object that
//! already existed somewhere else is *adopted*, and the deleter registered with
//! it decides what "destroying" means: freeing a box, returning a slot to a
//! pool, or anything else.
use alloc::boxed::Box;
use core::ptr::NonNull;

/// How an adopted object is destroyed once its last strong handle is gone.
///
/// Any `FnOnce(NonNull<T>)` closure is a deleter:
///
/// ```
/// use shptr::Shared;
/// use std::{cell::Cell, ptr::NonNull, rc::Rc};
///
/// let freed = Rc::new(Cell::new(false));
/// let flag = freed.clone();
/// let raw = NonNull::from(Box::leak(Box::new(10u32)));
///
/// let deleter = move |p: NonNull<u32>| {
///     flag.set(true);
///     drop(unsafe { Box::from_raw(p.as_ptr()) });
/// };
///
/// // Safety: `raw` came from a box and the deleter puts it back in one.
/// let p = unsafe { Shared::from_raw_with(raw, deleter) };
/// assert_eq!(*p, 10);
/// drop(p);
/// assert!(freed.get());
/// ```
pub trait Deleter<T: ?Sized> {
    /// Destroys the object behind `ptr`.
    ///
    /// # Safety
    /// `ptr` is the pointer this deleter was registered with, and the object
    /// behind it has not been destroyed yet.
    unsafe fn delete(self, ptr: NonNull<T>);
}

/// Deleter for pointers obtained from [`Box::into_raw`] or [`Box::leak`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    unsafe fn delete(self, ptr: NonNull<T>) {
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

impl<T: ?Sized, F: FnOnce(NonNull<T>)> Deleter<T> for F {
    unsafe fn delete(self, ptr: NonNull<T>) {
        self(ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Drops;

    #[test]
    fn default_delete_drops_box_contents() {
        let drops = Drops::default();
        let ptr = NonNull::from(Box::leak(Box::new(drops.track(()))));
        unsafe { DefaultDelete.delete(ptr) };
        assert_eq!(drops.count(), 1);
    }

    #[test]
    fn default_delete_handles_unsized() {
        let drops = Drops::default();
        let items: Box<[_]> = Box::new([drops.track(1), drops.track(2)]);
        let ptr = NonNull::from(Box::leak(items));
        unsafe { DefaultDelete.delete(ptr) };
        assert_eq!(drops.count(), 2);
    }
}
