//! Control blocks: the bookkeeping shared by every handle of one ownership
//! group.
//!
//! A control block is a [`Header`] placed at offset zero of one of two
//! allocation shapes:
//!
//! - [`Embedded<T>`]: the header and the object share a single allocation.
//! - [`Adopted<T, D>`]: the header plus a pointer to an object that was
//!   allocated elsewhere, and the [`Deleter`] that knows how to get rid of it.
//!
//! The header carries type-erased function pointers for the operations that
//! differ between the two shapes, so handles never need to know which one they
//! are looking at.
//!
//! Object lifetime and block lifetime are decoupled: the object is destroyed
//! when the strong count drops to zero, the block is freed once both counts
//! are zero and no back-reference from a self-observing object pins it.
use alloc::boxed::Box;
use core::{
    any::type_name,
    cell::Cell,
    mem::{ManuallyDrop, MaybeUninit},
    ptr::{self, NonNull},
};

use log::trace;

use crate::deleter::Deleter;

/// Which allocation shape a control block lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Storage {
    Embedded,
    Adopted,
}

// Counts and destructors for an ownership group. There is no relationship
// between the handle's pointee type and the stored object type, since aliasing
// handles may point anywhere.
pub(crate) struct Header {
    strong: Cell<usize>,
    weak: Cell<usize>,
    // backed `SelfRef`s, kept out of `weak` so they never show up as observers
    self_refs: Cell<usize>,
    destroyed: Cell<bool>,
    storage: Storage,
    address: unsafe fn(NonNull<Header>) -> NonNull<u8>,
    drop_value: unsafe fn(NonNull<Header>),
    drop_header: unsafe fn(NonNull<Header>),
}

/// Object and bookkeeping in one allocation.
#[repr(C)]
pub(crate) struct Embedded<T> {
    header: Header,
    value: MaybeUninit<T>,
}

/// Bookkeeping for an object that was allocated before it was shared.
#[repr(C)]
pub(crate) struct Adopted<T: ?Sized, D> {
    header: Header,
    ptr: NonNull<T>,
    deleter: ManuallyDrop<D>,
}

impl Header {
    fn new(
        storage: Storage,
        address: unsafe fn(NonNull<Header>) -> NonNull<u8>,
        drop_value: unsafe fn(NonNull<Header>),
        drop_header: unsafe fn(NonNull<Header>),
    ) -> Header {
        Header {
            strong: Cell::new(1),
            weak: Cell::new(0),
            self_refs: Cell::new(0),
            destroyed: Cell::new(false),
            storage,
            address,
            drop_value,
            drop_header,
        }
    }

    pub(crate) fn strong(&self) -> usize {
        self.strong.get()
    }

    pub(crate) fn weak(&self) -> usize {
        self.weak.get()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub(crate) fn storage(&self) -> Storage {
        self.storage
    }

    pub(crate) fn inc_strong(&self) {
        let strong = self.strong.get();
        debug_assert!(strong > 0, "strong count revived from zero");
        self.strong.set(strong + 1);
    }

    /// Adds a strong reference unless the object is already gone.
    pub(crate) fn try_inc_strong(&self) -> bool {
        let strong = self.strong.get();
        if strong == 0 || self.destroyed.get() {
            false
        } else {
            self.strong.set(strong + 1);
            true
        }
    }

    pub(crate) fn inc_weak(&self) {
        self.weak.set(self.weak.get() + 1);
    }

    pub(crate) fn inc_self_ref(&self) {
        self.self_refs.set(self.self_refs.get() + 1);
    }

    /// Address of the managed object, whatever the storage shape.
    ///
    /// # Safety
    /// `this` must point to a live control block.
    pub(crate) unsafe fn address(this: NonNull<Header>) -> NonNull<u8> {
        let address = unsafe { this.as_ref() }.address;
        unsafe { address(this) }
    }

    /// Releases one strong reference, destroying the object on the last one
    /// and freeing the block if no weak reference remains.
    ///
    /// # Safety
    /// `this` must point to a live control block, and the caller must own one
    /// of its strong references, which is consumed.
    pub(crate) unsafe fn dec_strong(this: NonNull<Header>) {
        let h = unsafe { this.as_ref() };
        let strong = h.strong.get();
        debug_assert!(strong > 0, "strong count decremented below zero");
        h.strong.set(strong - 1);
        if strong != 1 {
            return;
        }

        // last strong reference was just released
        h.destroyed.set(true);
        // The object's destructor may release weak handles to its own group,
        // so hold a weak reference until it returns.
        h.inc_weak();
        let drop_value = h.drop_value;
        trace!(
            "control block {:p}: destroying {:?} object",
            this,
            h.storage()
        );
        unsafe { drop_value(this) };
        unsafe { Header::dec_weak(this) };
    }

    /// Releases one weak reference, freeing the block when it was the last
    /// reference of either kind.
    ///
    /// # Safety
    /// `this` must point to a live control block, and the caller must own one
    /// of its weak references, which is consumed.
    pub(crate) unsafe fn dec_weak(this: NonNull<Header>) {
        let h = unsafe { this.as_ref() };
        let weak = h.weak.get();
        debug_assert!(weak > 0, "weak count decremented below zero");
        h.weak.set(weak - 1);
        unsafe { Header::release_if_unreferenced(this) };
    }

    /// Releases the pin held by a backed `SelfRef`. In the usual case the
    /// reference dies with its object, inside the weak guard of `dec_strong`,
    /// and this never frees anything. A reference moved out of its object
    /// keeps the block allocated until it is dropped.
    ///
    /// # Safety
    /// `this` must point to a live control block, and the caller must own one
    /// of its self-reference pins, which is consumed.
    pub(crate) unsafe fn dec_self_ref(this: NonNull<Header>) {
        let h = unsafe { this.as_ref() };
        let pins = h.self_refs.get();
        debug_assert!(pins > 0, "self reference count decremented below zero");
        h.self_refs.set(pins - 1);
        unsafe { Header::release_if_unreferenced(this) };
    }

    unsafe fn release_if_unreferenced(this: NonNull<Header>) {
        let (unreferenced, drop_header) = {
            let h = unsafe { this.as_ref() };
            (
                h.strong.get() == 0 && h.weak.get() == 0 && h.self_refs.get() == 0,
                h.drop_header,
            )
        };
        if unreferenced {
            trace!("control block {:p}: released", this);
            unsafe { drop_header(this) };
        }
    }
}

impl<T> Embedded<T> {
    /// Places `value` in a fresh block with one strong reference, returning the
    /// block and the address of the value inside it.
    pub(crate) fn allocate(value: T) -> (NonNull<Header>, NonNull<T>) {
        let block = NonNull::from(Box::leak(Box::new(Embedded {
            header: Header::new(
                Storage::Embedded,
                embedded_address::<T>,
                drop_embedded_value::<T>,
                drop_embedded_header::<T>,
            ),
            value: MaybeUninit::new(value),
        })));
        let header = block.cast::<Header>();
        // Safety: `block` was just allocated and is not null
        let value = unsafe {
            NonNull::new_unchecked(ptr::addr_of_mut!((*block.as_ptr()).value).cast::<T>())
        };
        trace!(
            "control block {:p}: allocated embedded {}",
            header,
            type_name::<T>()
        );
        (header, value)
    }
}

impl<T: ?Sized, D: Deleter<T>> Adopted<T, D> {
    /// Allocates a block with one strong reference for the object at `ptr`,
    /// to be destroyed by `deleter`.
    pub(crate) fn allocate(ptr: NonNull<T>, deleter: D) -> NonNull<Header> {
        let block = NonNull::from(Box::leak(Box::new(Adopted {
            header: Header::new(
                Storage::Adopted,
                adopted_address::<T, D>,
                drop_adopted_value::<T, D>,
                drop_adopted_header::<T, D>,
            ),
            ptr,
            deleter: ManuallyDrop::new(deleter),
        })));
        let header = block.cast::<Header>();
        trace!(
            "control block {:p}: adopted {} at {:p}",
            header,
            type_name::<T>(),
            ptr.cast::<u8>()
        );
        header
    }
}

unsafe fn embedded_address<T>(header: NonNull<Header>) -> NonNull<u8> {
    let block = header.cast::<Embedded<T>>().as_ptr();
    unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*block).value).cast::<u8>()) }
}

unsafe fn drop_embedded_value<T>(header: NonNull<Header>) {
    let block = header.cast::<Embedded<T>>().as_ptr();
    unsafe { ptr::drop_in_place(ptr::addr_of_mut!((*block).value).cast::<T>()) };
}

unsafe fn drop_embedded_header<T>(header: NonNull<Header>) {
    // `value` is a MaybeUninit, so this only frees the memory
    drop(unsafe { Box::from_raw(header.cast::<Embedded<T>>().as_ptr()) });
}

unsafe fn adopted_address<T: ?Sized, D>(header: NonNull<Header>) -> NonNull<u8> {
    let block = header.cast::<Adopted<T, D>>().as_ptr();
    unsafe { (*block).ptr.cast::<u8>() }
}

unsafe fn drop_adopted_value<T: ?Sized, D: Deleter<T>>(header: NonNull<Header>) {
    let block = header.cast::<Adopted<T, D>>().as_ptr();
    let (ptr, deleter) = unsafe {
        (
            (*block).ptr,
            ManuallyDrop::into_inner(ptr::read(ptr::addr_of!((*block).deleter))),
        )
    };
    unsafe { deleter.delete(ptr) };
}

unsafe fn drop_adopted_header<T: ?Sized, D>(header: NonNull<Header>) {
    // the deleter was moved out by `drop_adopted_value`
    drop(unsafe { Box::from_raw(header.cast::<Adopted<T, D>>().as_ptr()) });
}
