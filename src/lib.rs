/*!
This crate provides single-threaded shared-ownership pointers in the style of
C++'s [`shared_ptr`](https://en.cppreference.com/w/cpp/memory/shared_ptr) and
[`weak_ptr`](https://en.cppreference.com/w/cpp/memory/weak_ptr): a [`Shared<T>`]
handle that owns a heap object together with every other handle of its
*ownership group*, and a [`Weak<T>`] handle that observes the group without
keeping the object alive.

```rust
    use shptr::{Shared, Weak};

    let a = Shared::new(42);
    assert_eq!(Shared::use_count(&a), 1);

    let b = a.clone();
    assert_eq!(Shared::use_count(&a), 2);

    let w: Weak<i32> = Shared::downgrade(&a);
    assert!(!w.expired());

    drop((a, b));
    assert!(w.expired());
    assert!(Shared::is_empty(&w.lock()));
```

# Control blocks

Every group has one *control block* holding a strong count, a weak count and
a flag telling whether the object was destroyed. The object is destroyed as
soon as the strong count drops to zero; the control block itself is freed only
once both counts are zero, so weak handles can still ask whether the object is
alive after it is gone.

There are two ways to build a group:

- [`Shared::new`] places the object inside its control block: one allocation
  for both.
- [`Shared::from_box`] and [`Shared::from_raw_with`] *adopt* an object that was
  allocated beforehand, and only allocate the control block. The object is
  later destroyed by a [`Deleter`], by default by putting it back in its box.

```
    use shptr::Shared;

    // an exclusively owned box handed over to shared ownership
    let boxed: Box<dyn std::fmt::Display> = Box::new(7);
    let p: Shared<dyn std::fmt::Display> = boxed.into();
    assert_eq!(p.to_string(), "7");
```

# Aliasing

A handle is two independent pointers: what keeps the group alive, and what
address it exposes. [`Shared::alias`] and [`Shared::project`] give a handle to
a member of the object (or anything whose lifetime is tied to it) that still
owns the whole group:

```
    use shptr::Shared;

    struct Config {
        name: String,
        retries: u32,
    }

    let config = Shared::new(Config { name: "primary".into(), retries: 3 });
    let name: Shared<str> = Shared::alias(&config, |c| c.name.as_str());
    assert_eq!(Shared::use_count(&config), 2);

    // `name` keeps the whole `Config` alive
    drop(config);
    assert_eq!(&*name, "primary");
```

Because of this, [`Shared::ptr_eq`] (same exposed address) and
[`Shared::root_ptr_eq`] (same group) are two different questions. `==` on
handles compares exposed addresses, not values.

# Self-observation

An object can hand out handles to itself once it is shared, without being
passed one, by storing a [`SelfRef`] and implementing [`SelfObserving`]. See the
[`observe`] module.

# Errors

Promoting an expired weak handle with [`Shared::promote`] (or
`Shared::try_from(&weak)`) fails with [`Error::ExpiredReference`]. The common
path, [`Weak::lock`], returns an empty handle instead. Dereferencing an empty
[`Shared`] is a bug and panics.

# Notes

Counts are plain [`Cell`][core::cell::Cell]s: handles are neither `Send` nor
`Sync`. Cycles of `Shared` handles leak; break them with `Weak`.

Lifecycle events of control blocks (allocation, destruction of the object,
release of the block) are logged at `trace` level through the
[`log`](https://docs.rs/log) facade.
*/
#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#[cfg(test)]
extern crate std;

extern crate alloc;

mod control;
pub mod deleter;
pub mod error;
pub mod observe;
pub mod shared;
pub mod weak;

#[cfg(test)]
mod testing;

pub use self::deleter::{DefaultDelete, Deleter};
pub use self::error::Error;
pub use self::observe::{SelfObserving, SelfRef};
pub use self::shared::Shared;
pub use self::weak::Weak;
