//! Helpers for the unit tests.
use std::{cell::Cell, rc::Rc};

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Counts drops of every value it tracked.
#[derive(Clone, Debug, Default)]
pub(crate) struct Drops(Rc<Cell<usize>>);

impl Drops {
    pub(crate) fn count(&self) -> usize {
        self.0.get()
    }

    pub(crate) fn track<T>(&self, value: T) -> Tracked<T> {
        Tracked {
            value,
            drops: self.clone(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Tracked<T> {
    pub(crate) value: T,
    drops: Drops,
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.drops.0.set(self.drops.0.get() + 1);
    }
}
