use std::ops::{Deref, DerefMut};

/// Owned C handle released by `drop` once it goes out of scope.
pub(crate) struct CBox<T: Copy> {
    value: T,
    drop: fn(T),
}

impl<T: Copy> CBox<T> {
    pub(crate) fn new(value: T, drop: fn(T)) -> Self {
        Self { value, drop }
    }
}

impl<T> CBox<*mut T> {
    pub(crate) fn is_null(&self) -> bool {
        self.value.is_null()
    }
}

// SQLite is compiled in serialized mode, handles may be shared between threads
unsafe impl<T: Copy> Send for CBox<T> {}
unsafe impl<T: Copy> Sync for CBox<T> {}

impl<T: Copy> Deref for CBox<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Copy> DerefMut for CBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Copy> Drop for CBox<T> {
    fn drop(&mut self) {
        (self.drop)(self.value)
    }
}
