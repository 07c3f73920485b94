//! Process-wide library lifecycle
//!
//! A native engine's library init must run once before the first instance
//! and its teardown once after the last one. The counter is keyed by
//! engine type and sits behind its own lock, never an instance lock.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::marker::PhantomData;

use parking_lot::{const_mutex, Mutex};

use crate::engine::NativeLibrary;

static LIBRARIES: Mutex<BTreeMap<TypeId, usize>> = const_mutex(BTreeMap::new());

/// One reference on a native library; the library lives while any guard does
pub struct LibraryGuard<L: NativeLibrary> {
    _library: PhantomData<fn() -> L>,
}

impl<L: NativeLibrary> LibraryGuard<L> {
    pub fn acquire() -> Self {
        let mut libraries = LIBRARIES.lock();
        let count = libraries.entry(TypeId::of::<L>()).or_insert(0);
        if *count == 0 {
            tracing::debug!(library = std::any::type_name::<L>(), "Initializing native library");
            L::init_library();
        }
        *count += 1;

        Self {
            _library: PhantomData,
        }
    }

    /// Number of live guards for `L`
    pub fn active() -> usize {
        LIBRARIES
            .lock()
            .get(&TypeId::of::<L>())
            .copied()
            .unwrap_or(0)
    }
}

impl<L: NativeLibrary> Drop for LibraryGuard<L> {
    fn drop(&mut self) {
        let mut libraries = LIBRARIES.lock();
        let id = TypeId::of::<L>();
        let Some(count) = libraries.get_mut(&id) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            libraries.remove(&id);
            tracing::debug!(library = std::any::type_name::<L>(), "Destroying native library");
            L::destroy_library();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static INITS: AtomicUsize = AtomicUsize::new(0);
    static DESTROYS: AtomicUsize = AtomicUsize::new(0);

    struct CountingLibrary;

    impl NativeLibrary for CountingLibrary {
        fn init_library() {
            INITS.fetch_add(1, Ordering::SeqCst);
        }

        fn destroy_library() {
            DESTROYS.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_first_guard_inits_last_guard_destroys() {
        let a = LibraryGuard::<CountingLibrary>::acquire();
        let b = LibraryGuard::<CountingLibrary>::acquire();
        let c = LibraryGuard::<CountingLibrary>::acquire();
        assert_eq!(INITS.load(Ordering::SeqCst), 1);
        assert_eq!(LibraryGuard::<CountingLibrary>::active(), 3);

        drop(a);
        drop(b);
        assert_eq!(DESTROYS.load(Ordering::SeqCst), 0);

        drop(c);
        assert_eq!(DESTROYS.load(Ordering::SeqCst), 1);
        assert_eq!(LibraryGuard::<CountingLibrary>::active(), 0);

        let _again = LibraryGuard::<CountingLibrary>::acquire();
        assert_eq!(INITS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_guards_across_threads() {
        struct ThreadedLibrary;
        impl NativeLibrary for ThreadedLibrary {
            fn init_library() {}
            fn destroy_library() {}
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    for _ in 0..100 {
                        let _guard = LibraryGuard::<ThreadedLibrary>::acquire();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(LibraryGuard::<ThreadedLibrary>::active(), 0);
    }
}
