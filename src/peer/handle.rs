use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

/// Outcome of giving a handle back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    DroppedLastRef,
    OtherRefsRemained,
}

/// Reference-counted owner of a shared object.
///
/// Cloning acquires, dropping releases, and the object is destroyed exactly
/// once when the last owner lets go, on whichever thread that happens to be.
/// Back-references (engine observers) take a [`Weak`] from [`Handle::downgrade`]
/// so they never extend the lifetime.
///
/// `release` consumes the handle, so a double release does not compile.
pub struct Handle<T> {
    inner: Arc<T>,
}

impl<T> Handle<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }

    pub fn acquire(&self) -> Self {
        self.clone()
    }

    /// Gives this owner back. If it was the last one the object is dropped
    /// before this returns.
    pub fn release(self) -> ReleaseStatus {
        match Arc::into_inner(self.inner) {
            Some(value) => {
                drop(value);
                ReleaseStatus::DroppedLastRef
            }
            None => ReleaseStatus::OtherRefsRemained,
        }
    }

    pub fn downgrade(&self) -> Weak<T> {
        Arc::downgrade(&self.inner)
    }

    /// Resolves a back-reference; `None` once the object is gone.
    pub fn upgrade(weak: &Weak<T>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn owners(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("owners", &self.owners())
            .field("value", &*self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct Tracked {
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn concurrent_release_destroys_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = Handle::new(Tracked {
            drops: drops.clone(),
        });

        let workers: Vec<_> = (0..100)
            .map(|_| {
                let owner = handle.acquire();
                thread::spawn(move || {
                    let extra = owner.acquire();
                    extra.release();
                    owner.release();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(handle.owners(), 1);
        assert_eq!(handle.release(), ReleaseStatus::DroppedLastRef);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn weak_link_does_not_extend_lifetime() {
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = Handle::new(Tracked {
            drops: drops.clone(),
        });
        let weak = handle.downgrade();
        let second = handle.acquire();
        assert_eq!(handle.release(), ReleaseStatus::OtherRefsRemained);
        assert!(Handle::upgrade(&weak).is_some());

        drop(second);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(Handle::upgrade(&weak).is_none());
    }

    #[test]
    fn reassignment_keeps_target_alive() {
        let drops = Arc::new(AtomicUsize::new(0));
        let a = Handle::new(Tracked {
            drops: drops.clone(),
        });
        let mut b = a.acquire();
        b = b.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.owners(), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
    }
}
