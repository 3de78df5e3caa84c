use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMode {
    /// One waiter consumes each `set`.
    AutoReset,
    /// Stays set for every waiter until `reset`.
    ManualReset,
}

/// Blocking event bridging callback completions into sequential waits.
///
/// A `set` from one thread wakes waiters blocked in `wait` on another. Waits
/// only return `true` after a matching `set`; condvar wakeups without one are
/// absorbed.
#[derive(Debug)]
pub struct Signal {
    mode: SignalMode,
    set: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new(mode: SignalMode) -> Self {
        Self {
            mode,
            set: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn auto_reset() -> Self {
        Self::new(SignalMode::AutoReset)
    }

    pub fn manual_reset() -> Self {
        Self::new(SignalMode::ManualReset)
    }

    pub fn set(&self) {
        let mut set = self.set.lock();
        *set = true;
        match self.mode {
            SignalMode::AutoReset => {
                self.cond.notify_one();
            }
            SignalMode::ManualReset => {
                self.cond.notify_all();
            }
        }
    }

    pub fn reset(&self) {
        *self.set.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Blocks until set or until `timeout` elapses; `None` waits forever,
    /// and so does a timeout too large to express as a deadline.
    /// Returns whether the signal fired.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut set = self.set.lock();
        while !*set {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut set, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut set),
            }
        }
        let fired = *set;
        if fired && self.mode == SignalMode::AutoReset {
            *set = false;
        }
        fired
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait(Some(timeout))
    }

    pub fn wait_forever(&self) {
        self.wait(None);
    }
}

/// Write-once result slot paired with a manual-reset signal.
///
/// The value is stored before the signal fires, so a waiter that sees the
/// signal always sees the value.
#[derive(Debug)]
pub struct Completion<T> {
    value: OnceCell<T>,
    ready: Signal,
}

impl<T> Completion<T> {
    pub fn new() -> Self {
        Self {
            value: OnceCell::new(),
            ready: Signal::manual_reset(),
        }
    }

    /// Stores the value and fires. Returns `false` if already completed, in
    /// which case the first value is kept.
    pub fn complete(&self, value: T) -> bool {
        if self.value.set(value).is_err() {
            return false;
        }
        self.ready.set();
        true
    }

    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }

    pub fn is_complete(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn wait(&self, timeout: Option<Duration>) -> Option<&T> {
        if self.ready.wait(timeout) {
            self.value.get()
        } else {
            None
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_times_out_without_set() {
        let signal = Signal::manual_reset();
        let started = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn set_from_other_thread_wakes_waiter() {
        let signal = Arc::new(Signal::manual_reset());
        let setter = {
            let signal = signal.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                signal.set();
            })
        };
        assert!(signal.wait_timeout(Duration::from_secs(2)));
        setter.join().unwrap();
    }

    #[test]
    fn manual_reset_stays_set_until_reset() {
        let signal = Signal::manual_reset();
        signal.set();
        assert!(signal.wait_timeout(Duration::ZERO));
        assert!(signal.wait_timeout(Duration::ZERO));
        signal.reset();
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn auto_reset_is_consumed_by_one_wait() {
        let signal = Signal::auto_reset();
        signal.set();
        assert!(signal.wait_timeout(Duration::ZERO));
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
        signal.set();
        signal.wait_forever();
        assert!(!signal.is_set());
    }

    #[test]
    fn unbounded_timeout_waits_without_overflow() {
        let signal = Arc::new(Signal::auto_reset());
        signal.set();
        assert!(signal.wait_timeout(Duration::MAX));

        let setter = {
            let signal = signal.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                signal.set();
            })
        };
        assert!(signal.wait_timeout(Duration::MAX));
        setter.join().unwrap();

        let slot = Completion::new();
        slot.complete(7u8);
        assert_eq!(slot.wait(Some(Duration::MAX)), Some(&7));
    }

    #[test]
    fn manual_reset_wakes_every_waiter() {
        let signal = Arc::new(Signal::manual_reset());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || signal.wait_timeout(Duration::from_secs(2)))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        signal.set();
        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }

    #[test]
    fn completion_keeps_first_value() {
        let slot = Completion::new();
        assert!(slot.wait(Some(Duration::from_millis(5))).is_none());
        assert!(slot.complete("first"));
        assert!(!slot.complete("second"));
        assert_eq!(slot.wait(Some(Duration::ZERO)), Some(&"first"));
        assert_eq!(slot.get(), Some(&"first"));
    }
}
