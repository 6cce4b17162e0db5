//! One-time initialization cell
//!
//! Explicit state machine `NotStarted -> InProgress -> Done | Failed` behind a
//! single mutex. The first caller runs the constructor with the lock released;
//! everyone else parks on the condvar until the state leaves `InProgress`.
//! Failure is terminal: the same error is handed to every caller and the
//! constructor never runs again.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use thiserror::Error;

/// Constructor panicked while the cell was `InProgress`
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("initializer panicked during construction")]
pub struct Poisoned;

/// Observable phase of a `OnceInit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    NotStarted,
    InProgress,
    Done,
    Failed,
}

enum InitState<T, E> {
    NotStarted,
    InProgress,
    Done(Arc<T>),
    Failed(E),
}

impl<T, E> InitState<T, E> {
    fn phase(&self) -> InitPhase {
        match self {
            InitState::NotStarted => InitPhase::NotStarted,
            InitState::InProgress => InitPhase::InProgress,
            InitState::Done(_) => InitPhase::Done,
            InitState::Failed(_) => InitPhase::Failed,
        }
    }
}

/// Fallible once-cell whose failure is sticky
pub struct OnceInit<T, E> {
    state: Mutex<InitState<T, E>>,
    ready: Condvar,
}

impl<T, E> OnceInit<T, E>
where
    E: Clone + From<Poisoned>,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InitState::NotStarted),
            ready: Condvar::new(),
        }
    }

    /// Return the value, running `init` if nobody has yet
    ///
    /// Blocks while another thread is constructing. `init` runs at most once
    /// over the lifetime of the cell, whatever its outcome.
    pub fn get_or_try_init<F>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        {
            let mut state = self.state.lock();
            loop {
                match &*state {
                    InitState::Done(value) => return Ok(Arc::clone(value)),
                    InitState::Failed(err) => return Err(err.clone()),
                    InitState::InProgress => self.ready.wait(&mut state),
                    InitState::NotStarted => break,
                }
            }
            *state = InitState::InProgress;
        }

        let mut guard = PoisonGuard {
            cell: self,
            armed: true,
        };
        let outcome = init();
        guard.armed = false;

        let mut state = self.state.lock();
        let result = match outcome {
            Ok(value) => {
                let value = Arc::new(value);
                *state = InitState::Done(Arc::clone(&value));
                Ok(value)
            }
            Err(err) => {
                *state = InitState::Failed(err.clone());
                Err(err)
            }
        };
        drop(state);
        self.ready.notify_all();
        result
    }

    /// Non-blocking peek: `None` unless construction has finished
    pub fn get(&self) -> Option<Result<Arc<T>, E>> {
        match &*self.state.lock() {
            InitState::Done(value) => Some(Ok(Arc::clone(value))),
            InitState::Failed(err) => Some(Err(err.clone())),
            _ => None,
        }
    }

    pub fn phase(&self) -> InitPhase {
        self.state.lock().phase()
    }
}

impl<T, E> Default for OnceInit<T, E>
where
    E: Clone + From<Poisoned>,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Moves the cell to `Failed` if the constructor unwinds
struct PoisonGuard<'a, T, E: From<Poisoned>> {
    cell: &'a OnceInit<T, E>,
    armed: bool,
}

impl<T, E: From<Poisoned>> Drop for PoisonGuard<'_, T, E> {
    fn drop(&mut self) {
        if self.armed {
            *self.cell.state.lock() = InitState::Failed(E::from(Poisoned));
            self.cell.ready.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestError {
        Invalid(&'static str),
        Poisoned,
    }

    impl From<Poisoned> for TestError {
        fn from(_: Poisoned) -> Self {
            TestError::Poisoned
        }
    }

    #[test]
    fn test_runs_once() {
        let cell: OnceInit<u32, TestError> = OnceInit::new();
        assert_eq!(cell.phase(), InitPhase::NotStarted);
        assert!(cell.get().is_none());

        let a = cell.get_or_try_init(|| Ok(5)).unwrap();
        let b = cell.get_or_try_init(|| Ok(9)).unwrap();
        assert_eq!(*a, 5);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cell.phase(), InitPhase::Done);
    }

    #[test]
    fn test_failure_is_sticky() {
        let cell: OnceInit<u32, TestError> = OnceInit::new();
        let calls = AtomicUsize::new(0);

        let first = cell.get_or_try_init(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::Invalid("worker_count"))
        });
        let second = cell.get_or_try_init(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });

        assert_eq!(first, Err(TestError::Invalid("worker_count")));
        assert_eq!(second, Err(TestError::Invalid("worker_count")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cell.phase(), InitPhase::Failed);
    }

    #[test]
    fn test_concurrent_callers_share_one_construction() {
        let cell: Arc<OnceInit<String, TestError>> = Arc::new(OnceInit::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cell.get_or_try_init(|| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        Ok("configured".to_string())
                    })
                    .unwrap()
                })
            })
            .collect();

        let values: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for v in &values {
            assert!(Arc::ptr_eq(v, &values[0]));
        }
    }

    #[test]
    fn test_concurrent_callers_share_one_error() {
        let cell: Arc<OnceInit<u8, TestError>> = Arc::new(OnceInit::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    cell.get_or_try_init(|| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        Err(TestError::Invalid("cache_capacity"))
                    })
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), Err(TestError::Invalid("cache_capacity")));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_poisons_cell() {
        let cell: Arc<OnceInit<u8, TestError>> = Arc::new(OnceInit::new());

        let panicking = Arc::clone(&cell);
        let joined = thread::spawn(move || {
            let _ = panicking.get_or_try_init(|| panic!("bad defaults"));
        })
        .join();
        assert!(joined.is_err());

        assert_eq!(cell.phase(), InitPhase::Failed);
        assert_eq!(cell.get_or_try_init(|| Ok(1)), Err(TestError::Poisoned));
    }
}
