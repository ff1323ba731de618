use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock, recovering the data if a holder panicked. Every critical section in
/// this crate leaves its data consistent before anything that can panic.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
