use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a short critical section. The guarded values are plain state
/// machines that stay consistent across a panicking holder, so poisoning
/// is ignored.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
