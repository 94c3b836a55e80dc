use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a mutex, recovering the inner state if a previous holder panicked.
/// Callers only guard bookkeeping that stays structurally valid across a panic.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    source: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!(
            target = source,
            op,
            guarded = std::any::type_name::<T>(),
            result = "poisoned_recovered",
            "Recovered poisoned lock; state may reflect a panicked holder"
        );
        poisoned.into_inner()
    })
}
