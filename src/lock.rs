use std::sync::{Mutex, MutexGuard};

/// Take `lock` even if a panicking holder poisoned it, and clear the poison.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(lock = context, "mutex poisoned; recovering");
        lock.clear_poison();
        poisoned.into_inner()
    })
}
