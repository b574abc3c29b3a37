//! Small utilities shared by the registries.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a registry mutex, recovering the guard if a holder panicked.
///
/// Registry locks only guard map lookups and inserts, so the data stays consistent
/// even when a panic unwinds through a holder.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::lock;

    #[test]
    fn poisoned_lock_still_yields_data() {
        let shared = Arc::new(Mutex::new(vec![1]));
        let clone = Arc::clone(&shared);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(shared.is_poisoned());
        lock(&shared).push(2);
        assert_eq!(*lock(&shared), vec![1, 2]);
    }
}
