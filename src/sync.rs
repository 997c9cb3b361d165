//! Synchronization primitives with conditional compilation.
//!
//! Uses `parking_lot::Mutex` when the `fast-lock` feature is enabled and
//! `std::sync::Mutex` otherwise. The only lock in the crate guards the set
//! of documents already processed in a pass.

#[cfg(feature = "fast-lock")]
use parking_lot::Mutex as ParkingLotMutex;

#[cfg(not(feature = "fast-lock"))]
use std::sync::Mutex as StdMutex;

/// Mutex type that conditionally uses parking_lot or std::sync::Mutex.
///
/// # Example
///
/// ```rust
/// use coreflink::sync::{lock, Mutex};
///
/// let seen = Mutex::new(Vec::<String>::new());
/// lock(&seen).push("wsj_0001".to_string());
/// assert_eq!(lock(&seen).len(), 1);
/// ```
#[cfg(feature = "fast-lock")]
pub type Mutex<T> = ParkingLotMutex<T>;

/// Mutex type that conditionally uses parking_lot or std::sync::Mutex.
///
/// # Example
///
/// ```rust
/// use coreflink::sync::{lock, Mutex};
///
/// let seen = Mutex::new(Vec::<String>::new());
/// lock(&seen).push("wsj_0001".to_string());
/// assert_eq!(lock(&seen).len(), 1);
/// ```
#[cfg(not(feature = "fast-lock"))]
pub type Mutex<T> = StdMutex<T>;

/// Lock a mutex and return the guard.
#[cfg(feature = "fast-lock")]
pub fn lock<T>(mutex: &Mutex<T>) -> parking_lot::MutexGuard<'_, T> {
    mutex.lock()
}

/// Lock a mutex and return the guard, recovering from poisoning.
///
/// Every update under this lock is a single insert, so a poisoned guard
/// still holds a consistent value.
#[cfg(not(feature = "fast-lock"))]
pub fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
