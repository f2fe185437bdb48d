#[cfg(not(loom))]
mod not_loom {
    pub use std::sync::atomic::*;
    pub use std::sync::*;
    pub use std::thread::spawn;
    pub use std::thread::yield_now;
    pub use std::thread_local;

    pub type SpinMutex<T> = spin::Mutex<T>;
    pub type SpinGuard<'a, T> = spin::MutexGuard<'a, T>;

    #[inline(always)]
    pub fn spin_lock<T>(mutex: &SpinMutex<T>) -> SpinGuard<'_, T> {
        mutex.lock()
    }

    #[cfg(test)]
    pub fn wrap_test(what: impl Fn() + Sync + Send + 'static) {
        what()
    }
}

#[cfg(not(loom))]
pub(crate) use not_loom::*;

#[cfg(loom)]
mod with_loom {
    pub use loom::sync::atomic::*;
    pub use loom::sync::*;
    pub use loom::thread::spawn;
    pub use loom::thread::yield_now;
    pub use loom::thread_local;

    // Loom cannot see through spin loops, so under a model the spinning lock is its blocking mutex instead.
    pub type SpinMutex<T> = loom::sync::Mutex<T>;
    pub type SpinGuard<'a, T> = loom::sync::MutexGuard<'a, T>;

    #[inline(always)]
    pub fn spin_lock<T>(mutex: &SpinMutex<T>) -> SpinGuard<'_, T> {
        mutex.lock().unwrap()
    }

    #[cfg(test)]
    pub fn wrap_test(what: impl Fn() + Sync + Send + 'static) {
        loom::model(what)
    }
}
#[cfg(loom)]
pub(crate) use with_loom::*;
