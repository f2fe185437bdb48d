use crate::local_irq::{local_irq_restore, local_irq_save, IrqFlags};
use crate::sync::{spin_lock, SpinGuard, SpinMutex};

/// A spinning lock which masks local interrupts while held.
///
/// This is the lock that guards state shared with an interrupt handler.  Acquisition first masks interrupts on the
/// calling context and then spins; release unlocks and then restores the saved mask, in that order.  Holders must not
/// block or allocate: other contexts, including the interrupt handler, are spinning on the other side.
///
/// There is intentionally no plain `lock()`.  A lock which is shared with an interrupt handler and taken without
/// masking is how a context ends up spinning forever on a lock it holds itself.
pub struct IrqLock<T> {
    inner: SpinMutex<T>,
}

/// Guard for an [IrqLock].  Unlocks and restores the interrupt mask on drop.
pub struct IrqLockGuard<'a, T> {
    // Fields drop in declaration order: the unlock happens before the restore.
    guard: SpinGuard<'a, T>,
    _restore: RestoreOnDrop,
}

/// Restores a saved interrupt mask when dropped.
struct RestoreOnDrop(Option<IrqFlags>);

impl Drop for RestoreOnDrop {
    fn drop(&mut self) {
        if let Some(flags) = self.0.take() {
            local_irq_restore(flags);
        }
    }
}

impl<T> IrqLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: SpinMutex::new(value),
        }
    }

    /// Mask local interrupts, then acquire the lock.
    pub fn lock_irqsave(&self) -> IrqLockGuard<'_, T> {
        let restore = RestoreOnDrop(Some(local_irq_save()));
        let guard = spin_lock(&self.inner);
        IrqLockGuard {
            guard,
            _restore: restore,
        }
    }

    /// Run a closure under the lock.
    pub fn with<R>(&self, what: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock_irqsave();
        what(&mut guard)
    }
}

impl<T: Default> Default for IrqLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::ops::Deref for IrqLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for IrqLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
