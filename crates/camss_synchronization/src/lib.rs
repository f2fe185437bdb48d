//! Primitives for synchronization between interrupt context and process context.
//!
//! The camera pipeline shares per-stream state between a hardware interrupt handler and ordinary threads which queue
//! buffers and start or stop streams.  The interrupt half must never sleep, allocate, or wait on something which can
//! sleep.  The tools here encode that: a spinning lock which masks the local interrupt line while held (so that a
//! handler dispatched on the same context can never spin on a lock its own context holds), the per-context interrupt
//! mask itself, and the lock-free frame skip counter consulted at the top of every line interrupt.
pub mod frame_skip;
pub mod irq_lock;
pub mod local_irq;
mod sync;

pub use frame_skip::FrameSkip;
pub use irq_lock::{IrqLock, IrqLockGuard};
pub use local_irq::{irqs_disabled, local_irq_restore, local_irq_save, on_unmask, IrqFlags, MAX_UNMASK_WORK};
