//! Per-context interrupt masking.
//!
//! A "context" is a thread: the thread which services the simulated interrupt line plays the part of a CPU taking an
//! interrupt, and every other thread is process context.  Masking is a nesting depth rather than a flag so that a
//! section which masks interrupts can call into another one which does the same, and unmasking only happens when the
//! outermost section restores.
//!
//! Nothing here prevents another thread from running a handler.  The guarantee is narrower and is the one the stream
//! locks need: while a context has interrupts masked, an interrupt dispatcher asked to run a handler on that same
//! context must latch the interrupt instead (see [irqs_disabled]), and deliver it once the context unmasks (see
//! [on_unmask]).
use std::cell::Cell;

use crate::sync::thread_local;

/// How many distinct functions one context can have waiting for [on_unmask].
pub const MAX_UNMASK_WORK: usize = 4;

thread_local! {
    static MASK_DEPTH: Cell<u32> = Cell::new(0);

    static UNMASK_WORK: [Cell<Option<fn()>>; MAX_UNMASK_WORK] = Default::default();
}

/// Saved interrupt state, returned by [local_irq_save] and consumed by [local_irq_restore].
///
/// Deliberately neither `Copy` nor `Clone`: each save is restored exactly once.
#[derive(Debug)]
#[must_use = "interrupts stay masked until the flags are restored"]
pub struct IrqFlags {
    depth: u32,
}

/// Mask interrupts on the current context, returning the state to restore later.
pub fn local_irq_save() -> IrqFlags {
    let depth = MASK_DEPTH.with(|d| {
        let old = d.get();
        d.set(old + 1);
        old
    });
    IrqFlags { depth }
}

/// Restore the state saved by the matching [local_irq_save].
///
/// # Panics
///
/// Panics in debug builds if saves and restores are not properly nested.
pub fn local_irq_restore(flags: IrqFlags) {
    MASK_DEPTH.with(|d| {
        debug_assert_eq!(
            d.get(),
            flags.depth + 1,
            "interrupt masks restored out of order"
        );
        d.set(flags.depth);
    });

    if flags.depth == 0 {
        run_unmask_work();
    }
}

/// Run `work` on this context as soon as interrupts are unmasked: at once if they are, otherwise when the outermost
/// masked section restores.
///
/// Deferring a function which is already waiting is a no-op.  Returns `false`, and drops `work`, if
/// [MAX_UNMASK_WORK] other functions are already waiting.
pub fn on_unmask(work: fn()) -> bool {
    if !irqs_disabled() {
        work();
        return true;
    }

    UNMASK_WORK.with(|slots| {
        let waiting = slots
            .iter()
            .any(|s| s.get().map_or(false, |w| w as usize == work as usize));
        if waiting {
            return true;
        }
        match slots.iter().find(|s| s.get().is_none()) {
            Some(free) => {
                free.set(Some(work));
                true
            }
            None => false,
        }
    })
}

fn run_unmask_work() {
    // Taken before running anything: work may mask, defer more work, and unmask again.
    let work: [Option<fn()>; MAX_UNMASK_WORK] =
        UNMASK_WORK.with(|slots| std::array::from_fn(|i| slots[i].take()));
    for w in work.into_iter().flatten() {
        w();
    }
}

/// Are interrupts masked on the current context?
pub fn irqs_disabled() -> bool {
    MASK_DEPTH.with(|d| d.get() != 0)
}
