use std::cell::Cell;

thread_local! {
    /// The interrupt line whose handler this thread is running, if any.
    static IRQ_CONTEXT: Cell<Option<&'static str>> = const { Cell::new(None) };
}

pub(crate) fn is_irq_context() -> bool {
    current_irq().is_some()
}

pub(crate) fn current_irq() -> Option<&'static str> {
    IRQ_CONTEXT.with(|x| x.get())
}

/// Marks the current thread as running the handler of `line` until dropped.
///
/// While marked, the library will not perform operations that may block, allocate, or enter the kernel.  Leaving the
/// outermost handler is the point at which deferred work, such as waking the log forwarder, happens.
pub(crate) struct IrqContextGuard {
    previous: Option<&'static str>,
}

#[inline(always)]
pub(crate) fn enter_irq_context(line: &'static str) -> IrqContextGuard {
    let previous = IRQ_CONTEXT.with(|x| x.replace(Some(line)));
    IrqContextGuard { previous }
}

impl Drop for IrqContextGuard {
    fn drop(&mut self) {
        IRQ_CONTEXT.with(|x| x.set(self.previous));
        if self.previous.is_none() {
            crate::logging::wake_on_irq_exit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nesting_restores_outer_line() {
        assert!(!is_irq_context());
        {
            let _outer = enter_irq_context("outer");
            {
                let _inner = enter_irq_context("inner");
                assert_eq!(current_irq(), Some("inner"));
            }
            assert_eq!(current_irq(), Some("outer"));
        }
        assert_eq!(current_irq(), None);
    }
}
