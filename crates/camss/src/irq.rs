//! Interrupt delivery.
//!
//! Off-target there is no interrupt controller, so whatever plays the hardware raises a line by calling
//! [IrqLine::raise] from its own thread.  The line behaves like a real one toward the code it interrupts: a handler
//! never runs on a context which has interrupts masked (that context may hold the very lock the handler needs), two
//! runs of the same handler never overlap, and a raise which can't be delivered right away is latched and delivered
//! when the raising context unmasks.
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arrayvec::ArrayVec;
use camss_synchronization::{irqs_disabled, on_unmask, IrqLock};

use crate::is_irq_context::enter_irq_context;
use crate::isp::Camss;

/// How many distinct lines one context can have latched at once.  Past that a latched line waits for its next raise.
const MAX_LATCHED_LINES: usize = 8;

thread_local! {
    /// Lines latched by this context while it had interrupts masked.
    static LATCHED_HERE: RefCell<ArrayVec<Weak<LineInner>, MAX_LATCHED_LINES>> = RefCell::new(ArrayVec::new());
}

/// What a handler did with an interrupt.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, derive_more::IsVariant)]
pub enum IrqReturn {
    /// The status bit the handler owns wasn't set.
    None,
    Handled,
}

impl IrqReturn {
    fn merge(self, other: IrqReturn) -> IrqReturn {
        if self.is_handled() || other.is_handled() {
            IrqReturn::Handled
        } else {
            IrqReturn::None
        }
    }
}

type Handler = Box<dyn Fn() -> IrqReturn + Send + Sync>;

struct LineInner {
    name: &'static str,

    /// Held while the handler runs.  Serializes runs and masks the running context.
    desc: IrqLock<()>,

    latched: AtomicBool,

    handler: Handler,
}

pub struct IrqLine {
    inner: Arc<LineInner>,
}

impl IrqLine {
    pub fn new(name: &'static str, handler: impl Fn() -> IrqReturn + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(LineInner {
                name,
                desc: IrqLock::new(()),
                latched: AtomicBool::new(false),
                handler: Box::new(handler),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Is a raise waiting to be delivered?
    pub fn is_latched(&self) -> bool {
        self.inner.is_latched()
    }

    /// Raise the line.
    ///
    /// If the calling context has interrupts masked, the raise is latched, `IrqReturn::None` is returned, and the
    /// handler runs when that context's outermost masked section ends.  A raise latched while the handler is running
    /// elsewhere makes that run go around again.
    pub fn raise(&self) -> IrqReturn {
        self.inner.raise()
    }

    /// Deliver a latched raise, if there is one.
    pub fn deliver_latched(&self) -> IrqReturn {
        self.inner.deliver_latched()
    }
}

impl LineInner {
    fn is_latched(&self) -> bool {
        self.latched.load(Ordering::Acquire)
    }

    fn raise(self: &Arc<Self>) -> IrqReturn {
        self.latched.store(true, Ordering::Release);
        if irqs_disabled() {
            self.deliver_on_unmask();
            return IrqReturn::None;
        }

        let mut ret = IrqReturn::None;
        while self.is_latched() {
            let _desc = self.desc.lock_irqsave();
            // Someone else may have delivered it while we waited.
            if !self.latched.swap(false, Ordering::AcqRel) {
                break;
            }
            let _ctx = enter_irq_context(self.name);
            ret = ret.merge((self.handler)());
        }
        ret
    }

    fn deliver_latched(self: &Arc<Self>) -> IrqReturn {
        if !self.is_latched() {
            return IrqReturn::None;
        }
        self.raise()
    }

    /// Remember this line on the current context, to be delivered by [deliver_latched_here].
    fn deliver_on_unmask(self: &Arc<Self>) {
        let remembered = LATCHED_HERE.with(|l| {
            let mut l = l.borrow_mut();
            if l.iter().any(|w| w.as_ptr() == Arc::as_ptr(self)) {
                return true;
            }
            l.try_push(Arc::downgrade(self)).is_ok()
        });

        if !remembered || !on_unmask(deliver_latched_here) {
            irq_warn!(
                "Too many interrupts latched on one context; irq {} waits for its next raise",
                self.name
            );
        }
    }
}

/// Deliver every line this context latched while masked.
fn deliver_latched_here() {
    let latched = LATCHED_HERE.with(|l| std::mem::take(&mut *l.borrow_mut()));
    for line in latched.iter().filter_map(Weak::upgrade) {
        line.deliver_latched();
    }
}

impl std::fmt::Debug for IrqLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrqLine")
            .field("name", &self.name())
            .field("latched", &self.is_latched())
            .finish()
    }
}

/// The two interrupt lines of the ISP, wired to a [Camss].
#[derive(Debug)]
pub struct IspIrqs {
    /// Raised when a frame's last line is out: rotate buffers.
    pub line: IrqLine,

    /// Raised when the ISP finishes a frame: deliver buffers.
    pub isp: IrqLine,
}

impl IspIrqs {
    pub fn new(camss: &Arc<Camss>) -> Self {
        let for_line = camss.clone();
        let for_isp = camss.clone();
        Self {
            line: IrqLine::new("isp-line", move || for_line.line_irq_handler()),
            isp: IrqLine::new("isp", move || for_isp.isp_irq_handler()),
        }
    }

    /// Deliver anything either line latched.
    pub fn deliver_latched(&self) -> IrqReturn {
        self.line
            .deliver_latched()
            .merge(self.isp.deliver_latched())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use camss_synchronization::{local_irq_restore, local_irq_save};

    use crate::is_irq_context::is_irq_context;

    fn counting_line() -> (Arc<AtomicUsize>, IrqLine) {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let line = IrqLine::new("test", move || {
            assert!(is_irq_context());
            assert!(irqs_disabled());
            r.fetch_add(1, Ordering::Relaxed);
            IrqReturn::Handled
        });
        (runs, line)
    }

    #[test]
    fn test_raise_runs_handler_in_irq_context() {
        let (runs, line) = counting_line();
        assert_eq!(line.raise(), IrqReturn::Handled);
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert!(!is_irq_context());
        assert!(!irqs_disabled());
    }

    #[test]
    fn test_masked_raise_is_delivered_on_unmask() {
        let (runs, line) = counting_line();

        let outer = local_irq_save();
        let inner = local_irq_save();
        assert_eq!(line.raise(), IrqReturn::None);
        assert_eq!(line.raise(), IrqReturn::None);
        assert!(line.is_latched());
        local_irq_restore(inner);
        assert_eq!(runs.load(Ordering::Relaxed), 0);
        local_irq_restore(outer);

        // Two raises while masked collapse into one, as with a level interrupt.
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert!(!line.is_latched());
        assert_eq!(line.deliver_latched(), IrqReturn::None);
    }

    #[test]
    fn test_raise_under_irq_lock_runs_after_unlock() {
        let lock = Arc::new(IrqLock::new(0u32));
        let l = lock.clone();
        // Would spin forever if it ran while the raising context still held the lock.
        let line = IrqLine::new("test", move || {
            l.with(|x| *x += 1);
            IrqReturn::Handled
        });

        lock.with(|x| {
            assert_eq!(line.raise(), IrqReturn::None);
            assert_eq!(*x, 0);
        });
        assert_eq!(lock.with(|x| *x), 1);
        assert!(!line.is_latched());
    }

    #[test]
    fn test_dropped_line_is_skipped_on_unmask() {
        let (runs, line) = counting_line();
        let flags = local_irq_save();
        line.raise();
        std::mem::drop(line);
        local_irq_restore(flags);
        assert_eq!(runs.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_concurrent_raises_never_overlap() {
        let busy = Arc::new(AtomicBool::new(false));
        let runs = Arc::new(AtomicUsize::new(0));
        let (b, r) = (busy.clone(), runs.clone());
        let line = Arc::new(IrqLine::new("test", move || {
            assert!(!b.swap(true, Ordering::AcqRel));
            r.fetch_add(1, Ordering::Relaxed);
            b.store(false, Ordering::Release);
            IrqReturn::Handled
        }));

        let threads = (0..4)
            .map(|_| {
                let line = line.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        line.raise();
                    }
                })
            })
            .collect::<Vec<_>>();
        for t in threads {
            t.join().unwrap();
        }

        let runs = runs.load(Ordering::Relaxed);
        assert!(runs > 0 && runs <= 4000);
        assert!(!line.is_latched());
    }
}
