//! Logging from interrupt handlers.
//!
//! The buffer engine has things to say from interrupt context: a slot which should have held a buffer, a full
//! completion queue, a statistics buffer it can't flag.  Handlers cannot allocate, block, or do I/O, and the log
//! crate's facade only avoids those if whatever logger is installed happens to.
//!
//! The `irq_error!` ... `irq_trace!` macros take the same arguments as the log crate's:
//!
//! - Outside interrupt context they forward straight to the log crate.
//! - Inside, the message is formatted into a fixed-size record on a preallocated ring.  On the way out of the
//!   outermost handler the forwarding thread is woken, and it replays the ring through the log crate, naming the line
//!   each message came from.
//!
//! Messages too long for a record are truncated and messages which don't fit on the ring are counted; both are
//! reported when forwarded.  The logger timestamps messages when they are forwarded, so a note is appended to any
//! message which waited long.
use std::fmt::Arguments as FmtArgs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{park, JoinHandle};
use std::time::{Duration, Instant};

use arrayvec::ArrayString;
use thingbuf::{recycling::Recycle, ThingBuf};

use crate::is_irq_context::current_irq;

const RECORD_BYTES: usize = 256;
const RING_RECORDS: usize = 1024;

/// Messages forwarded later than this get a note saying so.
const LATE: Duration = Duration::from_millis(100);

type InlineText = ArrayString<RECORD_BYTES>;

#[derive(Debug)]
#[allow(clippy::large_enum_variant)] // A Cow without the allocation.
pub(crate) enum Text {
    Static(&'static str),
    Inline(InlineText),
}

impl Text {
    fn as_str(&self) -> &str {
        match self {
            Text::Static(s) => s,
            Text::Inline(i) => i.as_str(),
        }
    }
}

pub(crate) struct IrqRecord {
    /// Records this thread failed to push since its last successful push.
    dropped_before: u64,

    level: log::Level,

    /// `module_path!()` at the call site.
    module: &'static str,

    /// The interrupt line being handled.
    line: &'static str,

    text: Text,

    truncated: bool,

    logged_at: Instant,
}

/// Fills an [InlineText] and then quietly discards the rest, noting that it did.
struct Truncating<'a> {
    out: &'a mut InlineText,
    truncated: &'a mut bool,
}

impl std::fmt::Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        if *self.truncated {
            return Ok(());
        }

        if self.out.try_push_str(s).is_ok() {
            return Ok(());
        }

        *self.truncated = true;
        // Capacity is in bytes; fill char by char so the cut falls on a boundary.
        for c in s.chars() {
            if self.out.try_push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

pub(crate) fn format_record(
    level: log::Level,
    args: FmtArgs<'_>,
    module: &'static str,
    line: &'static str,
) -> IrqRecord {
    use std::fmt::Write;

    let mut truncated = false;
    let text = if let Some(s) = args.as_str() {
        Text::Static(s)
    } else {
        let mut out = InlineText::new();
        let _ = Truncating {
            out: &mut out,
            truncated: &mut truncated,
        }
        .write_fmt(args);
        Text::Inline(out)
    };

    IrqRecord {
        dropped_before: 0,
        level,
        module,
        line,
        text,
        truncated,
        logged_at: Instant::now(),
    }
}

struct BlankRecords;

impl Recycle<IrqRecord> for BlankRecords {
    fn new_element(&self) -> IrqRecord {
        IrqRecord {
            dropped_before: 0,
            level: log::Level::Trace,
            module: module_path!(),
            line: "",
            text: Text::Static(""),
            truncated: false,
            logged_at: Instant::now(),
        }
    }

    fn recycle(&self, _element: &mut IrqRecord) {
        // Every field is overwritten by the next push.
    }
}

struct IrqLog {
    ring: ThingBuf<IrqRecord, BlankRecords>,
    forwarder: JoinHandle<()>,
}

/// Set by pushes, cleared by the wakeup at interrupt exit.
static WAKE_PENDING: AtomicBool = AtomicBool::new(false);

lazy_static::lazy_static! {
    static ref IRQ_LOG: IrqLog = IrqLog {
        ring: ThingBuf::with_recycle(RING_RECORDS, BlankRecords),
        // The forwarder touches IRQ_LOG itself, which blocks it until this initializer has returned.
        forwarder: std::thread::Builder::new()
            .name("camss-irq-log".into())
            .spawn(forward_forever)
            .expect("Unable to spawn the interrupt log forwarder"),
    };
}

/// Push a record onto the ring.  The macros' interrupt-context path.
pub(crate) fn push_record(level: log::Level, args: FmtArgs<'_>, module: &'static str) {
    use std::cell::Cell;

    thread_local! {
        static DROPPED: Cell<u64> = const { Cell::new(0) };
    }

    if level > log::max_level() {
        return;
    }

    let mut record = format_record(level, args, module, current_irq().unwrap_or("?"));
    record.dropped_before = DROPPED.get();

    if IRQ_LOG.ring.push(record).is_ok() {
        DROPPED.set(0);
        WAKE_PENDING.store(true, Ordering::Release);
    } else {
        DROPPED.set(DROPPED.get() + 1);
    }
}

/// Wake the forwarder if anything was logged.  Called when leaving the outermost interrupt handler.
pub(crate) fn wake_on_irq_exit() {
    if WAKE_PENDING.swap(false, Ordering::AcqRel) {
        IRQ_LOG.forwarder.thread().unpark();
    }
}

fn forward(record: IrqRecord) {
    if record.dropped_before != 0 {
        log::warn!(
            "Interrupt log ring overflowed; {} messages from irq {} were lost",
            record.dropped_before,
            record.line
        );
    }

    let mut notes: smallvec::SmallVec<[u8; 64]> = smallvec::SmallVec::new();
    {
        use std::io::Write;

        let waited = record.logged_at.elapsed();
        if waited > LATE {
            let _ = write!(notes, ", forwarded {:.3}s late", waited.as_secs_f64());
        }
        if record.truncated {
            let _ = write!(notes, ", truncated");
        }
    }
    let notes = std::str::from_utf8(&notes).unwrap_or("");

    log::log!(
        target: record.module,
        record.level,
        "{} (irq {}{})",
        record.text.as_str(),
        record.line,
        notes
    );
}

fn forward_forever() {
    loop {
        while let Some(record) = IRQ_LOG.ring.pop() {
            forward(record);
        }
        // An unpark between the drain and here leaves the token set and this returns at once.
        park();
    }
}

/// Like `log::log!`, but safe in interrupt context.  The target is always the calling module.
#[allow(clippy::crate_in_macro_def)] // Private to this crate.
macro_rules! irq_log {
    ($level: expr, $fmt: expr $(, $args: expr)* $(,)?) => {
        let level = $level;
        if crate::is_irq_context::is_irq_context() {
            crate::logging::push_record(level, format_args!($fmt, $($args),*), module_path!());
        } else {
            log::log!(level, $fmt, $($args),*);
        }
    }
}

macro_rules! irq_error {
    ($($args: tt)+) => {
        irq_log!(log::Level::Error, $($args)*);
    }
}

macro_rules! irq_warn {
    ($($args: tt)+) => {
        irq_log!(log::Level::Warn, $($args)*);
    }
}

#[allow(unused_macros)]
macro_rules! irq_info {
    ($($args: tt)+) => {
        irq_log!(log::Level::Info, $($args)*);
    }
}

macro_rules! irq_debug {
    ($($args: tt)+) => {
        irq_log!(log::Level::Debug, $($args)*);
    }
}

#[allow(unused_macros)]
macro_rules! irq_trace {
    ($($args: tt)+) => {
        irq_log!(log::Level::Trace, $($args)*);
    }
}

/// Start the forwarder, so that it is never spawned from interrupt context.
pub(crate) fn ensure_log_ctx() {
    lazy_static::initialize(&IRQ_LOG);
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::is_irq_context::enter_irq_context;

    #[test]
    fn test_macros_build() {
        macro_rules! tester {
            ($mac: tt) => {
                $mac!("hello");
                $mac!("hello {}", 5);
                $mac!("hello {}", 5,);
            };
        }

        tester!(irq_error);
        tester!(irq_warn);
        tester!(irq_info);
        tester!(irq_debug);
        tester!(irq_trace);

        ensure_log_ctx();
        let _irq = enter_irq_context("test");
        tester!(irq_error);
        tester!(irq_trace);
    }

    #[test]
    fn test_static_messages_are_borrowed() {
        let record = format_record(log::Level::Info, format_args!("plain"), module_path!(), "line");
        assert!(matches!(record.text, Text::Static("plain")));
        assert_eq!(record.line, "line");
        assert!(!record.truncated);
    }

    #[test]
    fn test_long_messages_truncate() {
        let long = "x".repeat(RECORD_BYTES * 2);
        let record = format_record(log::Level::Info, format_args!("{}", long), module_path!(), "line");
        assert!(record.truncated);
        assert_eq!(record.text.as_str().len(), RECORD_BYTES);
    }

    #[test]
    fn test_truncation_keeps_char_boundaries() {
        // 3 bytes per char, which doesn't divide the record size.
        let long = "€".repeat(RECORD_BYTES);
        let record = format_record(log::Level::Info, format_args!("{}", long), module_path!(), "line");
        assert!(record.truncated);
        assert!(record.text.as_str().len() <= RECORD_BYTES);
        assert!(record.text.as_str().chars().all(|c| c == '€'));
    }
}
