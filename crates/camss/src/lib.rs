//! Buffer scheduling for a camera ISP.
//!
//! The ISP writes frames by DMA into whichever buffer address was last programmed into it.  This crate decides, on
//! every hardware event, which application buffer the hardware writes next and which finished buffer goes back to the
//! application, with timestamps and sequence numbers, in submission order.  The hardware itself is behind
//! [RegisterIo]; [SimulatedIsp] stands in for it off-target.
#[macro_use]
mod logging;

pub mod buffer;
mod clock;
mod config;
mod done_queue;
mod error;
mod irq;
mod is_irq_context;
pub mod isp;
mod option_recycler;
mod options;
pub mod output;
pub mod registers;
mod sim;
mod unique_id;

pub use buffer::{Buffer, BufferState, DmaAddr, MappedMemory};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::*;
pub use done_queue::{BufferDone, Completion, DoneQueue};
pub use error::{Error, Result};
pub use irq::{IrqLine, IrqReturn, IspIrqs};
pub use isp::{Camss, NoParams, ParamsApply};
pub use options::{CamssOptions, OptionsError};
pub use output::{OutputState, StreamBuffers, StreamKind};
pub use registers::{IspStatus, RegisterIo, ScdType};
pub use sim::SimulatedIsp;
pub use unique_id::UniqueId;
