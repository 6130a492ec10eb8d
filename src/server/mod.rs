//! Live index maintenance
//!
//! Keeps an index in step with a workspace while it is being edited:
//!
//! - [`watcher`] translates `notify` events into raw events
//! - [`coalescer`] waits out bursts and settles one change per path
//! - [`worker`] is the single writer applying changes and reconcile passes
//! - [`service`] wires them together behind [`IndexService`]

pub mod coalescer;
pub mod service;
pub mod watcher;
pub mod worker;

pub use coalescer::{ChangeCoalescer, Clock, RawEventKind, SystemClock, VirtualClock};
pub use service::{IndexService, ServiceStatus};
