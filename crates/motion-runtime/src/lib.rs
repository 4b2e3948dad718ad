//! Runtime layer: cyclic timing, the mode sequencer, host integration
//! and real-time setup.
//!
//! The runtime owns no I/O of its own. It drives a
//! [`motion_fieldbus::EthercatBus`] behind a shared handle: a dedicated
//! thread runs the fast exchange loop ([`cyclic::run_bus_loop`]) while
//! the host ticks the [`sequencer::ModeSequencer`] at a coarser period.

pub mod cyclic;
pub mod host;
pub mod realtime;
pub mod sequencer;

pub use cyclic::{run_bus_loop, CycleTimer};
pub use host::{HostHooks, HostTransition, MotionModule};
pub use realtime::{init_realtime, set_thread_priority, RealtimeStatus};
pub use sequencer::ModeSequencer;

/// Bus handle shared between the exchange thread and the sequencer.
pub type BusShared = std::sync::Arc<std::sync::Mutex<motion_fieldbus::EthercatBus>>;
