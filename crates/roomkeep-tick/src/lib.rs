//! Time for roomkeep: where "now" comes from, and when the next
//! maintenance pass is due.
//!
//! - [`Clock`] is the injectable time source. [`SystemClock`] follows the
//!   Tokio clock (so paused-time tests see it move), [`ManualClock`] only
//!   moves when told to.
//! - [`TickScheduler`] fires at a fixed interval, skips ticks it missed
//!   and warns when a pass eats most of the interval.
//!
//! # Integration
//!
//! The scheduler sits inside a `tokio::select!` loop next to a stop signal:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = &mut stop_rx => break,
//!         _ = scheduler.wait_for_tick() => {
//!             manager.lock().await.maintain();
//!             scheduler.record_tick_end();
//!         }
//!     }
//! }
//! ```

mod clock;
mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use scheduler::{TickConfig, TickInfo, TickScheduler};
