//! Flow-control primitives for outbound traffic
//!
//! Throttle replays calls at a steady rate in submission order, Debounce
//! coalesces bursts down to the trailing call, and Collector generalizes
//! Debounce with a pluggable accumulation strategy. All three arm tokio
//! timers and must be used inside a runtime.

mod collector;
mod debounce;
mod throttle;

pub use collector::{CollectBatch, CollectLast, CollectStrategy, Collector};
pub use debounce::Debounce;
pub use throttle::Throttle;
