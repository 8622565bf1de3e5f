//! Delivery side of the pipeline: pacing, edit emulation, per-turn state.
//!
//! Ordering rules live here. The throttle decides when an update may go
//! out, the edit emulator makes post/recall look like an in-place edit,
//! the keyed locks keep concurrent work on one thread sequential, and the
//! turn delivery ties them to the domain-event stream.

pub mod editor;
pub mod lock;
pub mod throttle;
pub mod turn;

pub use editor::EditEmulator;
pub use lock::KeyedLocks;
pub use throttle::{DeliveryThrottle, FlushDecision};
pub use turn::TurnDelivery;
