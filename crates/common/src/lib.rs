//! Small building blocks shared across the ebike-flow crates.

pub mod clock;
pub mod redact;

pub use clock::{Clock, ManualClock, SystemClock};
pub use redact::mask_token;
