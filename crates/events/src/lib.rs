//! In-process fan-out: lifecycle events and live execution output.

pub mod bus;
pub mod stream;

pub use bus::{EventBus, ExecutionEvent};
pub use stream::{LogStreamer, Subscription};
