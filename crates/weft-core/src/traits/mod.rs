pub mod clock;
pub mod registry;
pub mod signal;
pub mod sink;

pub use clock::{Clock, ManualClock, SystemClock};
pub use registry::CheckpointRegistry;
pub use signal::{ChangeSignal, SignalHandler, SubscriptionId};
pub use sink::CacheSink;
