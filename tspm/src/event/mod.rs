pub mod bus;
pub mod cancellation;
pub mod channel;
pub mod record;

pub use bus::{EventBus, ListenerId};
pub use record::{Event, EventPriority, EventType};
