pub mod countdown;
pub mod events;

pub use countdown::{Countdown, CountdownTicker, Remaining};
pub use events::{SeatUpdateEvent, SeatUpdateKind};
