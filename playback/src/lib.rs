#[macro_use]
extern crate log;

mod clock;

pub use self::clock::{PlaybackClock, SubscriberID, Tick};
