mod error;
mod point;
mod track;

pub use self::error::TrackError;
pub use self::point::{format_distance, TrackPoint};
pub use self::track::Track;
