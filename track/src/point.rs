use chrono::{NaiveDateTime, Timelike};
use geom::{Angle, Distance, Duration, Pt2D, Time};
use serde::{Deserialize, Serialize};

/// One position sample of a moving object, either directly measured or synthesized by
/// interpolation.
///
/// `pos` treats the coordinates as planar, with x as longitude (east positive) and y as latitude
/// (north positive).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackPoint {
    pub pos: Pt2D,
    pub time: Time,
    /// Uncertainty of the position, as a radius around `pos`.
    pub radius: Option<Distance>,
    /// Heading, measured clockwise from north.
    pub dir: Option<Angle>,
    /// True for directly sampled points, false for interpolated ones.
    pub is_origin: bool,
    /// Ordered key/value labels to display alongside the point.
    pub info: Vec<(String, String)>,
    /// Preformatted timestamp to display.
    pub ts: Option<String>,
}

impl TrackPoint {
    pub fn new(pos: Pt2D, time: Time) -> Self {
        Self {
            pos,
            time,
            radius: None,
            dir: None,
            is_origin: true,
            info: Vec::new(),
            ts: None,
        }
    }

    /// Takes the time of day from a full datetime, ignoring the date, and keeps the formatted
    /// original around for display.
    pub fn from_datetime(pos: Pt2D, datetime: NaiveDateTime) -> Self {
        let time = datetime.time();
        let time = Time::START_OF_DAY
            + Duration::hours(time.hour() as usize)
            + Duration::minutes(time.minute() as usize)
            + Duration::seconds(time.second() as f64);

        let mut pt = Self::new(pos, time);
        pt.ts = Some(datetime.format("%Y-%m-%d %H:%M:%S").to_string());
        pt
    }
}

/// Renders a distance the way position uncertainty is usually labelled: meters with two decimals
/// below a kilometer, kilometers with two decimals beyond.
pub fn format_distance(dist: Distance) -> String {
    let meters = dist.inner_meters();
    if meters < 1000.0 {
        format!("{:.2} m", meters)
    } else {
        format!("{:.2} km", meters / 1000.0)
    }
}
