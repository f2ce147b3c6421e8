use std::collections::BTreeMap;

use geom::{Angle, Distance, Line, Time};
use serde::{Deserialize, Serialize};

use crate::{format_distance, TrackError, TrackPoint};

/// Time-ordered samples of one moving object, with exact and interpolated lookup by time.
///
/// The stored sequence is re-sorted by time after every mutation, so queries can always binary
/// search. Points sharing a time all stay in storage, but exact lookup resolves to the one added
/// last.
#[derive(Clone, Serialize, Deserialize)]
pub struct Track {
    points: Vec<TrackPoint>,
    // Maps each distinct sample time to the position in `points` of the last point added at that
    // time
    index: BTreeMap<Time, usize>,
}

impl Track {
    /// Creates a track from raw samples, in any time order. Every sample is marked as directly
    /// measured. An empty input is fine; bounds queries fail until a point is added.
    pub fn new(points: Vec<TrackPoint>) -> Result<Self, TrackError> {
        let mut track = Self {
            points: Vec::new(),
            index: BTreeMap::new(),
        };
        track.add_track_points(points)?;
        Ok(track)
    }

    pub fn add_track_point(&mut self, point: TrackPoint) -> Result<(), TrackError> {
        self.add_track_points([point])
    }

    /// Appends samples, then restores the sorted order and the exact-lookup index. If any sample
    /// is malformed, the whole batch is rejected and the track is untouched.
    pub fn add_track_points<I: IntoIterator<Item = TrackPoint>>(
        &mut self,
        points: I,
    ) -> Result<(), TrackError> {
        let mut add = Vec::new();
        for mut pt in points {
            validate(&pt)?;
            pt.is_origin = true;
            add.push(pt);
        }
        self.points.extend(add);
        self.update();
        Ok(())
    }

    fn update(&mut self) {
        // The sort must be stable: later-added points with a duplicate time wind up after
        // earlier ones, so the index below resolves ties to the last write.
        self.points.sort_by_key(|pt| pt.time);
        self.index.clear();
        for (idx, pt) in self.points.iter().enumerate() {
            self.index.insert(pt.time, idx);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn start_track_point(&self) -> Result<&TrackPoint, TrackError> {
        self.points.first().ok_or(TrackError::EmptyTrack)
    }

    pub fn end_track_point(&self) -> Result<&TrackPoint, TrackError> {
        self.points.last().ok_or(TrackError::EmptyTrack)
    }

    /// All sample times in ascending order, duplicates included.
    pub fn times(&self) -> Result<Vec<Time>, TrackError> {
        if self.points.is_empty() {
            return Err(TrackError::EmptyTrack);
        }
        Ok(self.points.iter().map(|pt| pt.time).collect())
    }

    /// Exact-match lookup only; never synthesizes. When several points share this time, the one
    /// added last wins.
    pub fn track_point_at(&self, time: Time) -> Option<&TrackPoint> {
        self.index.get(&time).map(|idx| &self.points[*idx])
    }

    pub fn all_track_points(&self) -> &[TrackPoint] {
        &self.points
    }

    /// Every sample strictly before `time` in ascending order, plus one final point for the
    /// position at exactly `time` when that falls inside the track's bounds.
    pub fn track_points_before(&self, time: Time) -> Vec<TrackPoint> {
        let mut pts: Vec<TrackPoint> = self
            .points
            .iter()
            .take_while(|pt| pt.time < time)
            .cloned()
            .collect();
        if let Some(pt) = self.interpolate(time) {
            pts.push(pt);
        }
        pts
    }

    /// The position at an arbitrary time, assuming uniform straight-line motion between the two
    /// bracketing samples. None if the track isn't active at this time. An exact hit on a stored
    /// sample passes through untouched.
    pub fn interpolate(&self, time: Time) -> Option<TrackPoint> {
        if let Some(pt) = self.track_point_at(time) {
            return Some(pt.clone());
        }
        let start = self.points.first()?;
        let end = self.points.last()?;
        if time < start.time || time > end.time {
            return None;
        }

        // No exact hit, but the time is strictly inside the bounds, so at least two samples
        // bracket it.
        let idx = self.points.partition_point(|pt| pt.time < time);
        let t0 = self.points[idx - 1].time;
        let t1 = self.points[idx].time;
        // Resolve both endpoints through the index, so duplicate times pick the same point as
        // exact lookup would.
        let p0 = &self.points[self.index[&t0]];
        let p1 = &self.points[self.index[&t1]];

        let s = p0.pos.dist_to(p1.pos);
        if s <= Distance::ZERO {
            // The object sat still between the two samples.
            let mut pt = p1.clone();
            pt.time = time;
            return Some(pt);
        }

        let pct = (time - t0) / (t1 - t0);
        let pos = match Line::new(p0.pos, p1.pos) {
            Ok(line) => line.percent_along(pct).unwrap(),
            // Distinct points closer than geom's epsilon; same as sitting still.
            Err(_) => {
                let mut pt = p1.clone();
                pt.time = time;
                return Some(pt);
            }
        };

        let radius = match (p0.radius, p1.radius) {
            (Some(r0), Some(r1)) => Some(Distance::meters(
                r0.inner_meters() + pct * (r1.inner_meters() - r0.inner_meters()),
            )),
            _ => None,
        };

        // Heading measured clockwise from north, picking the quadrant by the sign of the
        // east-west delta.
        let meters = s.inner_meters();
        let sin_dir = (p1.pos.y() - p0.pos.y()) / meters;
        let dir = if p1.pos.x() >= p0.pos.x() {
            (std::f64::consts::FRAC_PI_2 - sin_dir.asin()).to_degrees()
        } else {
            (1.5 * std::f64::consts::PI + sin_dir.asin()).to_degrees()
        };

        let mut info = Vec::new();
        if let Some(r) = radius {
            info.push(("Accuracy:".to_string(), format_distance(r)));
        }

        Some(TrackPoint {
            pos,
            time,
            radius,
            dir: Some(Angle::degrees(dir)),
            is_origin: false,
            info,
            ts: None,
        })
    }
}

fn validate(pt: &TrackPoint) -> Result<(), TrackError> {
    if !pt.time.inner_seconds().is_finite() {
        return Err(TrackError::MalformedPoint(format!(
            "non-finite time {}",
            pt.time.inner_seconds()
        )));
    }
    if !pt.pos.x().is_finite() || !pt.pos.y().is_finite() {
        return Err(TrackError::MalformedPoint(format!(
            "non-finite position ({}, {})",
            pt.pos.x(),
            pt.pos.y()
        )));
    }
    if let Some(radius) = pt.radius {
        let meters = radius.inner_meters();
        if !meters.is_finite() || meters < 0.0 {
            return Err(TrackError::MalformedPoint(format!(
                "bad radius {} m",
                meters
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use geom::{Duration, Pt2D};

    use super::*;

    fn t(seconds: f64) -> Time {
        Time::START_OF_DAY + Duration::seconds(seconds)
    }

    fn pt(lng: f64, lat: f64, time: f64) -> TrackPoint {
        TrackPoint::new(Pt2D::new(lng, lat), t(time))
    }

    fn assert_sorted(track: &Track) {
        let times = track.times().unwrap();
        for pair in times.windows(2) {
            assert!(pair[0] <= pair[1], "times out of order: {:?}", times);
        }
    }

    #[test]
    fn times_stay_sorted_through_mutations() {
        let mut track = Track::new(vec![pt(0.0, 0.0, 50.0), pt(1.0, 0.0, 10.0)]).unwrap();
        assert_sorted(&track);
        assert_eq!(track.start_track_point().unwrap().time, t(10.0));

        track.add_track_point(pt(2.0, 0.0, 30.0)).unwrap();
        assert_sorted(&track);

        track
            .add_track_points(vec![pt(3.0, 0.0, 5.0), pt(4.0, 0.0, 40.0)])
            .unwrap();
        assert_sorted(&track);
        assert_eq!(track.start_track_point().unwrap().time, t(5.0));
        assert_eq!(track.end_track_point().unwrap().time, t(50.0));
        assert_eq!(track.all_track_points().len(), 5);
    }

    #[test]
    fn exact_lookup_never_synthesizes() {
        let track = Track::new(vec![pt(0.0, 0.0, 0.0), pt(10.0, 0.0, 10.0)]).unwrap();
        assert_eq!(track.track_point_at(t(10.0)).unwrap().pos, Pt2D::new(10.0, 0.0));
        assert!(track.track_point_at(t(5.0)).is_none());
    }

    #[test]
    fn duplicate_times_resolve_to_the_last_write() {
        let mut track = Track::new(vec![pt(0.0, 0.0, 0.0), pt(1.0, 1.0, 5.0)]).unwrap();
        track.add_track_point(pt(2.0, 2.0, 5.0)).unwrap();

        // Both points stay in storage, but lookup sees the later one.
        assert_eq!(track.times().unwrap(), vec![t(0.0), t(5.0), t(5.0)]);
        assert_eq!(track.track_point_at(t(5.0)).unwrap().pos, Pt2D::new(2.0, 2.0));
    }

    #[test]
    fn interpolates_position_radius_and_heading() {
        let mut p0 = pt(0.0, 0.0, 0.0);
        p0.radius = Some(Distance::meters(10.0));
        let mut p1 = pt(10.0, 0.0, 10.0);
        p1.radius = Some(Distance::meters(20.0));
        let track = Track::new(vec![p0, p1]).unwrap();

        let mid = track.interpolate(t(5.0)).unwrap();
        assert_eq!(mid.time, t(5.0));
        assert!((mid.pos.x() - 5.0).abs() < 1e-6);
        assert!(mid.pos.y().abs() < 1e-6);
        assert_eq!(mid.radius, Some(Distance::meters(15.0)));
        assert!(!mid.is_origin);
        // Due east
        assert!((mid.dir.unwrap().normalized_degrees() - 90.0).abs() < 1e-6);
        assert_eq!(
            mid.info,
            vec![("Accuracy:".to_string(), "15.00 m".to_string())]
        );

        // The fraction along the segment matches the fraction of elapsed time
        let quarter = track.interpolate(t(2.5)).unwrap();
        assert!((quarter.pos.x() - 2.5).abs() < 1e-6);
    }

    #[test]
    fn heading_covers_all_quadrants() {
        for (dx, dy, want) in [
            (0.0, 5.0, 0.0),
            (5.0, 0.0, 90.0),
            (0.0, -5.0, 180.0),
            (-5.0, 0.0, 270.0),
        ] {
            let track = Track::new(vec![pt(10.0, 10.0, 0.0), pt(10.0 + dx, 10.0 + dy, 10.0)])
                .unwrap();
            let got = track
                .interpolate(t(5.0))
                .unwrap()
                .dir
                .unwrap()
                .normalized_degrees();
            assert!(
                (got - want).abs() < 1e-6,
                "heading for delta ({}, {}): got {}, want {}",
                dx,
                dy,
                got,
                want
            );
        }
    }

    #[test]
    fn coincident_points_return_the_later_sample() {
        let mut p0 = pt(3.0, 4.0, 0.0);
        p0.radius = Some(Distance::meters(5.0));
        let mut p1 = pt(3.0, 4.0, 10.0);
        p1.radius = Some(Distance::meters(7.0));
        let track = Track::new(vec![p0, p1]).unwrap();

        let got = track.interpolate(t(4.0)).unwrap();
        assert_eq!(got.time, t(4.0));
        assert_eq!(got.pos, Pt2D::new(3.0, 4.0));
        assert_eq!(got.radius, Some(Distance::meters(7.0)));
        assert!(got.is_origin);
        assert!(got.dir.is_none());
    }

    #[test]
    fn exact_hits_pass_through_untouched() {
        let track = Track::new(vec![pt(0.0, 0.0, 0.0), pt(10.0, 0.0, 10.0)]).unwrap();

        // Both a midpoint sample and the last sample: no dir or info gets patched in.
        let end = track.interpolate(t(10.0)).unwrap();
        assert!(end.is_origin);
        assert!(end.dir.is_none());
        assert!(end.info.is_empty());
    }

    #[test]
    fn queries_outside_bounds_synthesize_nothing() {
        let track = Track::new(vec![pt(0.0, 0.0, 100.0), pt(10.0, 0.0, 200.0)]).unwrap();

        assert!(track.interpolate(t(50.0)).is_none());
        assert!(track.interpolate(t(250.0)).is_none());

        // Before the start: nothing at all. After the end: only stored points, no tail.
        assert!(track.track_points_before(t(50.0)).is_empty());
        let after = track.track_points_before(t(250.0));
        assert_eq!(after.len(), 2);
        assert!(after.iter().all(|pt| pt.is_origin));
    }

    #[test]
    fn points_before_ends_with_a_synthesized_tail() {
        let track = Track::new(vec![pt(0.0, 0.0, 0.0), pt(10.0, 0.0, 10.0)]).unwrap();

        let pts = track.track_points_before(t(5.0));
        assert_eq!(pts.len(), 2);
        assert!(pts[0].is_origin);
        let tail = &pts[1];
        assert!(!tail.is_origin);
        assert_eq!(tail.time, t(5.0));
        assert!((tail.pos.x() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn interpolation_brackets_respect_the_last_write() {
        let track = Track::new(vec![
            pt(0.0, 0.0, 0.0),
            pt(100.0, 100.0, 5.0),
            // Same time as above, added later: this one wins as the bracket start.
            pt(0.0, 0.0, 5.0),
            pt(10.0, 0.0, 15.0),
        ])
        .unwrap();

        let got = track.interpolate(t(10.0)).unwrap();
        assert!((got.pos.x() - 5.0).abs() < 1e-6);
        assert!(got.pos.y().abs() < 1e-6);
    }

    #[test]
    fn empty_track_bounds_queries_fail() {
        let track = Track::new(Vec::new()).unwrap();
        assert!(track.is_empty());
        assert_eq!(track.start_track_point().unwrap_err(), TrackError::EmptyTrack);
        assert_eq!(track.end_track_point().unwrap_err(), TrackError::EmptyTrack);
        assert_eq!(track.times().unwrap_err(), TrackError::EmptyTrack);
        assert!(track.interpolate(t(0.0)).is_none());
        assert!(track.track_points_before(t(0.0)).is_empty());
    }

    #[test]
    fn malformed_points_are_rejected_whole() {
        let mut track = Track::new(vec![pt(0.0, 0.0, 0.0)]).unwrap();

        let mut bad = pt(1.0, 1.0, 5.0);
        bad.radius = Some(Distance::meters(-3.0));
        let err = track
            .add_track_points(vec![pt(2.0, 2.0, 3.0), bad])
            .unwrap_err();
        assert!(matches!(err, TrackError::MalformedPoint(_)));
        // The valid point in the same batch didn't sneak in
        assert_eq!(track.times().unwrap(), vec![t(0.0)]);
    }

    #[test]
    fn single_point_track_returns_the_sole_point() {
        let track = Track::new(vec![pt(7.0, 8.0, 42.0)]).unwrap();
        let got = track.interpolate(t(42.0)).unwrap();
        assert_eq!(got.pos, Pt2D::new(7.0, 8.0));
        assert!(got.is_origin);
        assert!(track.interpolate(t(41.0)).is_none());
    }
}
