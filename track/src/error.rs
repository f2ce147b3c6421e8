use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum TrackError {
    /// Bounds were queried on a track with zero points.
    #[error("track has no points")]
    EmptyTrack,
    /// A sample failed validation at the insert boundary.
    #[error("malformed track point: {0}")]
    MalformedPoint(String),
}
