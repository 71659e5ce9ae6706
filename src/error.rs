use thiserror::Error;

/// Errors raised by the zone store and the breach evaluator.
///
/// Every variant except `StreamEnded` is scoped to a single zone edit,
/// detection or frame, and the monitor keeps running.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HazardError {
    /// Rejected at the zone store boundary; the previous zone is retained.
    #[error("invalid zone: {0}")]
    InvalidZone(String),
    /// A single detection was dropped from a frame's evaluation.
    #[error("malformed detection: {0}")]
    MalformedDetection(String),
    /// The detector failed for a whole frame; treated as zero detections.
    #[error("detection failure: {0}")]
    DetectionFailure(String),
    #[error("frame {index} is not after frame {last}")]
    FrameOutOfOrder { index: u64, last: u64 },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Terminal end of input. The monitor loop reports this as
    /// `pipeline::StreamEnd::Ended` in its `RunSummary` rather than as an error.
    #[error("stream ended")]
    StreamEnded,
}

pub type HazardResult<T> = std::result::Result<T, HazardError>;
