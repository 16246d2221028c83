//! Error taxonomy for the frame pipeline.
//!
//! Only `ResourceUnavailable` and `InvalidConfig` are fatal, and only at startup.
//! Everything else is reported by the stage that hit it and the pipeline moves on
//! to the next cycle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Camera could not be opened, socket could not be bound, etc.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    PoolFull(#[from] PoolFull),

    #[error(transparent)]
    PoolEmpty(#[from] PoolEmpty),

    /// The detector rejected a frame. The frame is skipped and nothing is published.
    #[error("detection failed: {0}")]
    DetectionFailure(String),

    /// More detections than one packet can carry. Encoders clamp instead of failing;
    /// this variant exists so the clamp can be reported.
    #[error("{requested} detections exceed packet capacity of {capacity}; clamped")]
    EncodingOverflow { requested: usize, capacity: usize },

    #[error("transmission failed: {0}")]
    TransmissionFailure(#[source] std::io::Error),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),
}

/// Sentinel returned by `PoolWriter::acquire_write_slot` when every usable slot
/// holds an unread record.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("record pool is full")]
pub struct PoolFull;

/// Sentinel returned by `PoolReader::acquire_read_slot` when nothing has been committed
/// since the last read.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("record pool is empty")]
pub struct PoolEmpty;

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::ResourceUnavailable(_) | PipelineError::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_startup_errors_are_fatal() {
        assert!(PipelineError::ResourceUnavailable("camera".into()).is_fatal());
        assert!(PipelineError::InvalidConfig("pool".into()).is_fatal());
        assert!(!PipelineError::from(PoolFull).is_fatal());
        assert!(!PipelineError::from(PoolEmpty).is_fatal());
        assert!(!PipelineError::DetectionFailure("bad frame".into()).is_fatal());
        assert!(!PipelineError::EncodingOverflow {
            requested: 3000,
            capacity: 2339
        }
        .is_fatal());
    }

    #[test]
    fn overflow_message_names_both_counts() {
        let err = PipelineError::EncodingOverflow {
            requested: 10,
            capacity: 4,
        };
        assert_eq!(
            err.to_string(),
            "10 detections exceed packet capacity of 4; clamped"
        );
    }
}
