//! Session failure taxonomy.
//!
//! Only `SourceOpen` ends a session and reaches the caller. The other
//! variants are absorbed by the processing loop and exist so that log lines
//! carry a stable, greppable category.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The frame source could not be opened. Fatal to the session.
    SourceOpen { source: String, reason: String },
    /// A single frame's detection call failed. Treated as zero detections.
    Detector { frame: u64, reason: String },
    /// Image write or store insert failed. The rate limiter still advanced.
    PersistenceWrite { target: String, reason: String },
    /// Alarm audio unavailable. The controller runs state-only.
    AlarmAsset { reason: String },
}

impl StreamError {
    pub fn source_open(source: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::SourceOpen {
            source: source.into(),
            reason: format!("{:#}", err),
        }
    }

    /// Whether this failure ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SourceOpen { .. })
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceOpen { source, reason } => {
                write!(f, "SourceOpenFailure: cannot open {}: {}", source, reason)
            }
            Self::Detector { frame, reason } => {
                write!(f, "DetectorFailure: frame #{}: {}", frame, reason)
            }
            Self::PersistenceWrite { target, reason } => {
                write!(f, "PersistenceWriteFailure: {}: {}", target, reason)
            }
            Self::AlarmAsset { reason } => write!(f, "AlarmAssetFailure: {}", reason),
        }
    }
}

impl std::error::Error for StreamError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_source_open_is_fatal() {
        let err = anyhow::anyhow!("no such file");
        assert!(StreamError::source_open("clip.mp4", &err).is_fatal());
        assert!(!StreamError::Detector {
            frame: 3,
            reason: "model error".into()
        }
        .is_fatal());
        assert!(!StreamError::AlarmAsset {
            reason: "no device".into()
        }
        .is_fatal());
    }

    #[test]
    fn display_names_the_category() {
        let err = StreamError::PersistenceWrite {
            target: "results/x.jpg".into(),
            reason: "disk full".into(),
        };
        assert_eq!(
            err.to_string(),
            "PersistenceWriteFailure: results/x.jpg: disk full"
        );
    }
}
