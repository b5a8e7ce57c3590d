use crate::engine::ResourceKind;
use thiserror::Error;

/// Failures reported by the file and DTMF playback entry points.
///
/// Arbitration entry points never fail: a missing resource there only means
/// nothing is heard.
#[derive(Debug, Error)]
pub enum ToneError {
    #[error("no {0:?} resource available")]
    ResourceUnavailable(ResourceKind),

    #[error("failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid dtmf digit: {0:?}")]
    InvalidDigit(char),

    #[error("audio engine error: {0}")]
    Engine(#[from] anyhow::Error),

    #[error("tone service is closed")]
    ServiceClosed,
}
