use std::path::PathBuf;

use trellis_bsp::{BspError, BuildTargetIdentifier};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to initialize the build server: {0}")]
    Initialize(#[source] BspError),

    #[error("`{method}` failed: {source}")]
    Request {
        method: &'static str,
        #[source]
        source: BspError,
    },

    #[error("project sync was cancelled")]
    Cancelled,

    #[error("unknown build target {0}")]
    UnknownTarget(BuildTargetIdentifier),

    #[error("build target {0} could not be resolved into a module")]
    InvalidTarget(BuildTargetIdentifier),

    #[error("`{uri}` is not a file URI")]
    InvalidUri { uri: String },

    #[error("no build server connection is configured under {root}")]
    NotConfigured { root: PathBuf },

    #[error(transparent)]
    Bsp(#[from] BspError),
}

impl SyncError {
    pub(crate) fn request(method: &'static str, source: BspError) -> Self {
        if source.is_cancelled() {
            SyncError::Cancelled
        } else {
            SyncError::Request { method, source }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            SyncError::Cancelled => true,
            _ => self.bsp_error().is_some_and(BspError::is_cancelled),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.bsp_error().is_some_and(BspError::is_timeout)
    }

    fn bsp_error(&self) -> Option<&BspError> {
        match self {
            SyncError::Initialize(err) | SyncError::Bsp(err) => Some(err),
            SyncError::Request { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use trellis_bsp::FailureKind;

    #[test]
    fn cancelled_requests_collapse_into_cancelled() {
        let err = SyncError::request("buildTarget/sources", BspError::Cancelled);
        assert!(matches!(err, SyncError::Cancelled));
        assert!(err.is_cancelled());
    }

    #[test]
    fn timeouts_are_found_through_the_source_chain() {
        let err = SyncError::request(
            "buildTarget/sources",
            BspError::TimedOut {
                idle: Duration::from_secs(1),
            },
        );
        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
        assert_eq!(FailureKind::describe(&err), "Timed out");
    }
}
