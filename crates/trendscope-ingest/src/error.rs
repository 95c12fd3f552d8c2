use thiserror::Error;
use trendscope_core::Platform;

/// A batch that cannot be mapped onto the canonical schema.
///
/// The whole batch is dropped; re-fetching is the adapter's concern.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("normalization failed for {platform} batch: {reason}")]
pub struct NormalizationError {
    pub platform: Platform,
    pub reason: String,
}

impl NormalizationError {
    pub(crate) fn new(platform: Platform, reason: impl Into<String>) -> Self {
        Self {
            platform,
            reason: reason.into(),
        }
    }
}
