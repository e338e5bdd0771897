//! Error types for the ffnn crate.

use thiserror::Error;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the engine reports.
///
/// Dimension problems are split by when they can occur: `InvalidDimension`
/// is construction-time (a layer or network that can never exist), while
/// `DimensionMismatch` is runtime (a batch that does not fit an otherwise
/// valid layer). All validation runs before any worker is dispatched, so a
/// returned error always means no state was touched.
#[derive(Debug, Error)]
pub enum Error {
    /// A width or count that makes construction impossible.
    #[error("invalid dimension: {0}")]
    InvalidDimension(String),

    /// A batch whose shape disagrees with the layer or network.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// The operation was aborted through a `CancelToken`.
    #[error("operation was cancelled")]
    Cancelled,
}
