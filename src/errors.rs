use thiserror::Error;

/// Caller visible hard failures. Nothing in this crate retries; a round
/// either completes or fails with one of these. Precondition violations
/// (pruning a node whose children are not leaves, deleting a root, and
/// the like) are programmer errors and panic instead.
#[derive(Debug, Error)]
pub enum BoostError {
    #[error("failed to parse input data: {0}")]
    Parse(String),
    #[error("invalid binary format: {0}")]
    BinaryFormat(String),
    #[error("column access requested before the column view was built")]
    ColumnsNotBuilt,
    #[error("column view is stale, {appended} rows appended since it was built")]
    StaleColumns { appended: usize },
    #[error("no usable features to sample for tree construction")]
    NoUsableFeatures,
    #[error("degenerate data: {0}")]
    DegenerateData(String),
    #[error("buffer index {index} exceeds prediction buffer size {size}")]
    BufferIndex { index: i64, size: usize },
    #[error("unknown {kind}: '{name}'")]
    UnknownName { kind: &'static str, name: String },
    #[error("invalid value '{value}' for parameter '{name}'")]
    BadParam { name: String, value: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
