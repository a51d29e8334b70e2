use thiserror::Error;

/// Errors raised while deriving the node's place in the cluster.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TopologyError {
    /// A naming segment was present but empty.
    #[error("naming segment `{0}` is empty")]
    EmptySegment(&'static str),

    /// The instance segment does not end in `-<ordinal>`.
    #[error("instance name `{0}` does not end in a numeric ordinal suffix")]
    InvalidOrdinal(String),

    /// The instance segment would split into several DNS labels.
    #[error("instance name `{0}` must be a single DNS label")]
    InvalidInstance(String),
}
