use thiserror::Error;

use crate::platform::timeline::EntryType;

/// Errors raised inside the collection engine.
///
/// None of these cross a collector boundary: unsupported capabilities are
/// converted to an absent value where they are detected.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("entry type `{0}` is not supported by this host")]
    UnsupportedEntryType(EntryType),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
