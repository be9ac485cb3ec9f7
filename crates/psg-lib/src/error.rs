use thiserror::Error;

/// Failures of the episode-marking engine.
///
/// Every variant aborts the whole scan: a failed recording yields no episodes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectError {
    #[error("invalid detector configuration: {0}")]
    Configuration(String),

    #[error("window [{start}, {end}) around sample {center} is outside channel of length {len}")]
    Range {
        center: usize,
        start: i64,
        end: i64,
        len: usize,
    },

    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    #[error("channel '{channel}' has {actual} samples, expected {expected}")]
    ChannelLength {
        channel: String,
        expected: usize,
        actual: usize,
    },

    #[error("missing channel '{0}'")]
    MissingChannel(String),
}

pub type Result<T> = std::result::Result<T, DetectError>;
