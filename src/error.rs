use thiserror::Error;

/// Errors raised while validating a [wide residual network config](crate::WideResNetConfig).
///
/// All of them are detected before any parameter is allocated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid depth {0}: depth must be at least 4 and satisfy (depth - 4) % 6 == 0")]
    InvalidDepth(usize),

    #[error("Width multiplier must be positive")]
    ZeroWidthMultiplier,

    #[error("Image side must be positive")]
    ZeroImageSide,

    #[error("Pooling window must be positive")]
    InvalidPoolingWindow,

    #[error("Block channel counts must be positive, got {in_channels} -> {out_channels}")]
    InvalidChannels {
        in_channels: usize,
        out_channels: usize,
    },

    #[error("Block stride must be positive")]
    ZeroStride,

    #[error("A stage requires at least one block")]
    EmptyStage,
}

pub type Result<T> = core::result::Result<T, ConfigError>;
