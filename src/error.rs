use thiserror::Error;

/// The primary error type for all operations in the blueprint engine.
///
/// Library operations return these as values; nothing panics across the
/// public boundary. Variants carry the stage or parameter that failed so a
/// surrounding system can craft a user-facing message.
#[derive(Debug, Error)]
pub enum BlueprintError {
    /// An input value violates a documented contract.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// The supplied bytes could not be decoded as an image.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The container format is recognized but not supported by the codec.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Decoded dimensions exceed the configured hard cap, before any resize.
    #[error("image is {width}x{height}, exceeding the configured cap of {cap}")]
    ImageTooLarge { width: u32, height: u32, cap: u32 },

    /// The image id does not resolve in the store.
    #[error("unknown image id `{0}`")]
    UnknownImage(String),

    /// The caller-supplied cancellation token fired at a stage boundary.
    #[error("cancelled during {stage}")]
    Cancelled { stage: &'static str },

    /// Codec failure, allocation failure, or a broken internal invariant.
    #[error("internal error in {stage}: {reason}")]
    Internal { stage: &'static str, reason: String },
}

impl BlueprintError {
    pub(crate) fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        BlueprintError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn internal(stage: &'static str, reason: impl Into<String>) -> Self {
        BlueprintError::Internal {
            stage,
            reason: reason.into(),
        }
    }
}

/// A specialized `Result` type for blueprint operations.
pub type Result<T> = std::result::Result<T, BlueprintError>;
