//! Failure taxonomy for a resize run.
//!
//! Every failure is terminal: the pipeline never retries, it maps the
//! collaborator's error to the narrowest kind below and returns it. Each
//! message starts with the kind name so the single diagnostic line printed
//! by the binary identifies what went wrong.

use crate::config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResizeError {
    #[error("InvalidSizeSpec: {0:?} is not one of WxH, Wx, xH")]
    InvalidSizeSpec(String),
    #[error("InvalidQuality: {0} is outside 1-100")]
    InvalidQuality(i64),
    #[error("ImageLoadFailed: {0}")]
    ImageLoadFailed(String),
    #[error("GainMapMissing: source has no HDR gain map asset")]
    GainMapMissing,
    #[error("GainMapLoadFailed: {0}")]
    GainMapLoadFailed(String),
    #[error("ResizeFailed: {0}")]
    ResizeFailed(String),
    #[error("EncodingFailed: {0}")]
    EncodingFailed(String),
    #[error("UnsupportedFormat: {0:?} (expected .jpg, .jpeg or .heic)")]
    UnsupportedFormat(String),
    #[error("WriteFailed: {0}")]
    WriteFailed(String),
    #[error("Config: {0}")]
    Config(#[from] ConfigError),
}

impl ResizeError {
    /// Name of the failure kind, as it appears at the start of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSizeSpec(_) => "InvalidSizeSpec",
            Self::InvalidQuality(_) => "InvalidQuality",
            Self::ImageLoadFailed(_) => "ImageLoadFailed",
            Self::GainMapMissing => "GainMapMissing",
            Self::GainMapLoadFailed(_) => "GainMapLoadFailed",
            Self::ResizeFailed(_) => "ResizeFailed",
            Self::EncodingFailed(_) => "EncodingFailed",
            Self::UnsupportedFormat(_) => "UnsupportedFormat",
            Self::WriteFailed(_) => "WriteFailed",
            Self::Config(_) => "Config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_starts_with_kind() {
        let errors = [
            ResizeError::InvalidSizeSpec("12".into()),
            ResizeError::InvalidQuality(101),
            ResizeError::ImageLoadFailed("truncated".into()),
            ResizeError::GainMapMissing,
            ResizeError::GainMapLoadFailed("no width".into()),
            ResizeError::ResizeFailed("zero height".into()),
            ResizeError::EncodingFailed("stride".into()),
            ResizeError::UnsupportedFormat("png".into()),
            ResizeError::WriteFailed("denied".into()),
        ];
        for err in errors {
            let msg = err.to_string();
            assert!(
                msg.starts_with(err.kind()),
                "{msg:?} should start with {}",
                err.kind()
            );
        }
    }

    #[test]
    fn quality_message_names_value() {
        assert_eq!(
            ResizeError::InvalidQuality(-5).to_string(),
            "InvalidQuality: -5 is outside 1-100"
        );
    }
}
