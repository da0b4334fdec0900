use thiserror::Error;

/// Errors returned by sd-paint operations.
///
/// Backend transport and status failures are *not* represented here: the
/// [`SdClient`](crate::SdClient) normalizes them into response statuses so
/// the scheduler can apply one uniform status check.
#[derive(Error, Debug)]
pub enum PaintError {
    /// The generation server returned a non-success HTTP status.
    #[error("Server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// The response from the server was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),

    /// Image decode/encode failure.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Base64 payload could not be decoded.
    #[error("Invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local file I/O failure with context.
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    /// Invalid or missing configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A preset slot was missing or malformed.
    #[error("{0}")]
    Preset(String),

    #[error("{0}")]
    Other(String),
}

impl PaintError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PaintError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, PaintError>;
