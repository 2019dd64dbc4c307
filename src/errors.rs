use std::path::PathBuf;
use thiserror::Error;

/// Structured error type for the land-cover segmentation crate.
///
/// The first four variants are the ones a prediction request can end in and
/// are what the HTTP boundary maps to status codes. The rest describe
/// load-time, dataset and training failures.
#[derive(Error, Debug)]
pub enum SegError {
    #[error("Model not loaded")]
    ModelUnavailable,

    #[error("{reason}")]
    InvalidInput { reason: String },

    #[error("Image decode error: {source}")]
    ImageDecode {
        #[source]
        source: image::ImageError,
    },

    #[error("Inference error: {operation} failed: {source}")]
    InferenceFailure {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Model error: {operation} failed: {source}")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Incompatible checkpoint: {reason}")]
    IncompatibleCheckpoint { reason: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Size mismatch: {} {}x{} vs {} {}x{}",
        .image.display(), .image_size.0, .image_size.1,
        .mask.display(), .mask_size.0, .mask_size.1
    )]
    SizeMismatch {
        image: PathBuf,
        image_size: (u32, u32),
        mask: PathBuf,
        mask_size: (u32, u32),
    },

    #[error("Dataset error: {reason}")]
    Dataset { reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

pub type Result<T> = std::result::Result<T, SegError>;

impl SegError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn inference<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::InferenceFailure {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn model<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Model {
            operation: operation.into(),
            source: source.into(),
        }
    }

    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Whether the failure was caused by the caller's input rather than the server.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput { .. } | Self::ImageDecode { .. })
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Call sites that know the path and operation construct
/// [`SegError::FileSystem`] directly; this is the fallback.
impl From<std::io::Error> for SegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Image crate errors raised while reading user data are decode errors.
impl From<image::ImageError> for SegError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageDecode { source: err }
    }
}

impl From<ort::Error> for SegError {
    fn from(err: ort::Error) -> Self {
        Self::inference("ort operation", err)
    }
}

/// Shape errors only occur while reshaping tensors around a forward pass.
impl From<ndarray::ShapeError> for SegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::inference("tensor shape conversion", err)
    }
}

impl From<serde_json::Error> for SegError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for SegError {
    fn from(err: csv::Error) -> Self {
        Self::Dataset {
            reason: err.to_string(),
        }
    }
}
