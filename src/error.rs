//! attngan error types

/// attngan result type
pub type Result<T> = std::result::Result<T, Error>;

/// attngan errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A tensor or configuration has dimensions a module cannot work with
    #[error("shape mismatch in {module}: {reason}")]
    ShapeMismatch {
        /// Module that rejected the shape
        module: &'static str,
        /// What was expected and what was found
        reason: String,
    },

    /// A configuration value is out of range
    #[error("invalid configuration for {module}: {reason}")]
    InvalidConfig {
        /// Module being configured
        module: &'static str,
        /// Why it's invalid
        reason: String,
    },

    /// Pretrained weights could not be read
    #[error("failed to load weights from {path}: {reason}")]
    Record {
        /// Record file that was requested
        path: String,
        /// Recorder failure
        reason: String,
    },

    /// Image encoding or writing failed
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    pub(crate) fn shape(module: &'static str, reason: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            module,
            reason: reason.into(),
        }
    }

    pub(crate) fn config(module: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            module,
            reason: reason.into(),
        }
    }
}

/// Checks the channel axis of an NCHW tensor shape.
pub(crate) fn ensure_channels(
    module: &'static str,
    dims: [usize; 4],
    expected: usize,
) -> Result<()> {
    if dims[1] != expected {
        return Err(Error::shape(
            module,
            format!("expected {expected} input channels, got {} ({dims:?})", dims[1]),
        ));
    }
    Ok(())
}

/// Checks that both spatial axes are at least `min` wide.
pub(crate) fn ensure_min_spatial(module: &'static str, dims: [usize; 4], min: usize) -> Result<()> {
    let [_, _, height, width] = dims;
    if height < min || width < min {
        return Err(Error::shape(
            module,
            format!("spatial size {height}x{width} is smaller than the minimum {min}x{min}"),
        ));
    }
    Ok(())
}
