use std::path::PathBuf;

/// Convenience result type used across alchemist.
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Error taxonomy for batch runs and the internal frame pipeline.
///
/// Everything except [`ConvertError::Prerequisite`] is caught at the file
/// loop boundary and turned into a failed job.
#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    /// Nothing to convert, no output directory, or no external tool.
    #[error("cannot start batch: {0}")]
    Prerequisite(String),

    /// Malformed or static (non-animated) source image.
    #[error("decode error: {0}")]
    Decode(String),

    /// A frame handed to a raster sink does not match the declared size.
    #[error("frame size mismatch: got {got_width}x{got_height}, expected {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },

    /// Encoder contract violation or encoder failure.
    #[error("encode error: {0}")]
    Encode(String),

    /// Non-zero exit or timeout from the external tool.
    #[error("external tool failed: {0}")]
    ExternalTool(String),

    /// The batch was stopped while this file was being converted.
    #[error("conversion stopped")]
    Stopped,

    /// Invalid configuration file or values.
    #[error("config error: {0}")]
    Config(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConvertError {
    pub fn prerequisite(msg: impl Into<String>) -> Self {
        Self::Prerequisite(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalTool(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
