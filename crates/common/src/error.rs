//! Error types shared across Shadercast crates.

use std::path::PathBuf;

/// Top-level error type for Shadercast operations.
#[derive(Debug, thiserror::Error)]
pub enum ShadercastError {
    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Export error: {message}")]
    Export { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type alias using ShadercastError.
pub type ShadercastResult<T> = Result<T, ShadercastError>;

impl ShadercastError {
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        assert!(ShadercastError::render("x")
            .to_string()
            .starts_with("Render error:"));
        assert!(ShadercastError::export("x")
            .to_string()
            .starts_with("Export error:"));
        assert!(ShadercastError::unsupported("gpu")
            .to_string()
            .contains("gpu"));
    }

    #[test]
    fn test_io_is_transparent() {
        let err: ShadercastError = std::io::Error::other("disk full").into();
        assert_eq!(err.to_string(), "disk full");
    }
}
