pub mod audio;
pub mod check;
pub mod compile;
pub mod config;
pub mod export;

use std::path::Path;

use shadercast_common::{ShadercastError, ShadercastResult};

/// Read a shader program from disk.
pub fn read_program(path: &Path) -> ShadercastResult<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ShadercastError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => ShadercastError::Io(e),
    })
}
