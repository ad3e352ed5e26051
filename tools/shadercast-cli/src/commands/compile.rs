//! Compile a shader program without exporting.

use std::path::PathBuf;

use shadercast_common::ShadercastError;
use shadercast_render::{create_renderer, RendererKind};

use super::read_program;

pub fn run(shader: PathBuf, backend: RendererKind) -> anyhow::Result<()> {
    let source = read_program(&shader)?;
    let mut renderer = create_renderer(backend).map_err(ShadercastError::from)?;

    match renderer.compile(&source) {
        Ok(()) => {
            println!("[OK] {} compiles ({})", shader.display(), renderer.name());
            Ok(())
        }
        Err(e) => {
            // Diagnostics in the usual file:line:col form.
            println!("{}:{e}", shader.display());
            Err(anyhow::anyhow!("Compilation failed"))
        }
    }
}
