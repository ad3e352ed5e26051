//! The render engine contract shared by every backend.

use serde::{Deserialize, Serialize};

use crate::surface::RenderSurface;

/// Per-frame inputs handed to a compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameParams {
    /// Presentation time of the frame in seconds.
    pub time: f32,

    /// Normalized audio level in `[0, 1]`.
    pub audio_level: f32,

    /// Target width and height in pixels.
    pub resolution: [f32; 2],
}

impl FrameParams {
    pub fn new(time: f32, audio_level: f32, width: u32, height: u32) -> Self {
        Self {
            time,
            audio_level,
            resolution: [width as f32, height as f32],
        }
    }
}

/// Shader compilation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.render_message())]
pub struct CompileError {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }

    fn render_message(&self) -> String {
        match (self.line, self.column) {
            (Some(line), Some(col)) => format!("{}:{}: {}", line, col, self.message),
            (Some(line), None) => format!("{}: {}", line, self.message),
            _ => self.message.clone(),
        }
    }
}

/// Failure while rendering one frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("no program has been compiled")]
    NotCompiled,

    #[error("surface is {actual_width}x{actual_height}, expected {width}x{height}")]
    SurfaceMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("render backend error: {0}")]
    Backend(String),
}

impl From<CompileError> for shadercast_common::ShadercastError {
    fn from(err: CompileError) -> Self {
        Self::render(format!("compile failed: {err}"))
    }
}

impl From<RenderError> for shadercast_common::ShadercastError {
    fn from(err: RenderError) -> Self {
        Self::render(err.to_string())
    }
}

/// Something that compiles shader programs and renders frames synchronously.
///
/// `render` must not return until the surface holds the final pixels.
pub trait RenderEngine: Send {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Compile `source`, replacing any previous program on success.
    /// On failure the previous program (if any) stays active.
    fn compile(&mut self, source: &str) -> Result<(), CompileError>;

    /// Whether a program is ready to render.
    fn is_compiled(&self) -> bool;

    /// Render one frame into `surface`.
    fn render(&mut self, surface: &mut RenderSurface<'_>, params: &FrameParams)
        -> Result<(), RenderError>;
}

/// Selectable render backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    Cpu,
    Gpu,
}

impl std::str::FromStr for RendererKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            other => Err(format!("unknown renderer '{other}' (expected cpu or gpu)")),
        }
    }
}

/// Construct a renderer of the given kind.
pub fn create_renderer(kind: RendererKind) -> Result<Box<dyn RenderEngine>, RenderError> {
    match kind {
        RendererKind::Cpu => Ok(Box::new(crate::procedural::ProceduralRenderer::new())),
        #[cfg(feature = "gpu")]
        RendererKind::Gpu => Ok(Box::new(crate::gpu::WgpuRenderer::new()?)),
        #[cfg(not(feature = "gpu"))]
        RendererKind::Gpu => Err(RenderError::Backend(
            "GPU renderer not built; enable the `gpu` feature".into(),
        )),
    }
}

/// Check that `surface` matches the expected frame size.
pub fn check_surface(
    surface: &RenderSurface<'_>,
    width: u32,
    height: u32,
) -> Result<(), RenderError> {
    if surface.width() != width || surface.height() != height {
        return Err(RenderError::SurfaceMismatch {
            width,
            height,
            actual_width: surface.width(),
            actual_height: surface.height(),
        });
    }
    Ok(())
}

/// Check that a `width`x`height` target fits a backend's texture limit.
pub fn check_target_size(width: u32, height: u32, max_dimension: u32) -> Result<(), RenderError> {
    if width == 0 || height == 0 {
        return Err(RenderError::Backend(format!(
            "cannot create a {width}x{height} render target"
        )));
    }
    if width > max_dimension || height > max_dimension {
        return Err(RenderError::Backend(format!(
            "{width}x{height} exceeds the device texture limit of {max_dimension}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_display() {
        assert_eq!(CompileError::at("bad", 3, 7).to_string(), "3:7: bad");
        assert_eq!(CompileError::new("bad").to_string(), "bad");
    }

    #[test]
    fn test_renderer_kind_parse() {
        assert_eq!("CPU".parse::<RendererKind>().unwrap(), RendererKind::Cpu);
        assert_eq!("gpu".parse::<RendererKind>().unwrap(), RendererKind::Gpu);
        assert!("vulkan".parse::<RendererKind>().is_err());
    }

    #[test]
    fn test_cpu_renderer_always_available() {
        let renderer = create_renderer(RendererKind::Cpu).unwrap();
        assert_eq!(renderer.name(), "procedural");
        assert!(!renderer.is_compiled());
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn test_gpu_renderer_requires_feature() {
        assert!(matches!(
            create_renderer(RendererKind::Gpu),
            Err(RenderError::Backend(_))
        ));
    }

    #[test]
    fn test_check_surface() {
        let mut data = vec![0u8; 4 * 4 * 2];
        let surface = RenderSurface::packed(4, 2, &mut data).unwrap();
        assert!(check_surface(&surface, 4, 2).is_ok());
        assert!(matches!(
            check_surface(&surface, 2, 4),
            Err(RenderError::SurfaceMismatch { .. })
        ));
    }

    #[test]
    fn test_target_size_respects_device_limit() {
        assert!(check_target_size(8192, 4320, 8192).is_ok());
        assert!(matches!(
            check_target_size(16384, 8, 8192),
            Err(RenderError::Backend(_))
        ));
        assert!(matches!(
            check_target_size(8, 8193, 8192),
            Err(RenderError::Backend(_))
        ));
        assert!(check_target_size(0, 8, 8192).is_err());
    }

    #[test]
    fn test_errors_convert_to_shared_error() {
        use shadercast_common::ShadercastError;

        let shared: ShadercastError = RenderError::NotCompiled.into();
        assert_eq!(shared.to_string(), "Render error: no program has been compiled");
        let shared: ShadercastError = CompileError::at("bad", 1, 2).into();
        assert!(shared.to_string().contains("1:2: bad"));
    }
}
