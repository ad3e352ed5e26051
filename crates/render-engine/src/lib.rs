//! Shadercast Render Engine
//!
//! The render engine turns a compiled shader program plus per-frame
//! uniforms into pixels:
//!
//! ```text
//! shader source ──compile──▶ program
//!                               │
//! (time, audio level, res) ─────┤
//!                               ▼
//!                     render ──▶ RenderSurface (BGRA8)
//! ```
//!
//! Rendering is synchronous: `render` returns only once every pixel of
//! the target surface is final, so the caller may hand the memory to an
//! encoder immediately afterwards.
//!
//! Backends:
//! - [`ProceduralRenderer`]: CPU, always available. Programs are JSON
//!   documents selecting a procedural pattern.
//! - `WgpuRenderer` (feature `gpu`): WGSL fragment programs rendered
//!   offscreen and read back into the surface.

pub mod engine;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod procedural;
pub mod surface;

pub use engine::*;
#[cfg(feature = "gpu")]
pub use gpu::WgpuRenderer;
pub use procedural::ProceduralRenderer;
pub use surface::*;
