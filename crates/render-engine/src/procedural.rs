//! CPU procedural backend.
//!
//! Programs are small JSON documents:
//!
//! ```json
//! { "pattern": "plasma", "speed": 1.0, "palette": ["#10002b", "#ff5ecb"], "audio_gain": 1.0 }
//! ```
//!
//! Every pixel is a pure function of its normalized coordinate, the frame
//! time, the audio level and the resolution, so two renders with the same
//! [`FrameParams`] produce identical bytes.

use serde::Deserialize;

use crate::engine::{CompileError, FrameParams, RenderEngine, RenderError};
use crate::surface::RenderSurface;

/// Upper bound on palette stops.
const MAX_PALETTE: usize = 16;

/// Built-in patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// First palette colour, brightened by audio.
    Solid,
    /// Horizontal sweep through the palette, scrolling with time.
    Gradient,
    /// Sum-of-sines plasma.
    Plasma,
    /// Concentric rings moving outwards.
    Rings,
    /// A disc whose radius follows the audio level.
    Pulse,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProgramSource {
    pattern: Pattern,
    #[serde(default = "default_speed")]
    speed: f32,
    #[serde(default = "default_palette")]
    palette: Vec<String>,
    #[serde(default = "default_audio_gain")]
    audio_gain: f32,
}

fn default_speed() -> f32 {
    1.0
}

fn default_palette() -> Vec<String> {
    vec!["#000000".into(), "#ffffff".into()]
}

fn default_audio_gain() -> f32 {
    1.0
}

/// A validated procedural program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub pattern: Pattern,
    pub speed: f32,
    pub palette: Vec<[f32; 3]>,
    pub audio_gain: f32,
}

impl Program {
    /// Parse and validate program source.
    pub fn parse(source: &str) -> Result<Self, CompileError> {
        if source.trim().is_empty() {
            return Err(CompileError::new("empty program"));
        }

        let raw: ProgramSource = serde_json::from_str(source)
            .map_err(|e| CompileError::at(e.to_string(), e.line(), e.column()))?;

        if !raw.speed.is_finite() {
            return Err(CompileError::new("speed must be finite"));
        }
        if !raw.audio_gain.is_finite() || raw.audio_gain < 0.0 {
            return Err(CompileError::new("audio_gain must be a finite, non-negative number"));
        }
        if raw.palette.is_empty() || raw.palette.len() > MAX_PALETTE {
            return Err(CompileError::new(format!(
                "palette must have between 1 and {} colours, got {}",
                MAX_PALETTE,
                raw.palette.len()
            )));
        }

        let palette = raw
            .palette
            .iter()
            .map(|c| parse_hex_colour(c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            pattern: raw.pattern,
            speed: raw.speed,
            palette,
            audio_gain: raw.audio_gain,
        })
    }

    /// Shade one pixel. `uv` is in `[0, 1]^2`; the result is RGBA.
    pub fn shade(&self, uv: [f32; 2], params: &FrameParams) -> [u8; 4] {
        let t = params.time * self.speed;
        let audio = params.audio_level.clamp(0.0, 1.0) * self.audio_gain;
        let aspect = if params.resolution[1] > 0.0 {
            params.resolution[0] / params.resolution[1]
        } else {
            1.0
        };
        let dx = (uv[0] - 0.5) * aspect;
        let dy = uv[1] - 0.5;
        let dist = (dx * dx + dy * dy).sqrt();

        let (value, brightness) = match self.pattern {
            Pattern::Solid => (0.0, 1.0 + audio),
            Pattern::Gradient => ((uv[0] + t * 0.1).rem_euclid(1.0), 1.0 + 0.5 * audio),
            Pattern::Plasma => {
                let s = (uv[0] * 10.0 + t).sin()
                    + (uv[1] * 10.0 + t * 1.3).sin()
                    + ((uv[0] + uv[1]) * 7.0 + t * 0.7).sin()
                    + (dist * 12.0 - t).sin();
                ((s / 4.0) * 0.5 + 0.5, 1.0 + 0.5 * audio)
            }
            Pattern::Rings => (0.5 + 0.5 * (dist * 40.0 - t * 4.0).sin(), 1.0 + 0.5 * audio),
            Pattern::Pulse => {
                let radius = 0.1 + 0.35 * audio.min(1.0);
                let edge = ((radius - dist) * 40.0).clamp(0.0, 1.0);
                (edge, 1.0)
            }
        };

        let rgb = self.sample_palette(value.clamp(0.0, 1.0));
        let to_byte = |c: f32| ((c * brightness).clamp(0.0, 1.0) * 255.0).round() as u8;
        [to_byte(rgb[0]), to_byte(rgb[1]), to_byte(rgb[2]), 255]
    }

    fn sample_palette(&self, value: f32) -> [f32; 3] {
        if self.palette.len() == 1 {
            return self.palette[0];
        }
        let scaled = value * (self.palette.len() - 1) as f32;
        let i = (scaled.floor() as usize).min(self.palette.len() - 2);
        let f = scaled - i as f32;
        let (a, b) = (self.palette[i], self.palette[i + 1]);
        [
            a[0] + (b[0] - a[0]) * f,
            a[1] + (b[1] - a[1]) * f,
            a[2] + (b[2] - a[2]) * f,
        ]
    }
}

fn parse_hex_colour(s: &str) -> Result<[f32; 3], CompileError> {
    let hex = s
        .strip_prefix('#')
        .filter(|h| h.len() == 6 && h.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| CompileError::new(format!("invalid colour '{s}', expected #rrggbb")))?;
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .map(|v| v as f32 / 255.0)
            .map_err(|_| CompileError::new(format!("invalid colour '{s}'")))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

/// CPU renderer for procedural programs.
#[derive(Debug, Default)]
pub struct ProceduralRenderer {
    program: Option<Program>,
}

impl ProceduralRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active program, if any.
    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }
}

impl RenderEngine for ProceduralRenderer {
    fn name(&self) -> &'static str {
        "procedural"
    }

    fn compile(&mut self, source: &str) -> Result<(), CompileError> {
        let program = Program::parse(source)?;
        tracing::debug!(pattern = ?program.pattern, colours = program.palette.len(), "Compiled procedural program");
        self.program = Some(program);
        Ok(())
    }

    fn is_compiled(&self) -> bool {
        self.program.is_some()
    }

    fn render(
        &mut self,
        surface: &mut RenderSurface<'_>,
        params: &FrameParams,
    ) -> Result<(), RenderError> {
        let program = self.program.as_ref().ok_or(RenderError::NotCompiled)?;
        let (w, h) = (surface.width(), surface.height());
        if w == 0 || h == 0 {
            return Ok(());
        }

        for y in 0..h {
            let v = (y as f32 + 0.5) / h as f32;
            let row = surface.row_mut(y);
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let u = (x as f32 + 0.5) / w as f32;
                let [r, g, b, a] = program.shade([u, v], params);
                px.copy_from_slice(&[b, g, r, a]);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn render(renderer: &mut ProceduralRenderer, params: &FrameParams, w: u32, h: u32) -> Vec<u8> {
        let mut data = vec![0u8; (w * h * 4) as usize];
        let mut surface = RenderSurface::packed(w, h, &mut data).unwrap();
        renderer.render(&mut surface, params).unwrap();
        data
    }

    #[test]
    fn test_compile_reports_position() {
        let mut r = ProceduralRenderer::new();
        let err = r.compile("{\n  \"pattern\": \"plasma\",\n  oops\n}").unwrap_err();
        assert_eq!(err.line, Some(3));
        assert!(err.column.is_some());
        assert!(!r.is_compiled());
    }

    #[test]
    fn test_compile_rejects_unknown_pattern_and_fields() {
        let mut r = ProceduralRenderer::new();
        assert!(r.compile(r#"{"pattern":"fractal"}"#).is_err());
        assert!(r.compile(r##"{"pattern":"solid","colour":"#fff"}"##).is_err());
        assert!(r.compile("   ").is_err());
    }

    #[test]
    fn test_compile_rejects_bad_palette() {
        let mut r = ProceduralRenderer::new();
        assert!(r.compile(r#"{"pattern":"solid","palette":[]}"#).is_err());
        assert!(r.compile(r#"{"pattern":"solid","palette":["red"]}"#).is_err());
        assert!(r.compile(r##"{"pattern":"solid","palette":["#12345g"]}"##).is_err());
        assert!(r.compile(r#"{"pattern":"solid","audio_gain":-1}"#).is_err());
    }

    #[test]
    fn test_failed_compile_keeps_previous_program() {
        let mut r = ProceduralRenderer::new();
        r.compile(r#"{"pattern":"rings"}"#).unwrap();
        assert!(r.compile("not json").is_err());
        assert_eq!(r.program().unwrap().pattern, Pattern::Rings);
    }

    #[test]
    fn test_render_without_program_fails() {
        let mut r = ProceduralRenderer::new();
        let mut data = vec![0u8; 16];
        let mut surface = RenderSurface::packed(2, 2, &mut data).unwrap();
        let err = r
            .render(&mut surface, &FrameParams::new(0.0, 0.0, 2, 2))
            .unwrap_err();
        assert_eq!(err, RenderError::NotCompiled);
    }

    #[test]
    fn test_solid_writes_bgra() {
        let mut r = ProceduralRenderer::new();
        r.compile(r##"{"pattern":"solid","palette":["#102030"]}"##).unwrap();
        let data = render(&mut r, &FrameParams::new(0.0, 0.0, 2, 1), 2, 1);
        assert_eq!(data, vec![0x30, 0x20, 0x10, 255, 0x30, 0x20, 0x10, 255]);
    }

    #[test]
    fn test_audio_brightens_solid() {
        let mut r = ProceduralRenderer::new();
        r.compile(r##"{"pattern":"solid","palette":["#404040"]}"##).unwrap();
        let quiet = render(&mut r, &FrameParams::new(0.0, 0.0, 1, 1), 1, 1);
        let loud = render(&mut r, &FrameParams::new(0.0, 1.0, 1, 1), 1, 1);
        assert!(loud[0] > quiet[0]);
    }

    #[test]
    fn test_plasma_is_deterministic_and_animated() {
        let mut r = ProceduralRenderer::new();
        r.compile(r##"{"pattern":"plasma","palette":["#000000","#ff00ff","#00ffff"]}"##)
            .unwrap();
        let a = render(&mut r, &FrameParams::new(0.5, 0.2, 16, 8), 16, 8);
        let b = render(&mut r, &FrameParams::new(0.5, 0.2, 16, 8), 16, 8);
        let c = render(&mut r, &FrameParams::new(1.5, 0.2, 16, 8), 16, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_pulse_grows_with_audio() {
        let mut r = ProceduralRenderer::new();
        r.compile(r##"{"pattern":"pulse","palette":["#000000","#ffffff"]}"##).unwrap();
        let lit = |data: &[u8]| data.chunks_exact(4).filter(|p| p[0] > 128).count();
        let quiet = render(&mut r, &FrameParams::new(0.0, 0.0, 32, 32), 32, 32);
        let loud = render(&mut r, &FrameParams::new(0.0, 1.0, 32, 32), 32, 32);
        assert!(lit(&loud) > lit(&quiet));
    }

    proptest! {
        #[test]
        fn prop_output_is_opaque(t in 0.0f32..100.0, audio in 0.0f32..1.0) {
            let mut r = ProceduralRenderer::new();
            r.compile(r##"{"pattern":"rings","palette":["#ff0000","#0000ff"]}"##).unwrap();
            let data = render(&mut r, &FrameParams::new(t, audio, 8, 4), 8, 4);
            prop_assert!(data.chunks_exact(4).all(|p| p[3] == 255));
        }
    }
}
