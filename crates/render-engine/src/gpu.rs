//! wgpu backend: WGSL fragment programs rendered offscreen and read back.
//!
//! User programs provide `fs_main`; the prelude supplies a full-screen
//! triangle vertex stage and the uniform block:
//!
//! ```wgsl
//! @fragment
//! fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
//!     let uv = frag.xy / u.resolution;
//!     return vec4<f32>(uv, 0.5 + 0.5 * sin(u.time), 1.0);
//! }
//! ```

use crate::engine::{check_target_size, CompileError, FrameParams, RenderEngine, RenderError};
use crate::surface::RenderSurface;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

const PRELUDE: &str = r#"
struct Uniforms {
    resolution: vec2<f32>,
    time: f32,
    audio_level: f32,
};

@group(0) @binding(0) var<uniform> u: Uniforms;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(index & 1u) * 4 - 1);
    let y = f32(i32(index >> 1u) * 4 - 1);
    return vec4<f32>(x, y, 0.0, 1.0);
}
"#;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Uniforms {
    resolution: [f32; 2],
    time: f32,
    audio_level: f32,
}

struct Target {
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
}

/// Offscreen WGSL renderer.
pub struct WgpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    uniform_buffer: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    pipeline: Option<wgpu::RenderPipeline>,
    target: Option<Target>,
}

impl WgpuRenderer {
    /// Acquire an adapter and device.
    pub fn new() -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| RenderError::Backend("no suitable GPU adapter".into()))?;

        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "Using GPU adapter");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("shadercast_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| RenderError::Backend(format!("request_device failed: {e}")))?;

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shadercast_uniforms"),
            size: std::mem::size_of::<Uniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadercast_bind_group_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadercast_bind_group"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        Ok(Self {
            device,
            queue,
            uniform_buffer,
            bind_group_layout,
            bind_group,
            pipeline: None,
            target: None,
        })
    }

    fn ensure_target(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        let stale = self
            .target
            .as_ref()
            .map_or(true, |t| t.width != width || t.height != height);
        if stale {
            check_target_size(width, height, self.device.limits().max_texture_dimension_2d)?;
            self.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
            let padded_bytes_per_row = (width * 4).div_ceil(align) * align;

            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("shadercast_offscreen"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("shadercast_readback"),
                size: padded_bytes_per_row as u64 * height as u64,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
                return Err(RenderError::Backend(format!("render target allocation: {err}")));
            }
            tracing::debug!(width, height, padded_bytes_per_row, "Allocated offscreen target");
            self.target = Some(Target {
                width,
                height,
                padded_bytes_per_row,
                texture,
                view,
                readback,
            });
        }
        Ok(())
    }
}

impl RenderEngine for WgpuRenderer {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn compile(&mut self, source: &str) -> Result<(), CompileError> {
        if !source.contains("fs_main") {
            return Err(CompileError::new("program must define `fs_main`"));
        }
        let full = format!("{PRELUDE}\n{source}");

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shadercast_program"),
            source: wgpu::ShaderSource::Wgsl(full.into()),
        });
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadercast_pipeline_layout"),
            bind_group_layouts: &[&self.bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shadercast_pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: "vs_main",
                buffers: &[],
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
        });

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(CompileError::new(err.to_string()));
        }

        self.pipeline = Some(pipeline);
        tracing::debug!("Compiled WGSL program");
        Ok(())
    }

    fn is_compiled(&self) -> bool {
        self.pipeline.is_some()
    }

    fn render(
        &mut self,
        surface: &mut RenderSurface<'_>,
        params: &FrameParams,
    ) -> Result<(), RenderError> {
        if self.pipeline.is_none() {
            return Err(RenderError::NotCompiled);
        }
        let (width, height) = (surface.width(), surface.height());
        if width == 0 || height == 0 {
            return Ok(());
        }

        let uniforms = Uniforms {
            resolution: [width as f32, height as f32],
            time: params.time,
            audio_level: params.audio_level,
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        self.ensure_target(width, height)?;
        let (Some(pipeline), Some(target)) = (self.pipeline.as_ref(), self.target.as_ref()) else {
            return Err(RenderError::NotCompiled);
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("shadercast_frame"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("shadercast_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &target.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(target.padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = target.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| RenderError::Backend(e.to_string()))?
            .map_err(|e| RenderError::Backend(e.to_string()))?;

        {
            let mapped = slice.get_mapped_range();
            let row_bytes = width as usize * 4;
            for y in 0..height {
                let start = y as usize * target.padded_bytes_per_row as usize;
                surface
                    .row_mut(y)
                    .copy_from_slice(&mapped[start..start + row_bytes]);
            }
        }
        target.readback.unmap();
        Ok(())
    }
}
