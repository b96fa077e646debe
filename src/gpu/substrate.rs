//! wgpu rendering substrate.
//!
//! Every image is an `Rgba8Unorm` texture usable both as render target and
//! as shader input. Each draw renders a fullscreen quad into the target with
//! `LoadOp::Load`; the fragment stage discards outside the draw rectangle so
//! the rest of the target keeps its contents. Draws are submitted one by one,
//! which keeps them ordered with respect to uploads and readbacks.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use wgpu::util::DeviceExt;

use super::context::GpuContext;
use crate::error::{AllocationError, CompileError, DrawError};
use crate::shaders::{ShaderProgram, FRAGMENT_ENTRY, VERTEX_ENTRY};
use crate::stages::StageKind;
use crate::substrate::{DrawCall, ImageHandle, RenderSubstrate, ShaderHandle};

const IMAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Mirrors `DrawUniforms` in `shaders/common.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct DrawUniforms {
    dst_origin: [f32; 2],
    dst_size: [f32; 2],
    params: [f32; 4],
}

impl DrawUniforms {
    fn new(call: &DrawCall) -> Self {
        Self {
            dst_origin: [call.rect.x, call.rect.y],
            dst_size: [call.rect.width, call.rect.height],
            params: call.uniforms.as_vec4(),
        }
    }
}

/// Vertex for fullscreen quad
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

impl QuadVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

const QUAD_VERTICES: &[QuadVertex] = &[
    QuadVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [ 1.0, -1.0], uv: [1.0, 1.0] },
    QuadVertex { position: [ 1.0,  1.0], uv: [1.0, 0.0] },
    QuadVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [ 1.0,  1.0], uv: [1.0, 0.0] },
    QuadVertex { position: [-1.0,  1.0], uv: [0.0, 0.0] },
];

struct GpuImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct CompiledShader {
    stage: StageKind,
    label: String,
    pipeline: wgpu::RenderPipeline,
}

/// GPU substrate over a headless [`GpuContext`].
pub struct GpuSubstrate {
    context: GpuContext,
    layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    quad_vertex_buffer: wgpu::Buffer,
    // Bound to input slots a stage does not read.
    blank_view: wgpu::TextureView,
    images: HashMap<ImageHandle, GpuImage>,
    shaders: HashMap<ShaderHandle, CompiledShader>,
    next_image: u32,
    next_shader: u32,
}

impl GpuSubstrate {
    pub fn new(context: GpuContext) -> Self {
        let device = &context.device;

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Draw Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Bloom Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let quad_vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bloom Quad Buffer"),
            contents: bytemuck::cast_slice(QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let blank = create_image_texture(device, 1, 1, "Bloom Blank Input");
        let blank_view = blank.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            context,
            layout,
            pipeline_layout,
            quad_vertex_buffer,
            blank_view,
            images: HashMap::new(),
            shaders: HashMap::new(),
            next_image: 0,
            next_shader: 0,
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    fn image(&self, image: ImageHandle) -> Result<&GpuImage, DrawError> {
        self.images
            .get(&image)
            .ok_or(DrawError::UnknownImage(image.id()))
    }

    fn input_view(&self, input: Option<ImageHandle>) -> Result<&wgpu::TextureView, DrawError> {
        match input {
            Some(handle) => Ok(&self.image(handle)?.view),
            None => Ok(&self.blank_view),
        }
    }

    fn create_pipeline(&self, program: &ShaderProgram) -> wgpu::RenderPipeline {
        let device = &self.context.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program.label.as_str()),
            source: wgpu::ShaderSource::Wgsl(program.source.as_str().into()),
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(program.label.as_str()),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some(VERTEX_ENTRY),
                buffers: &[QuadVertex::desc()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some(FRAGMENT_ENTRY),
                targets: &[Some(wgpu::ColorTargetState {
                    format: IMAGE_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

fn create_image_texture(device: &wgpu::Device, width: u32, height: u32, label: &str) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: IMAGE_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

impl RenderSubstrate for GpuSubstrate {
    fn compile_shader(&mut self, program: &ShaderProgram) -> Result<ShaderHandle, CompileError> {
        // naga gives readable diagnostics before wgpu sees the source.
        program.validate()?;

        self.context.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.create_pipeline(program);
        if let Some(e) = pollster::block_on(self.context.device.pop_error_scope()) {
            return Err(CompileError {
                label: program.label.clone(),
                message: e.to_string(),
            });
        }

        let handle = ShaderHandle(self.next_shader);
        self.next_shader += 1;
        self.shaders.insert(
            handle,
            CompiledShader {
                stage: program.stage,
                label: program.label.clone(),
                pipeline,
            },
        );
        log::info!("Compiled '{}' ({} stage)", program.label, program.stage);
        Ok(handle)
    }

    fn allocate_image(&mut self, width: u32, height: u32) -> Result<ImageHandle, AllocationError> {
        if width == 0 || height == 0 {
            return Err(AllocationError::InvalidDimensions { width, height });
        }
        let limit = self.context.max_texture_dimension();
        if width > limit || height > limit {
            return Err(AllocationError::ExceedsLimit { width, height, limit });
        }

        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let handle = ImageHandle(self.next_image);
        let texture = create_image_texture(device, width, height, &handle.to_string());
        let validation = pollster::block_on(device.pop_error_scope());
        let oom = pollster::block_on(device.pop_error_scope());
        if let Some(e) = oom.or(validation) {
            texture.destroy();
            return Err(AllocationError::Device(e.to_string()));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.next_image += 1;
        self.images.insert(
            handle,
            GpuImage {
                texture,
                view,
                width,
                height,
            },
        );
        log::debug!("Allocated {} ({}x{})", handle, width, height);
        Ok(handle)
    }

    fn release_image(&mut self, image: ImageHandle) {
        if let Some(released) = self.images.remove(&image) {
            released.texture.destroy();
            log::debug!("Released {}", image);
        }
    }

    fn image_dimensions(&self, image: ImageHandle) -> Result<(u32, u32), DrawError> {
        self.image(image).map(|img| (img.width, img.height))
    }

    fn draw_rect(&mut self, target: ImageHandle, call: &DrawCall) -> Result<(), DrawError> {
        let shader = self
            .shaders
            .get(&call.shader)
            .ok_or(DrawError::UnknownShader(call.shader.id()))?;
        call.validate(target, shader.stage)?;

        let target_view = &self.image(target)?.view;
        let src0 = self.input_view(call.inputs[0])?;
        let src1 = self.input_view(call.inputs[1])?;
        log::trace!("Draw '{}' into {}", shader.label, target);

        let device = &self.context.device;
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bloom Draw Uniform Buffer"),
            contents: bytemuck::bytes_of(&DrawUniforms::new(call)),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Draw Bind Group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(src0),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(src1),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Bloom Draw Encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(shader.label.as_str()),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_pipeline(&shader.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, self.quad_vertex_buffer.slice(..));
            pass.draw(0..6, 0..1);
        }
        self.context.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn write_pixels(&mut self, image: ImageHandle, pixels: &RgbaImage) -> Result<(), DrawError> {
        let dst = self.image(image)?;
        if (dst.width, dst.height) != pixels.dimensions() {
            return Err(DrawError::SizeMismatch {
                handle: image.id(),
                expected: (dst.width, dst.height),
                actual: pixels.dimensions(),
            });
        }

        self.context.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &dst.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels.as_raw(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * dst.width),
                rows_per_image: Some(dst.height),
            },
            dst.texture.size(),
        );
        Ok(())
    }

    fn read_pixels(&mut self, image: ImageHandle) -> Result<RgbaImage, DrawError> {
        let src = self.image(image)?;
        let (width, height) = (src.width, src.height);
        let device = &self.context.device;

        // Rows of a texture-to-buffer copy must be 256-byte aligned.
        let unpadded_bytes_per_row = 4 * width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let output_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Bloom Readback Buffer"),
            size: (padded_bytes_per_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Bloom Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &src.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &output_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            src.texture.size(),
        );
        self.context.queue.submit(Some(encoder.finish()));

        let buffer_slice = output_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| DrawError::Readback(e.to_string()))?
            .map_err(|e| DrawError::Readback(e.to_string()))?;

        let mut unpadded = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        {
            let data = buffer_slice.get_mapped_range();
            for row in 0..height {
                let start = (row * padded_bytes_per_row) as usize;
                let end = start + unpadded_bytes_per_row as usize;
                unpadded.extend_from_slice(&data[start..end]);
            }
        }
        output_buffer.unmap();

        RgbaImage::from_raw(width, height, unpadded)
            .ok_or_else(|| DrawError::Readback(format!("short readback for {}", image)))
    }
}
