//! reel runtime (glow/OpenGL backend)
//
// This crate contains only the device adapter: `GlowGpu` maps the engine's `Gpu` calls onto a
// host-owned `glow::Context`. It does NOT create windows or contexts, and it never presents;
// swapping buffers is the host's job.
#![allow(clippy::missing_safety_doc)]

use std::collections::HashMap;
use std::sync::Arc;

use glow::HasContext;
use slotmap::SlotMap;

use reel_runtime::gpu::{
    ActiveAttribute, ActiveUniform, BlendEquation, BlendFactor, BlendState, BufferHandle,
    BufferKind, FramebufferHandle, FramebufferStatus, GlslType, ProgramHandle,
    RenderbufferHandle, ShaderHandle, ShaderStage, UniformData,
};
use reel_runtime::{Gpu, GpuLimits, TextureHandle};

pub use reel_core::EngineError;

/// A linked program plus the uniform locations GL handed out for it.
///
/// The engine addresses uniforms by index into `uniforms`; GL locations are opaque.
#[derive(Debug)]
struct GlProgram {
    program: glow::NativeProgram,
    uniforms: Vec<(ActiveUniform, glow::NativeUniformLocation)>,
    attributes: Vec<ActiveAttribute>,
}

#[derive(Debug)]
struct GlBuffer {
    buffer: glow::NativeBuffer,
    target: u32,
}

/// [`Gpu`] over an OpenGL 3.3 core / GLES 3 context.
pub struct GlowGpu {
    gl: Arc<glow::Context>,
    vao: Option<glow::NativeVertexArray>,
    textures: SlotMap<TextureHandle, glow::NativeTexture>,
    renderbuffers: SlotMap<RenderbufferHandle, glow::NativeRenderbuffer>,
    framebuffers: SlotMap<FramebufferHandle, glow::NativeFramebuffer>,
    shaders: SlotMap<ShaderHandle, glow::NativeShader>,
    programs: SlotMap<ProgramHandle, GlProgram>,
    buffers: SlotMap<BufferHandle, GlBuffer>,
    current: Option<ProgramHandle>,
    limits: GpuLimits,
    lost: bool,
}

impl std::fmt::Debug for GlowGpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // `glow::Context` holds a function table and does not implement Debug.
        f.debug_struct("GlowGpu")
            .field("renderer", &self.limits.renderer)
            .field("textures", &self.textures.len())
            .field("programs", &self.programs.len())
            .field("lost", &self.lost)
            .finish()
    }
}

impl GlowGpu {
    /// Wraps a current context. Creates the one vertex array object the core profile requires.
    pub fn new(gl: Arc<glow::Context>) -> Result<Self, EngineError> {
        let limits = unsafe { query_limits(&gl) };
        let vao = unsafe {
            let vao = gl
                .create_vertex_array()
                .map_err(|e| EngineError::GlCreate(format!("create_vertex_array: {e}")))?;
            gl.bind_vertex_array(Some(vao));
            vao
        };
        tracing::info!(renderer = %limits.renderer, max_texture = limits.max_texture_size, "glow backend ready");
        Ok(Self {
            gl,
            vao: Some(vao),
            textures: SlotMap::with_key(),
            renderbuffers: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            current: None,
            limits,
            lost: false,
        })
    }

    pub fn gl(&self) -> &Arc<glow::Context> {
        &self.gl
    }

    /// Native texture behind a handle, for hosts that sample engine output themselves.
    pub fn native_texture(&self, texture: TextureHandle) -> Option<glow::NativeTexture> {
        self.textures.get(texture).copied()
    }

    /// Adopts a texture the host created. The engine treats it like its own.
    pub fn import_texture(&mut self, texture: glow::NativeTexture) -> TextureHandle {
        self.textures.insert(texture)
    }

    /// Called by the host when its windowing layer reports the context gone. Every handle
    /// issued so far becomes unknown.
    pub fn mark_lost(&mut self) {
        if self.lost {
            return;
        }
        tracing::warn!("gl context lost");
        self.lost = true;
        self.forget_all();
    }

    fn forget_all(&mut self) {
        self.textures.clear();
        self.renderbuffers.clear();
        self.framebuffers.clear();
        self.shaders.clear();
        self.programs.clear();
        self.buffers.clear();
        self.current = None;
        self.vao = None;
    }

    fn lost_err(&self, what: &str) -> EngineError {
        EngineError::GlCreate(format!("{what}: context lost"))
    }

    fn bind_program(&mut self, program: ProgramHandle) -> Option<&GlProgram> {
        let p = self.programs.get(program)?;
        if self.current != Some(program) {
            unsafe { self.gl.use_program(Some(p.program)) };
            self.current = Some(program);
        }
        self.programs.get(program)
    }
}

impl Drop for GlowGpu {
    fn drop(&mut self) {
        if self.lost {
            return;
        }
        unsafe {
            for (_, p) in self.programs.drain() {
                self.gl.delete_program(p.program);
            }
            for (_, s) in self.shaders.drain() {
                self.gl.delete_shader(s);
            }
            for (_, f) in self.framebuffers.drain() {
                self.gl.delete_framebuffer(f);
            }
            for (_, r) in self.renderbuffers.drain() {
                self.gl.delete_renderbuffer(r);
            }
            for (_, t) in self.textures.drain() {
                self.gl.delete_texture(t);
            }
            for (_, b) in self.buffers.drain() {
                self.gl.delete_buffer(b.buffer);
            }
            if let Some(vao) = self.vao.take() {
                self.gl.delete_vertex_array(vao);
            }
        }
    }
}

unsafe fn query_limits(gl: &glow::Context) -> GpuLimits {
    let param = |p: u32| gl.get_parameter_i32(p).max(0) as u32;
    GpuLimits {
        renderer: gl.get_parameter_string(glow::RENDERER),
        max_texture_size: param(glow::MAX_TEXTURE_SIZE),
        max_texture_units: param(glow::MAX_TEXTURE_IMAGE_UNITS),
        max_vertex_uniform_vectors: param(glow::MAX_VERTEX_UNIFORM_VECTORS),
        max_fragment_uniform_vectors: param(glow::MAX_FRAGMENT_UNIFORM_VECTORS),
        max_varying_vectors: param(glow::MAX_VARYING_VECTORS),
    }
}

fn glsl_type(gl_enum: u32) -> Option<GlslType> {
    Some(match gl_enum {
        glow::FLOAT => GlslType::Float,
        glow::FLOAT_VEC2 => GlslType::Vec2,
        glow::FLOAT_VEC3 => GlslType::Vec3,
        glow::FLOAT_VEC4 => GlslType::Vec4,
        glow::INT => GlslType::Int,
        glow::INT_VEC2 => GlslType::IVec2,
        glow::INT_VEC3 => GlslType::IVec3,
        glow::INT_VEC4 => GlslType::IVec4,
        glow::BOOL => GlslType::Bool,
        glow::BOOL_VEC2 => GlslType::BVec2,
        glow::BOOL_VEC3 => GlslType::BVec3,
        glow::BOOL_VEC4 => GlslType::BVec4,
        glow::FLOAT_MAT2 => GlslType::Mat2,
        glow::FLOAT_MAT3 => GlslType::Mat3,
        glow::FLOAT_MAT4 => GlslType::Mat4,
        glow::SAMPLER_2D => GlslType::Sampler2D,
        glow::SAMPLER_CUBE => GlslType::SamplerCube,
        _ => return None,
    })
}

fn framebuffer_status(code: u32) -> FramebufferStatus {
    match code {
        glow::FRAMEBUFFER_COMPLETE => FramebufferStatus::Complete,
        glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => FramebufferStatus::IncompleteAttachment,
        glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => FramebufferStatus::MissingAttachment,
        glow::FRAMEBUFFER_UNSUPPORTED => FramebufferStatus::Unsupported,
        other => FramebufferStatus::Other(other),
    }
}

fn blend_factor(f: BlendFactor) -> u32 {
    match f {
        BlendFactor::Zero => glow::ZERO,
        BlendFactor::One => glow::ONE,
        BlendFactor::SrcColor => glow::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => glow::ONE_MINUS_SRC_COLOR,
        BlendFactor::DstColor => glow::DST_COLOR,
        BlendFactor::OneMinusDstColor => glow::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => glow::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => glow::ONE_MINUS_DST_ALPHA,
    }
}

fn blend_equation(e: BlendEquation) -> u32 {
    match e {
        BlendEquation::Add => glow::FUNC_ADD,
        BlendEquation::Subtract => glow::FUNC_SUBTRACT,
        BlendEquation::ReverseSubtract => glow::FUNC_REVERSE_SUBTRACT,
    }
}

/// GL reports array uniforms as `name[0]`; the engine knows them by bare name.
fn uniform_base_name(name: &str) -> &str {
    name.strip_suffix("[0]").unwrap_or(name)
}

impl Gpu for GlowGpu {
    fn limits(&self) -> GpuLimits {
        self.limits.clone()
    }

    fn is_lost(&self) -> bool {
        self.lost
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn create_texture(&mut self) -> Result<TextureHandle, EngineError> {
        if self.lost {
            return Err(self.lost_err("create_texture"));
        }
        let gl = &self.gl;
        let tex = unsafe {
            let tex = gl
                .create_texture()
                .map_err(|e| EngineError::GlCreate(format!("create_texture failed: {e:?}")))?;
            gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            gl.bind_texture(glow::TEXTURE_2D, None);
            tex
        };
        Ok(self.textures.insert(tex))
    }

    fn texture_image(&mut self, texture: TextureHandle, width: u32, height: u32, pixels: Option<&[u8]>) {
        let Some(tex) = self.textures.get(texture).copied() else {
            return;
        };
        let expected = (width * height * 4) as usize;
        let pixels = pixels.filter(|p| p.len() >= expected);
        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA8 as i32,
                width.max(1) as i32,
                height.max(1) as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                pixels,
            );
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.remove(texture) {
            unsafe { self.gl.delete_texture(tex) };
        }
    }

    fn create_renderbuffer(&mut self) -> Result<RenderbufferHandle, EngineError> {
        if self.lost {
            return Err(self.lost_err("create_renderbuffer"));
        }
        let rb = unsafe {
            self.gl
                .create_renderbuffer()
                .map_err(|e| EngineError::GlCreate(format!("create_renderbuffer failed: {e:?}")))?
        };
        Ok(self.renderbuffers.insert(rb))
    }

    fn renderbuffer_storage(&mut self, renderbuffer: RenderbufferHandle, width: u32, height: u32) {
        let Some(rb) = self.renderbuffers.get(renderbuffer).copied() else {
            return;
        };
        unsafe {
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, Some(rb));
            self.gl.renderbuffer_storage(
                glow::RENDERBUFFER,
                glow::DEPTH_COMPONENT16,
                width.max(1) as i32,
                height.max(1) as i32,
            );
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, None);
        }
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        if let Some(rb) = self.renderbuffers.remove(renderbuffer) {
            unsafe { self.gl.delete_renderbuffer(rb) };
        }
    }

    fn create_framebuffer(
        &mut self,
        color: TextureHandle,
        depth: Option<RenderbufferHandle>,
    ) -> Result<FramebufferHandle, EngineError> {
        if self.lost {
            return Err(self.lost_err("create_framebuffer"));
        }
        let tex = self
            .textures
            .get(color)
            .copied()
            .ok_or_else(|| EngineError::GlCreate("create_framebuffer: unknown color texture".into()))?;
        let depth = depth.and_then(|d| self.renderbuffers.get(d).copied());
        let fbo = unsafe {
            let fbo = self
                .gl
                .create_framebuffer()
                .map_err(|e| EngineError::GlCreate(format!("create_framebuffer failed: {e:?}")))?;
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(tex),
                0,
            );
            if let Some(rb) = depth {
                self.gl.framebuffer_renderbuffer(
                    glow::FRAMEBUFFER,
                    glow::DEPTH_ATTACHMENT,
                    glow::RENDERBUFFER,
                    Some(rb),
                );
            }
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            fbo
        };
        Ok(self.framebuffers.insert(fbo))
    }

    fn framebuffer_status(&mut self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        let Some(fbo) = self.framebuffers.get(framebuffer).copied() else {
            return FramebufferStatus::MissingAttachment;
        };
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            let status = self.gl.check_framebuffer_status(glow::FRAMEBUFFER);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            framebuffer_status(status)
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(fbo) = self.framebuffers.remove(framebuffer) {
            unsafe { self.gl.delete_framebuffer(fbo) };
        }
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, String> {
        if self.lost {
            return Err("context lost".into());
        }
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        let shader = unsafe {
            let s = self
                .gl
                .create_shader(kind)
                .map_err(|e| format!("create_shader failed: {e:?}"))?;
            self.gl.shader_source(s, source);
            self.gl.compile_shader(s);
            if !self.gl.get_shader_compile_status(s) {
                let log = self.gl.get_shader_info_log(s);
                self.gl.delete_shader(s);
                return Err(log);
            }
            s
        };
        Ok(self.shaders.insert(shader))
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        if let Some(s) = self.shaders.remove(shader) {
            unsafe { self.gl.delete_shader(s) };
        }
    }

    fn link_program(&mut self, vertex: ShaderHandle, fragment: ShaderHandle) -> Result<ProgramHandle, String> {
        if self.lost {
            return Err("context lost".into());
        }
        let (Some(vs), Some(fs)) = (
            self.shaders.get(vertex).copied(),
            self.shaders.get(fragment).copied(),
        ) else {
            return Err("link_program: unknown shader".into());
        };
        let gl = &self.gl;
        let linked = unsafe {
            let program = gl
                .create_program()
                .map_err(|e| format!("create_program failed: {e:?}"))?;
            gl.attach_shader(program, vs);
            gl.attach_shader(program, fs);
            gl.link_program(program);
            gl.detach_shader(program, vs);
            gl.detach_shader(program, fs);
            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(log);
            }

            let mut uniforms = Vec::new();
            for i in 0..gl.get_active_uniforms(program) {
                let Some(u) = gl.get_active_uniform(program, i) else {
                    continue;
                };
                let (Some(ty), Some(loc)) = (glsl_type(u.utype), gl.get_uniform_location(program, &u.name))
                else {
                    tracing::debug!(uniform = %u.name, utype = u.utype, "skipping uniform of unknown type");
                    continue;
                };
                let info = ActiveUniform {
                    name: uniform_base_name(&u.name).to_string(),
                    ty,
                    size: u.size,
                    location: uniforms.len() as u32,
                };
                uniforms.push((info, loc));
            }

            let mut attributes = Vec::new();
            for i in 0..gl.get_active_attributes(program) {
                let Some(a) = gl.get_active_attribute(program, i) else {
                    continue;
                };
                let (Some(ty), Some(location)) = (glsl_type(a.atype), gl.get_attrib_location(program, &a.name))
                else {
                    continue;
                };
                attributes.push(ActiveAttribute {
                    name: a.name,
                    ty,
                    location,
                });
            }

            GlProgram {
                program,
                uniforms,
                attributes,
            }
        };
        Ok(self.programs.insert(linked))
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if let Some(p) = self.programs.remove(program) {
            if self.current == Some(program) {
                self.current = None;
            }
            unsafe { self.gl.delete_program(p.program) };
        }
    }

    fn active_uniforms(&mut self, program: ProgramHandle) -> Vec<ActiveUniform> {
        self.programs
            .get(program)
            .map(|p| p.uniforms.iter().map(|(u, _)| u.clone()).collect())
            .unwrap_or_default()
    }

    fn active_attributes(&mut self, program: ProgramHandle) -> Vec<ActiveAttribute> {
        self.programs
            .get(program)
            .map(|p| p.attributes.clone())
            .unwrap_or_default()
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        let native = program.and_then(|p| self.programs.get(p)).map(|p| p.program);
        self.current = program.filter(|_| native.is_some());
        unsafe { self.gl.use_program(native) };
    }

    fn set_uniform(&mut self, program: ProgramHandle, location: u32, ty: GlslType, data: &UniformData) {
        let gl = self.gl.clone();
        let Some(p) = self.bind_program(program) else {
            return;
        };
        let Some((_, loc)) = p.uniforms.get(location as usize) else {
            return;
        };
        let loc = Some(loc);
        unsafe {
            match data {
                UniformData::Float(v) => match ty.components() {
                    2 => gl.uniform_2_f32_slice(loc, v),
                    3 => gl.uniform_3_f32_slice(loc, v),
                    4 => gl.uniform_4_f32_slice(loc, v),
                    _ => gl.uniform_1_f32_slice(loc, v),
                },
                UniformData::Int(v) => match ty.components() {
                    2 => gl.uniform_2_i32_slice(loc, v),
                    3 => gl.uniform_3_i32_slice(loc, v),
                    4 => gl.uniform_4_i32_slice(loc, v),
                    _ => gl.uniform_1_i32_slice(loc, v),
                },
                UniformData::Matrix(v) => match ty {
                    GlslType::Mat2 => gl.uniform_matrix_2_f32_slice(loc, false, v),
                    GlslType::Mat3 => gl.uniform_matrix_3_f32_slice(loc, false, v),
                    _ => gl.uniform_matrix_4_f32_slice(loc, false, v),
                },
            }
        }
    }

    fn get_uniform(&mut self, program: ProgramHandle, location: u32, ty: GlslType) -> Option<UniformData> {
        let p = self.programs.get(program)?;
        let (_, loc) = p.uniforms.get(location as usize)?;
        let n = ty.components();
        unsafe {
            if ty.is_integer() {
                let mut v = vec![0i32; n];
                self.gl.get_uniform_i32(p.program, loc, &mut v);
                Some(UniformData::Int(v))
            } else {
                let mut v = vec![0f32; n];
                self.gl.get_uniform_f32(p.program, loc, &mut v);
                Some(if ty.is_matrix() {
                    UniformData::Matrix(v)
                } else {
                    UniformData::Float(v)
                })
            }
        }
    }

    fn create_buffer(&mut self, kind: BufferKind) -> Result<BufferHandle, EngineError> {
        if self.lost {
            return Err(self.lost_err("create_buffer"));
        }
        let buffer = unsafe {
            self.gl
                .create_buffer()
                .map_err(|e| EngineError::GlCreate(format!("create_buffer: {e}")))?
        };
        let target = match kind {
            BufferKind::Vertex => glow::ARRAY_BUFFER,
            BufferKind::Index => glow::ELEMENT_ARRAY_BUFFER,
        };
        Ok(self.buffers.insert(GlBuffer { buffer, target }))
    }

    fn buffer_f32(&mut self, buffer: BufferHandle, data: &[f32]) {
        self.upload(buffer, bytemuck::cast_slice(data));
    }

    fn buffer_u16(&mut self, buffer: BufferHandle, data: &[u16]) {
        self.upload(buffer, bytemuck::cast_slice(data));
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        if let Some(b) = self.buffers.remove(buffer) {
            unsafe { self.gl.delete_buffer(b.buffer) };
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        let fbo = framebuffer.and_then(|f| self.framebuffers.get(f).copied());
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, fbo) };
    }

    fn viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        unsafe { self.gl.viewport(x, y, width as i32, height as i32) };
    }

    fn set_blend(&mut self, blend: Option<BlendState>) {
        unsafe {
            match blend {
                Some(b) => {
                    self.gl.enable(glow::BLEND);
                    self.gl.blend_equation(blend_equation(b.equation));
                    self.gl.blend_func(blend_factor(b.src), blend_factor(b.dst));
                }
                None => self.gl.disable(glow::BLEND),
            }
        }
    }

    fn set_depth_test(&mut self, enabled: bool) {
        unsafe {
            if enabled {
                self.gl.enable(glow::DEPTH_TEST);
            } else {
                self.gl.disable(glow::DEPTH_TEST);
            }
        }
    }

    fn clear(&mut self, color: [f32; 4], depth: bool) {
        let mut mask = glow::COLOR_BUFFER_BIT;
        if depth {
            mask |= glow::DEPTH_BUFFER_BIT;
        }
        unsafe {
            self.gl.clear_color(color[0], color[1], color[2], color[3]);
            self.gl.clear(mask);
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        let tex = texture.and_then(|t| self.textures.get(t).copied());
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(glow::TEXTURE_2D, tex);
        }
    }

    fn bind_attribute(&mut self, location: u32, buffer: BufferHandle, components: u32) {
        let Some(b) = self.buffers.get(buffer) else {
            return;
        };
        unsafe {
            self.gl.bind_vertex_array(self.vao);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(b.buffer));
            self.gl.enable_vertex_attrib_array(location);
            self.gl
                .vertex_attrib_pointer_f32(location, components as i32, glow::FLOAT, false, 0, 0);
        }
    }

    fn draw_indexed(&mut self, indices: BufferHandle, count: u32) {
        let Some(b) = self.buffers.get(indices) else {
            return;
        };
        unsafe {
            self.gl.bind_vertex_array(self.vao);
            self.gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(b.buffer));
            self.gl
                .draw_elements(glow::TRIANGLES, count as i32, glow::UNSIGNED_SHORT, 0);
        }
    }

    fn read_pixels(
        &mut self,
        framebuffer: Option<FramebufferHandle>,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        out: &mut [u8],
    ) {
        let fbo = framebuffer.and_then(|f| self.framebuffers.get(f).copied());
        if framebuffer.is_some() && fbo.is_none() {
            return;
        }
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, fbo);
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            self.gl.read_pixels(
                x,
                y,
                width as i32,
                height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(out),
            );
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
    }
}

impl GlowGpu {
    fn upload(&mut self, buffer: BufferHandle, bytes: &[u8]) {
        let Some(b) = self.buffers.get(buffer) else {
            return;
        };
        unsafe {
            if b.target == glow::ELEMENT_ARRAY_BUFFER {
                // Element bindings are VAO state.
                self.gl.bind_vertex_array(self.vao);
            }
            self.gl.bind_buffer(b.target, Some(b.buffer));
            self.gl.buffer_data_u8_slice(b.target, bytes, glow::STATIC_DRAW);
        }
    }
}

/// Counts live objects per kind; handy for leak checks in host integration tests.
pub fn live_objects(gpu: &GlowGpu) -> HashMap<&'static str, usize> {
    HashMap::from([
        ("textures", gpu.textures.len()),
        ("renderbuffers", gpu.renderbuffers.len()),
        ("framebuffers", gpu.framebuffers.len()),
        ("shaders", gpu.shaders.len()),
        ("programs", gpu.programs.len()),
        ("buffers", gpu.buffers.len()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gl_type_enums_map_to_glsl_types() {
        assert_eq!(glsl_type(glow::FLOAT_VEC4), Some(GlslType::Vec4));
        assert_eq!(glsl_type(glow::SAMPLER_2D), Some(GlslType::Sampler2D));
        assert_eq!(glsl_type(glow::FLOAT_MAT4), Some(GlslType::Mat4));
        assert_eq!(glsl_type(glow::UNSIGNED_INT), None);
    }

    #[test]
    fn array_uniforms_lose_their_index_suffix() {
        assert_eq!(uniform_base_name("weights[0]"), "weights");
        assert_eq!(uniform_base_name("transform"), "transform");
    }

    #[test]
    fn framebuffer_codes_map_to_statuses() {
        assert!(framebuffer_status(glow::FRAMEBUFFER_COMPLETE).is_complete());
        assert_eq!(
            framebuffer_status(glow::FRAMEBUFFER_UNSUPPORTED),
            FramebufferStatus::Unsupported
        );
        assert_eq!(framebuffer_status(0x1234), FramebufferStatus::Other(0x1234));
    }

    #[test]
    fn premultiplied_blend_maps_to_one_one_minus_src_alpha() {
        let b = BlendState::PREMULTIPLIED;
        assert_eq!(blend_factor(b.src), glow::ONE);
        assert_eq!(blend_factor(b.dst), glow::ONE_MINUS_SRC_ALPHA);
        assert_eq!(blend_equation(b.equation), glow::FUNC_ADD);
    }
}
