//! `SoftGpu`: a headless reference implementation of [`Gpu`].
//!
//! The vertex stage is fixed function: programs that declare both `transform` (mat4) and
//! `resolution` (vec2) get the base vertex math, everything else passes positions through.
//! Fragment stages are Rust kernels looked up by exact fragment source. A fragment source
//! with no kernel fails to compile, the way a real driver rejects bad GLSL.
//!
//! Rasterization samples pixel centres with a top-left fill rule, so two triangles sharing
//! an edge never touch the same pixel twice. Texture sampling is nearest, clamped to edge.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use slotmap::SlotMap;

use reel_core::EngineError;

use crate::gpu::*;
use crate::shaders::BASE_FRAGMENT;

/// Fragment kernel: returns straight RGBA in 0..1 for one pixel.
pub type Kernel = Arc<dyn Fn(&Fragment<'_>) -> [f32; 4] + Send + Sync>;

fn global_kernels() -> &'static RwLock<HashMap<String, Kernel>> {
    static KERNELS: OnceLock<RwLock<HashMap<String, Kernel>>> = OnceLock::new();
    KERNELS.get_or_init(|| {
        let mut m: HashMap<String, Kernel> = HashMap::new();
        m.insert(BASE_FRAGMENT.to_string(), Arc::new(copy_source) as Kernel);
        RwLock::new(m)
    })
}

fn copy_source(f: &Fragment<'_>) -> [f32; 4] {
    f.texel("source")
}

/// Registers a kernel for every `SoftGpu` in the process.
pub fn register_kernel(fragment_source: &str, kernel: Kernel) {
    if let Ok(mut m) = global_kernels().write() {
        m.insert(fragment_source.to_string(), kernel);
    }
}

/// Per-pixel view handed to kernels.
pub struct Fragment<'a> {
    /// Interpolated `texCoord`.
    pub uv: [f32; 2],
    /// Window position of the pixel centre.
    pub coord: [f32; 2],
    program: &'a SoftProgram,
    textures: &'a SlotMap<TextureHandle, SoftTexture>,
    units: &'a [Option<TextureHandle>],
}

impl std::fmt::Debug for Fragment<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fragment")
            .field("uv", &self.uv)
            .field("coord", &self.coord)
            .finish()
    }
}

impl Fragment<'_> {
    fn values(&self, name: &str) -> Option<&UniformData> {
        let u = self.program.uniforms.iter().find(|u| u.name == name)?;
        self.program.values.get(&u.location)
    }

    pub fn floats(&self, name: &str) -> Vec<f32> {
        match self.values(name) {
            Some(UniformData::Float(v)) | Some(UniformData::Matrix(v)) => v.clone(),
            Some(UniformData::Int(v)) => v.iter().map(|i| *i as f32).collect(),
            None => Vec::new(),
        }
    }

    pub fn float(&self, name: &str) -> f32 {
        self.floats(name).first().copied().unwrap_or(0.0)
    }

    /// Up to four components, zero padded.
    pub fn vec4(&self, name: &str) -> [f32; 4] {
        let v = self.floats(name);
        let mut out = [0.0; 4];
        for (o, x) in out.iter_mut().zip(v) {
            *o = x;
        }
        out
    }

    pub fn int(&self, name: &str) -> i32 {
        match self.values(name) {
            Some(UniformData::Int(v)) => v.first().copied().unwrap_or(0),
            Some(UniformData::Float(v)) => v.first().map(|f| *f as i32).unwrap_or(0),
            _ => 0,
        }
    }

    /// Samples the texture bound to sampler uniform `sampler` at `uv`.
    pub fn sample(&self, sampler: &str, uv: [f32; 2]) -> [f32; 4] {
        let unit = self.int(sampler).max(0) as usize;
        let Some(Some(handle)) = self.units.get(unit) else {
            return [0.0; 4];
        };
        let Some(tex) = self.textures.get(*handle) else {
            return [0.0; 4];
        };
        tex.sample(uv)
    }

    pub fn texel(&self, sampler: &str) -> [f32; 4] {
        self.sample(sampler, self.uv)
    }
}

#[derive(Debug, Clone, Default)]
struct SoftTexture {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl SoftTexture {
    fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        if self.width == 0 || self.height == 0 || self.data.is_empty() {
            return [0.0; 4];
        }
        let x = ((uv[0] * self.width as f32).floor() as i64).clamp(0, self.width as i64 - 1);
        let y = ((uv[1] * self.height as f32).floor() as i64).clamp(0, self.height as i64 - 1);
        let i = ((y as usize) * self.width as usize + x as usize) * 4;
        let Some(px) = self.data.get(i..i + 4) else {
            return [0.0; 4];
        };
        [
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
            px[3] as f32 / 255.0,
        ]
    }
}

#[derive(Debug, Clone)]
struct SoftShader {
    stage: ShaderStage,
    source: String,
}

struct SoftProgram {
    kernel: Kernel,
    uniforms: Vec<ActiveUniform>,
    attributes: Vec<ActiveAttribute>,
    values: HashMap<u32, UniformData>,
    base_transform: bool,
}

#[derive(Debug, Clone)]
enum SoftBuffer {
    Empty,
    F32(Vec<f32>),
    U16(Vec<u16>),
}

#[derive(Debug, Clone, Copy)]
struct SoftFramebuffer {
    color: TextureHandle,
    depth: Option<RenderbufferHandle>,
}

/// Allocation and draw counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftStats {
    pub texture_image_calls: u64,
    pub renderbuffer_storage_calls: u64,
    pub draw_calls: u64,
    pub programs_linked: u64,
    pub live_programs: usize,
    pub live_textures: usize,
    pub live_framebuffers: usize,
}

pub struct SoftGpu {
    limits: GpuLimits,
    lost: bool,

    textures: SlotMap<TextureHandle, SoftTexture>,
    renderbuffers: SlotMap<RenderbufferHandle, (u32, u32)>,
    framebuffers: SlotMap<FramebufferHandle, SoftFramebuffer>,
    shaders: SlotMap<ShaderHandle, SoftShader>,
    programs: SlotMap<ProgramHandle, SoftProgram>,
    buffers: SlotMap<BufferHandle, SoftBuffer>,
    kernels: HashMap<String, Kernel>,

    screen: SoftTexture,
    bound_fb: Option<FramebufferHandle>,
    viewport: (i32, i32, u32, u32),
    blend: Option<BlendState>,
    depth_test: bool,
    program: Option<ProgramHandle>,
    units: Vec<Option<TextureHandle>>,
    attributes: HashMap<u32, (BufferHandle, u32)>,

    stats: SoftStats,
}

impl std::fmt::Debug for SoftGpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftGpu")
            .field("lost", &self.lost)
            .field("screen", &(self.screen.width, self.screen.height))
            .field("depth_test", &self.depth_test)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Default for SoftGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftGpu {
    /// A context whose default framebuffer is 300×150, like an unsized canvas.
    pub fn new() -> Self {
        Self::with_screen(300, 150)
    }

    pub fn with_screen(width: u32, height: u32) -> Self {
        let limits = GpuLimits {
            renderer: "reel soft rasterizer".into(),
            max_texture_size: 4096,
            max_texture_units: 16,
            max_vertex_uniform_vectors: 256,
            max_fragment_uniform_vectors: 256,
            max_varying_vectors: 15,
        };
        Self {
            units: vec![None; limits.max_texture_units as usize],
            limits,
            lost: false,
            textures: SlotMap::with_key(),
            renderbuffers: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            kernels: HashMap::new(),
            screen: SoftTexture {
                width,
                height,
                data: vec![0; (width * height * 4) as usize],
            },
            bound_fb: None,
            viewport: (0, 0, width, height),
            blend: None,
            depth_test: false,
            program: None,
            attributes: HashMap::new(),
            stats: SoftStats::default(),
        }
    }

    /// Overrides reported limits (e.g. to exercise compatibility checks).
    pub fn with_limits(mut self, limits: GpuLimits) -> Self {
        self.units = vec![None; limits.max_texture_units as usize];
        self.limits = limits;
        self
    }

    /// Registers a kernel for this context only.
    pub fn register_kernel(&mut self, fragment_source: &str, kernel: Kernel) {
        self.kernels.insert(fragment_source.to_string(), kernel);
    }

    pub fn stats(&self) -> SoftStats {
        SoftStats {
            live_programs: self.programs.len(),
            live_textures: self.textures.len(),
            live_framebuffers: self.framebuffers.len(),
            ..self.stats
        }
    }

    pub fn has_texture(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(texture)
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.screen.width, self.screen.height)
    }

    pub fn resize_screen(&mut self, width: u32, height: u32) {
        self.screen = SoftTexture {
            width,
            height,
            data: vec![0; (width * height * 4) as usize],
        };
    }

    /// Simulates device loss: every object is gone and later calls are ignored.
    pub fn lose_context(&mut self) {
        self.lost = true;
        self.textures.clear();
        self.renderbuffers.clear();
        self.framebuffers.clear();
        self.shaders.clear();
        self.programs.clear();
        self.buffers.clear();
        self.program = None;
        self.bound_fb = None;
        self.attributes.clear();
        self.units.iter_mut().for_each(|u| *u = None);
    }

    /// A fresh, empty device after [`SoftGpu::lose_context`]. Handles from before stay dead.
    pub fn restore_context(&mut self) {
        self.lost = false;
    }

    fn kernel_for(&self, source: &str) -> Option<Kernel> {
        if let Some(k) = self.kernels.get(source) {
            return Some(k.clone());
        }
        global_kernels().read().ok()?.get(source).cloned()
    }

    fn lost_err(&self, what: &str) -> EngineError {
        EngineError::GlCreate(format!("{what}: context lost"))
    }

    fn vertex_attr(&self, location: Option<u32>, index: usize, comps: usize) -> Option<Vec<f32>> {
        let (buf, n) = self.attributes.get(&location?)?;
        let SoftBuffer::F32(data) = self.buffers.get(*buf)? else {
            return None;
        };
        let n = *n as usize;
        let start = index * n;
        let mut out = vec![0.0; comps];
        for (c, o) in out.iter_mut().enumerate().take(n) {
            *o = *data.get(start + c)?;
        }
        Some(out)
    }
}

/// Pulls `uniform <type> <name>;` / `in <type> <name>;` declarations out of GLSL.
fn declarations(source: &str, keywords: &[&str]) -> Vec<(GlslType, String, i32)> {
    let mut out = Vec::new();
    for line in source.lines() {
        let line = line.trim();
        let line = match line.strip_prefix("layout") {
            Some(rest) => rest.split_once(')').map(|(_, r)| r.trim()).unwrap_or(""),
            None => line,
        };
        let mut tokens = line.split_whitespace();
        let Some(first) = tokens.next() else {
            continue;
        };
        if !keywords.contains(&first) {
            continue;
        }
        let mut tokens = tokens.skip_while(|t| matches!(*t, "lowp" | "mediump" | "highp"));
        let (Some(ty), Some(name)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let Some(ty) = GlslType::from_glsl_name(ty) else {
            continue;
        };
        let name = name.trim_end_matches(';');
        let (name, size) = match name.split_once('[') {
            Some((n, rest)) => (n, rest.trim_end_matches(']').parse().unwrap_or(1)),
            None => (name, 1),
        };
        out.push((ty, name.to_string(), size));
    }
    out
}

fn factor(f: BlendFactor, src: [f32; 4], dst: [f32; 4], c: usize) -> f32 {
    match f {
        BlendFactor::Zero => 0.0,
        BlendFactor::One => 1.0,
        BlendFactor::SrcColor => src[c],
        BlendFactor::OneMinusSrcColor => 1.0 - src[c],
        BlendFactor::DstColor => dst[c],
        BlendFactor::OneMinusDstColor => 1.0 - dst[c],
        BlendFactor::SrcAlpha => src[3],
        BlendFactor::OneMinusSrcAlpha => 1.0 - src[3],
        BlendFactor::DstAlpha => dst[3],
        BlendFactor::OneMinusDstAlpha => 1.0 - dst[3],
    }
}

fn blend(state: BlendState, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (c, o) in out.iter_mut().enumerate() {
        let s = src[c] * factor(state.src, src, dst, c);
        let d = dst[c] * factor(state.dst, src, dst, c);
        *o = match state.equation {
            BlendEquation::Add => s + d,
            BlendEquation::Subtract => s - d,
            BlendEquation::ReverseSubtract => d - s,
        };
    }
    out
}

fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[derive(Debug, Clone, Copy)]
struct Vert {
    x: f32,
    y: f32,
    uv: [f32; 2],
}

fn edge(a: Vert, b: Vert, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

/// Edge `a→b` of a counter-clockwise (y up) triangle owns its boundary pixels.
fn top_left(a: Vert, b: Vert) -> bool {
    let dy = b.y - a.y;
    let dx = b.x - a.x;
    (dy == 0.0 && dx < 0.0) || dy < 0.0
}

impl Gpu for SoftGpu {
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
        Ok(self.textures.insert(SoftTexture::default()))
    }

    fn texture_image(&mut self, texture: TextureHandle, width: u32, height: u32, pixels: Option<&[u8]>) {
        let Some(t) = self.textures.get_mut(texture) else {
            return;
        };
        self.stats.texture_image_calls += 1;
        let len = (width * height * 4) as usize;
        let mut data = pixels.map(|p| p.to_vec()).unwrap_or_default();
        data.resize(len, 0);
        *t = SoftTexture {
            width,
            height,
            data,
        };
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(texture);
        for u in self.units.iter_mut() {
            if *u == Some(texture) {
                *u = None;
            }
        }
    }

    fn create_renderbuffer(&mut self) -> Result<RenderbufferHandle, EngineError> {
        if self.lost {
            return Err(self.lost_err("create_renderbuffer"));
        }
        Ok(self.renderbuffers.insert((0, 0)))
    }

    fn renderbuffer_storage(&mut self, renderbuffer: RenderbufferHandle, width: u32, height: u32) {
        if let Some(rb) = self.renderbuffers.get_mut(renderbuffer) {
            self.stats.renderbuffer_storage_calls += 1;
            *rb = (width, height);
        }
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        self.renderbuffers.remove(renderbuffer);
    }

    fn create_framebuffer(
        &mut self,
        color: TextureHandle,
        depth: Option<RenderbufferHandle>,
    ) -> Result<FramebufferHandle, EngineError> {
        if self.lost {
            return Err(self.lost_err("create_framebuffer"));
        }
        Ok(self.framebuffers.insert(SoftFramebuffer { color, depth }))
    }

    fn framebuffer_status(&mut self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        let Some(fb) = self.framebuffers.get(framebuffer) else {
            return FramebufferStatus::MissingAttachment;
        };
        let Some(color) = self.textures.get(fb.color) else {
            return FramebufferStatus::MissingAttachment;
        };
        if color.width == 0 || color.height == 0 {
            return FramebufferStatus::IncompleteAttachment;
        }
        if let Some(rb) = fb.depth {
            match self.renderbuffers.get(rb) {
                Some(&(w, h)) if (w, h) == (color.width, color.height) => {}
                Some(_) => return FramebufferStatus::IncompleteDimensions,
                None => return FramebufferStatus::MissingAttachment,
            }
        }
        FramebufferStatus::Complete
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(framebuffer);
        if self.bound_fb == Some(framebuffer) {
            self.bound_fb = None;
        }
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, String> {
        if self.lost {
            return Err("context lost".into());
        }
        if !source.contains("void main") {
            return Err("ERROR: 0:1: missing main()".into());
        }
        if stage == ShaderStage::Fragment && self.kernel_for(source).is_none() {
            return Err("ERROR: 0:1: no kernel registered for this fragment source".into());
        }
        Ok(self.shaders.insert(SoftShader {
            stage,
            source: source.to_string(),
        }))
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(shader);
    }

    fn link_program(&mut self, vertex: ShaderHandle, fragment: ShaderHandle) -> Result<ProgramHandle, String> {
        let (Some(vs), Some(fs)) = (self.shaders.get(vertex), self.shaders.get(fragment)) else {
            return Err("link: unknown shader object".into());
        };
        if vs.stage != ShaderStage::Vertex || fs.stage != ShaderStage::Fragment {
            return Err("link: stage mismatch".into());
        }
        let kernel = self
            .kernel_for(&fs.source)
            .ok_or_else(|| "link: fragment kernel vanished".to_string())?;

        let mut uniforms: Vec<ActiveUniform> = Vec::new();
        for (ty, name, size) in declarations(&vs.source, &["uniform"])
            .into_iter()
            .chain(declarations(&fs.source, &["uniform"]))
        {
            if uniforms.iter().any(|u| u.name == name) {
                continue;
            }
            let location = uniforms.len() as u32;
            uniforms.push(ActiveUniform {
                name,
                ty,
                size,
                location,
            });
        }
        let attributes: Vec<ActiveAttribute> = declarations(&vs.source, &["in", "attribute"])
            .into_iter()
            .enumerate()
            .map(|(i, (ty, name, _))| ActiveAttribute {
                name,
                ty,
                location: i as u32,
            })
            .collect();
        let has = |n: &str, t: GlslType| uniforms.iter().any(|u| u.name == n && u.ty == t);
        let base_transform = has("transform", GlslType::Mat4) && has("resolution", GlslType::Vec2);

        self.stats.programs_linked += 1;
        Ok(self.programs.insert(SoftProgram {
            kernel,
            uniforms,
            attributes,
            values: HashMap::new(),
            base_transform,
        }))
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn active_uniforms(&mut self, program: ProgramHandle) -> Vec<ActiveUniform> {
        self.programs
            .get(program)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn active_attributes(&mut self, program: ProgramHandle) -> Vec<ActiveAttribute> {
        self.programs
            .get(program)
            .map(|p| p.attributes.clone())
            .unwrap_or_default()
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.program = program.filter(|p| self.programs.contains_key(*p));
    }

    fn set_uniform(&mut self, program: ProgramHandle, location: u32, _ty: GlslType, data: &UniformData) {
        if let Some(p) = self.programs.get_mut(program) {
            p.values.insert(location, data.clone());
        }
    }

    fn get_uniform(&mut self, program: ProgramHandle, location: u32, _ty: GlslType) -> Option<UniformData> {
        self.programs.get(program)?.values.get(&location).cloned()
    }

    fn create_buffer(&mut self, _kind: BufferKind) -> Result<BufferHandle, EngineError> {
        if self.lost {
            return Err(self.lost_err("create_buffer"));
        }
        Ok(self.buffers.insert(SoftBuffer::Empty))
    }

    fn buffer_f32(&mut self, buffer: BufferHandle, data: &[f32]) {
        if let Some(b) = self.buffers.get_mut(buffer) {
            *b = SoftBuffer::F32(data.to_vec());
        }
    }

    fn buffer_u16(&mut self, buffer: BufferHandle, data: &[u16]) {
        if let Some(b) = self.buffers.get_mut(buffer) {
            *b = SoftBuffer::U16(data.to_vec());
        }
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(buffer);
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.bound_fb = framebuffer.filter(|f| self.framebuffers.contains_key(*f));
    }

    fn viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = (x, y, width, height);
    }

    fn set_blend(&mut self, blend: Option<BlendState>) {
        self.blend = blend;
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.depth_test = enabled;
    }

    fn clear(&mut self, color: [f32; 4], _depth: bool) {
        if self.lost {
            return;
        }
        let px = color.map(to_byte);
        let target = match self.bound_fb.and_then(|f| self.framebuffers.get(f)) {
            Some(fb) => match self.textures.get_mut(fb.color) {
                Some(t) => t,
                None => return,
            },
            None => &mut self.screen,
        };
        for chunk in target.data.chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        if let Some(slot) = self.units.get_mut(unit as usize) {
            *slot = texture;
        }
    }

    fn bind_attribute(&mut self, location: u32, buffer: BufferHandle, components: u32) {
        self.attributes.insert(location, (buffer, components));
    }

    fn draw_indexed(&mut self, indices: BufferHandle, count: u32) {
        if self.lost {
            return;
        }
        let Some(pid) = self.program else {
            return;
        };
        let Some(program) = self.programs.get(pid) else {
            return;
        };
        let Some(SoftBuffer::U16(index_data)) = self.buffers.get(indices) else {
            return;
        };
        let attr = |name: &str| {
            program
                .attributes
                .iter()
                .find(|a| a.name == name)
                .map(|a| a.location)
        };
        let (pos_loc, uv_loc) = (attr("position"), attr("texCoord"));

        let uniform = |name: &str| {
            let u = program.uniforms.iter().find(|u| u.name == name)?;
            match program.values.get(&u.location)? {
                UniformData::Float(v) | UniformData::Matrix(v) => Some(v.clone()),
                UniformData::Int(v) => Some(v.iter().map(|i| *i as f32).collect()),
            }
        };
        let base = program.base_transform;
        let transform = uniform("transform")
            .filter(|m| m.len() == 16)
            .map(|m| {
                let mut a = [0.0; 16];
                a.copy_from_slice(&m);
                reel_core::Mat4(a)
            })
            .unwrap_or_default();
        let resolution = uniform("resolution").unwrap_or_else(|| vec![1.0, 1.0]);
        let (rx, ry) = (
            resolution.first().copied().unwrap_or(1.0).max(f32::EPSILON),
            resolution.get(1).copied().unwrap_or(1.0).max(f32::EPSILON),
        );

        let (vx, vy, vw, vh) = self.viewport;
        let mut verts = Vec::with_capacity(count as usize);
        for &i in index_data.iter().take(count as usize) {
            let Some(p) = self.vertex_attr(pos_loc, i as usize, 4) else {
                return;
            };
            let uv = self
                .vertex_attr(uv_loc, i as usize, 2)
                .map(|v| [v[0], v[1]])
                .unwrap_or([0.0, 0.0]);
            // attribute w defaults to 1
            let w_in = if self.attributes.get(&pos_loc.unwrap_or(0)).map(|a| a.1) == Some(4) {
                p[3]
            } else {
                1.0
            };
            let (nx, ny) = if base {
                let s = transform.transform_point([p[0] * rx / 2.0, p[1] * ry / 2.0, p[2], w_in]);
                let w = if s[3].abs() < f32::EPSILON { 1.0 } else { s[3] };
                (s[0] * 2.0 / rx / w, s[1] * 2.0 / ry / w)
            } else {
                (p[0] / w_in, p[1] / w_in)
            };
            verts.push(Vert {
                x: (nx + 1.0) / 2.0 * vw as f32 + vx as f32,
                y: (ny + 1.0) / 2.0 * vh as f32 + vy as f32,
                uv,
            });
        }

        let kernel = program.kernel.clone();
        let blend_state = self.blend;

        // Take the color target out so textures can be sampled while writing.
        let target_tex = self
            .bound_fb
            .and_then(|f| self.framebuffers.get(f))
            .map(|fb| fb.color);
        let mut target = match target_tex {
            Some(t) => match self.textures.get_mut(t) {
                Some(tex) => std::mem::take(tex),
                None => return,
            },
            None => std::mem::take(&mut self.screen),
        };
        let (tw, th) = (target.width as i64, target.height as i64);
        let clip_x0 = (vx as i64).max(0);
        let clip_y0 = (vy as i64).max(0);
        let clip_x1 = (vx as i64 + vw as i64).min(tw);
        let clip_y1 = (vy as i64 + vh as i64).min(th);

        let Some(program) = self.programs.get(pid) else {
            return;
        };
        for tri in verts.chunks_exact(3) {
            let (v0, mut v1, mut v2) = (tri[0], tri[1], tri[2]);
            let mut area = edge(v0, v1, v2.x, v2.y);
            if area.abs() < 1e-12 {
                continue;
            }
            if area < 0.0 {
                std::mem::swap(&mut v1, &mut v2);
                area = -area;
            }
            let min_x = (v0.x.min(v1.x).min(v2.x).floor() as i64).max(clip_x0);
            let max_x = (v0.x.max(v1.x).max(v2.x).ceil() as i64).min(clip_x1);
            let min_y = (v0.y.min(v1.y).min(v2.y).floor() as i64).max(clip_y0);
            let max_y = (v0.y.max(v1.y).max(v2.y).ceil() as i64).min(clip_y1);
            let (tl0, tl1, tl2) = (top_left(v1, v2), top_left(v2, v0), top_left(v0, v1));

            for py in min_y..max_y {
                for px in min_x..max_x {
                    let (cx, cy) = (px as f32 + 0.5, py as f32 + 0.5);
                    let w0 = edge(v1, v2, cx, cy);
                    let w1 = edge(v2, v0, cx, cy);
                    let w2 = edge(v0, v1, cx, cy);
                    let inside = |w: f32, tl: bool| w > 0.0 || (w == 0.0 && tl);
                    if !(inside(w0, tl0) && inside(w1, tl1) && inside(w2, tl2)) {
                        continue;
                    }
                    let (b0, b1, b2) = (w0 / area, w1 / area, w2 / area);
                    let uv = [
                        b0 * v0.uv[0] + b1 * v1.uv[0] + b2 * v2.uv[0],
                        b0 * v0.uv[1] + b1 * v1.uv[1] + b2 * v2.uv[1],
                    ];
                    let frag = Fragment {
                        uv,
                        coord: [cx, cy],
                        program,
                        textures: &self.textures,
                        units: &self.units,
                    };
                    let src = kernel(&frag);

                    let i = ((py * tw + px) * 4) as usize;
                    let Some(slot) = target.data.get_mut(i..i + 4) else {
                        continue;
                    };
                    let out = match blend_state {
                        Some(state) => {
                            let dst = [
                                slot[0] as f32 / 255.0,
                                slot[1] as f32 / 255.0,
                                slot[2] as f32 / 255.0,
                                slot[3] as f32 / 255.0,
                            ];
                            blend(state, src, dst)
                        }
                        None => src,
                    };
                    slot.copy_from_slice(&out.map(to_byte));
                }
            }
        }

        match target_tex {
            Some(t) => {
                if let Some(tex) = self.textures.get_mut(t) {
                    *tex = target;
                }
            }
            None => self.screen = target,
        }
        self.stats.draw_calls += 1;
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
        let source = match framebuffer {
            Some(f) => match self.framebuffers.get(f).and_then(|fb| self.textures.get(fb.color)) {
                Some(t) => t,
                None => return,
            },
            None => &self.screen,
        };
        for row in 0..height as i64 {
            for col in 0..width as i64 {
                let (sx, sy) = (x as i64 + col, y as i64 + row);
                let o = ((row * width as i64 + col) * 4) as usize;
                let Some(dst) = out.get_mut(o..o + 4) else {
                    return;
                };
                if sx < 0 || sy < 0 || sx >= source.width as i64 || sy >= source.height as i64 {
                    dst.fill(0);
                    continue;
                }
                let s = ((sy * source.width as i64 + sx) * 4) as usize;
                match source.data.get(s..s + 4) {
                    Some(px) => dst.copy_from_slice(px),
                    None => dst.fill(0),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_skip_precision_and_arrays() {
        let src = "uniform highp vec4 weights;\nuniform sampler2D inputs[4];\nin vec2 vTexCoord;\n";
        let u = declarations(src, &["uniform"]);
        assert_eq!(u[0], (GlslType::Vec4, "weights".to_string(), 1));
        assert_eq!(u[1], (GlslType::Sampler2D, "inputs".to_string(), 4));
        assert_eq!(declarations(src, &["in"]).len(), 1);
    }

    #[test]
    fn unknown_fragment_fails_to_compile() {
        let mut gpu = SoftGpu::new();
        let err = gpu
            .compile_shader(ShaderStage::Fragment, "void main() { /* unregistered */ }")
            .unwrap_err();
        assert!(err.contains("no kernel"));
    }

    #[test]
    fn lost_context_refuses_new_objects() {
        let mut gpu = SoftGpu::new();
        let t = gpu.create_texture().unwrap();
        gpu.lose_context();
        assert!(gpu.is_lost());
        assert!(!gpu.has_texture(t));
        assert!(gpu.create_texture().is_err());
    }

    #[test]
    fn clear_then_read_default_framebuffer() {
        let mut gpu = SoftGpu::with_screen(2, 2);
        gpu.bind_framebuffer(None);
        gpu.clear([1.0, 0.0, 0.0, 1.0], false);
        let mut out = [0u8; 16];
        gpu.read_pixels(None, 0, 0, 2, 2, &mut out);
        assert_eq!(&out[..4], &[255, 0, 0, 255]);
        assert_eq!(&out[12..], &[255, 0, 0, 255]);
    }

    #[test]
    fn blend_premultiplied_over() {
        let out = blend(
            BlendState::PREMULTIPLIED,
            [0.5, 0.0, 0.0, 0.5],
            [0.0, 0.0, 1.0, 1.0],
        );
        assert_eq!(out, [0.5, 0.0, 0.5, 1.0]);
    }
}
