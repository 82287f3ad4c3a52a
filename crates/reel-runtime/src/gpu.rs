//! The GPU primitive surface the engine renders through.
//!
//! Everything the engine does to a graphics device goes through [`Gpu`]. Object handles are
//! `slotmap` keys issued by the backend; a backend that loses its device simply stops
//! recognising them, and the engine forgets every handle it holds on context loss.

use reel_core::EngineError;

slotmap::new_key_type! {
    pub struct TextureHandle;
    pub struct RenderbufferHandle;
    pub struct FramebufferHandle;
    pub struct ShaderHandle;
    pub struct ProgramHandle;
    pub struct BufferHandle;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// GLSL uniform / attribute types the engine knows how to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlslType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    Bool,
    BVec2,
    BVec3,
    BVec4,
    Mat2,
    Mat3,
    Mat4,
    Sampler2D,
    SamplerCube,
}

impl GlslType {
    pub fn from_glsl_name(name: &str) -> Option<GlslType> {
        Some(match name {
            "float" => GlslType::Float,
            "vec2" => GlslType::Vec2,
            "vec3" => GlslType::Vec3,
            "vec4" => GlslType::Vec4,
            "int" => GlslType::Int,
            "ivec2" => GlslType::IVec2,
            "ivec3" => GlslType::IVec3,
            "ivec4" => GlslType::IVec4,
            "bool" => GlslType::Bool,
            "bvec2" => GlslType::BVec2,
            "bvec3" => GlslType::BVec3,
            "bvec4" => GlslType::BVec4,
            "mat2" => GlslType::Mat2,
            "mat3" => GlslType::Mat3,
            "mat4" => GlslType::Mat4,
            "sampler2D" => GlslType::Sampler2D,
            "samplerCube" => GlslType::SamplerCube,
            _ => return None,
        })
    }

    /// Number of scalar components in one element of this type.
    pub fn components(self) -> usize {
        match self {
            GlslType::Float | GlslType::Int | GlslType::Bool => 1,
            GlslType::Sampler2D | GlslType::SamplerCube => 1,
            GlslType::Vec2 | GlslType::IVec2 | GlslType::BVec2 => 2,
            GlslType::Vec3 | GlslType::IVec3 | GlslType::BVec3 => 3,
            GlslType::Vec4 | GlslType::IVec4 | GlslType::BVec4 | GlslType::Mat2 => 4,
            GlslType::Mat3 => 9,
            GlslType::Mat4 => 16,
        }
    }

    pub fn is_sampler(self) -> bool {
        matches!(self, GlslType::Sampler2D | GlslType::SamplerCube)
    }

    pub fn is_matrix(self) -> bool {
        matches!(self, GlslType::Mat2 | GlslType::Mat3 | GlslType::Mat4)
    }

    /// Integer-valued on the wire (ints, bools and sampler units).
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            GlslType::Int
                | GlslType::IVec2
                | GlslType::IVec3
                | GlslType::IVec4
                | GlslType::Bool
                | GlslType::BVec2
                | GlslType::BVec3
                | GlslType::BVec4
                | GlslType::Sampler2D
                | GlslType::SamplerCube
        )
    }
}

/// Raw uniform payload, already shaped for the uniform's declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformData {
    Float(Vec<f32>),
    Int(Vec<i32>),
    Matrix(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUniform {
    pub name: String,
    pub ty: GlslType,
    pub size: i32,
    pub location: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveAttribute {
    pub name: String,
    pub ty: GlslType,
    pub location: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment,
    MissingAttachment,
    IncompleteDimensions,
    Unsupported,
    Other(u32),
}

impl FramebufferStatus {
    pub fn is_complete(self) -> bool {
        self == FramebufferStatus::Complete
    }

    pub fn reason(self) -> String {
        match self {
            FramebufferStatus::Complete => "complete".into(),
            FramebufferStatus::IncompleteAttachment => "incomplete attachment".into(),
            FramebufferStatus::MissingAttachment => "missing attachment".into(),
            FramebufferStatus::IncompleteDimensions => "attachments differ in size".into(),
            FramebufferStatus::Unsupported => "unsupported attachment combination".into(),
            FramebufferStatus::Other(code) => format!("status 0x{code:x}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub equation: BlendEquation,
}

impl BlendState {
    pub const PREMULTIPLIED: BlendState = BlendState {
        src: BlendFactor::One,
        dst: BlendFactor::OneMinusSrcAlpha,
        equation: BlendEquation::Add,
    };

    pub const STRAIGHT: BlendState = BlendState {
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
        equation: BlendEquation::Add,
    };
}

/// Device limits, reported in shader-compile diagnostics and used by compatibility checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuLimits {
    pub renderer: String,
    pub max_texture_size: u32,
    pub max_texture_units: u32,
    pub max_vertex_uniform_vectors: u32,
    pub max_fragment_uniform_vectors: u32,
    pub max_varying_vectors: u32,
}

impl GpuLimits {
    pub fn describe(&self) -> String {
        format!(
            "renderer: {}\nMAX_TEXTURE_SIZE: {}\nMAX_TEXTURE_IMAGE_UNITS: {}\n\
             MAX_VERTEX_UNIFORM_VECTORS: {}\nMAX_FRAGMENT_UNIFORM_VECTORS: {}\n\
             MAX_VARYING_VECTORS: {}",
            self.renderer,
            self.max_texture_size,
            self.max_texture_units,
            self.max_vertex_uniform_vectors,
            self.max_fragment_uniform_vectors,
            self.max_varying_vectors,
        )
    }
}

/// A graphics context.
///
/// Methods mirror the small slice of GL the engine needs. Calls on handles the backend no
/// longer knows (after context loss, or double deletes) are ignored by implementations.
pub trait Gpu {
    fn limits(&self) -> GpuLimits;

    /// True once the device is gone. The engine stops rendering until restored.
    fn is_lost(&self) -> bool {
        false
    }

    /// Downcast hook for hosts that need the concrete backend back.
    fn as_any(&self) -> Option<&dyn std::any::Any> {
        None
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        None
    }

    // ---- textures ----
    fn create_texture(&mut self) -> Result<TextureHandle, EngineError>;
    /// (Re)allocates RGBA8 storage; uploads `pixels` (bottom row first) when given.
    fn texture_image(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    );
    fn delete_texture(&mut self, texture: TextureHandle);

    // ---- renderbuffers / framebuffers ----
    fn create_renderbuffer(&mut self) -> Result<RenderbufferHandle, EngineError>;
    /// (Re)allocates 16-bit depth storage.
    fn renderbuffer_storage(&mut self, renderbuffer: RenderbufferHandle, width: u32, height: u32);
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferHandle);

    fn create_framebuffer(
        &mut self,
        color: TextureHandle,
        depth: Option<RenderbufferHandle>,
    ) -> Result<FramebufferHandle, EngineError>;
    fn framebuffer_status(&mut self, framebuffer: FramebufferHandle) -> FramebufferStatus;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);

    // ---- shaders ----
    /// Compiles one stage. On failure returns the backend's info log.
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, String>;
    fn delete_shader(&mut self, shader: ShaderHandle);
    /// Links two compiled stages. On failure returns the link log.
    fn link_program(
        &mut self,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    ) -> Result<ProgramHandle, String>;
    fn delete_program(&mut self, program: ProgramHandle);
    fn active_uniforms(&mut self, program: ProgramHandle) -> Vec<ActiveUniform>;
    fn active_attributes(&mut self, program: ProgramHandle) -> Vec<ActiveAttribute>;
    fn use_program(&mut self, program: Option<ProgramHandle>);
    fn set_uniform(&mut self, program: ProgramHandle, location: u32, ty: GlslType, data: &UniformData);
    fn get_uniform(&mut self, program: ProgramHandle, location: u32, ty: GlslType) -> Option<UniformData>;

    // ---- geometry ----
    fn create_buffer(&mut self, kind: BufferKind) -> Result<BufferHandle, EngineError>;
    fn buffer_f32(&mut self, buffer: BufferHandle, data: &[f32]);
    fn buffer_u16(&mut self, buffer: BufferHandle, data: &[u16]);
    fn delete_buffer(&mut self, buffer: BufferHandle);

    // ---- pipeline ----
    /// `None` binds the default (on-screen) framebuffer.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);
    fn viewport(&mut self, x: i32, y: i32, width: u32, height: u32);
    /// `None` disables blending.
    fn set_blend(&mut self, blend: Option<BlendState>);
    fn set_depth_test(&mut self, enabled: bool);
    fn clear(&mut self, color: [f32; 4], depth: bool);
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>);
    fn bind_attribute(&mut self, location: u32, buffer: BufferHandle, components: u32);
    fn draw_indexed(&mut self, indices: BufferHandle, count: u32);

    /// Reads RGBA8 pixels from `framebuffer` (`None` = default) into `out`, bottom row first.
    fn read_pixels(
        &mut self,
        framebuffer: Option<FramebufferHandle>,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        out: &mut [u8],
    );
}

impl std::fmt::Debug for dyn Gpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gpu")
            .field("renderer", &self.limits().renderer)
            .field("lost", &self.is_lost())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glsl_names_round_trip_through_the_table() {
        assert_eq!(GlslType::from_glsl_name("vec4"), Some(GlslType::Vec4));
        assert_eq!(GlslType::from_glsl_name("sampler2D"), Some(GlslType::Sampler2D));
        assert_eq!(GlslType::from_glsl_name("vec5"), None);
        assert_eq!(GlslType::Mat4.components(), 16);
        assert!(GlslType::Sampler2D.is_integer());
    }

    #[test]
    fn incomplete_status_has_a_reason() {
        assert!(!FramebufferStatus::MissingAttachment.is_complete());
        assert_eq!(FramebufferStatus::Other(0x8cd6).reason(), "status 0x8cd6");
    }
}
