//! Per-kind node state the engine keeps next to the graph topology.
//!
//! Topology and flags live in `reel_graph::Graph`; these bodies hold the plugin instance and
//! the GPU objects a node owns.

use std::sync::Arc;

use reel_core::Mat4;

use crate::framebuffer::Framebuffer;
use crate::gpu::{FramebufferHandle, Gpu, TextureHandle};
use crate::input::{InputSpec, InputValues};
use crate::model::Model;
use crate::plugin::{Effect, EffectPlugin, Source, Target, Transform};
use crate::media::SurfaceId;
use crate::shader::ShaderProgram;

/// Lifecycle every node body shares.
pub(crate) trait GraphNode {
    /// Output texture, if one has been produced.
    fn texture(&self) -> Option<TextureHandle>;

    /// Framebuffer holding the output, for read-back.
    fn framebuffer(&self) -> Option<FramebufferHandle>;

    fn cumulative_matrix(&self) -> Mat4 {
        Mat4::IDENTITY
    }

    /// Drops GPU handles without touching the (dead) context.
    fn lose_context(&mut self);

    /// Deletes owned GPU objects, then retires the plugin instance.
    fn release(&mut self, gpu: &mut dyn Gpu);

    /// Final teardown of the plugin instance when no context is attached. Runs after
    /// `lose_context`.
    fn retire(&mut self) {}
}

fn release_fb(fb: &mut Option<Framebuffer>, gpu: &mut dyn Gpu) {
    if let Some(mut fb) = fb.take() {
        fb.destroy(gpu);
    }
}

fn forget_fb(fb: &mut Option<Framebuffer>) {
    if let Some(mut fb) = fb.take() {
        fb.forget();
    }
}

pub(crate) struct SourceBody {
    pub instance: Box<dyn Source>,
    pub texture: Option<TextureHandle>,
    pub owns_texture: bool,
    /// Created on first read-back.
    pub read_fb: Option<Framebuffer>,
    /// Set after a denied upload; the texture keeps its last contents.
    pub refresh_disabled: bool,
}

impl SourceBody {
    pub fn new(instance: Box<dyn Source>) -> Self {
        Self {
            instance,
            texture: None,
            owns_texture: false,
            read_fb: None,
            refresh_disabled: false,
        }
    }
}

impl GraphNode for SourceBody {
    fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    fn framebuffer(&self) -> Option<FramebufferHandle> {
        self.read_fb.as_ref().map(Framebuffer::handle)
    }

    fn lose_context(&mut self) {
        self.texture = None;
        self.owns_texture = false;
        forget_fb(&mut self.read_fb);
        self.instance.lose_context();
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        release_fb(&mut self.read_fb, gpu);
        if let (Some(tex), true) = (self.texture.take(), self.owns_texture) {
            gpu.delete_texture(tex);
        }
        self.retire();
    }

    fn retire(&mut self) {
        self.instance.destroy();
    }
}

pub(crate) struct EffectBody {
    pub plugin: Arc<dyn EffectPlugin>,
    pub instance: Box<dyn Effect>,
    pub schema: Vec<InputSpec>,
    pub inputs: InputValues,
    /// Instance-owned program; unused for common-shader effects.
    pub shader: Option<ShaderProgram>,
    pub common: bool,
    pub shader_dirty: bool,
    pub framebuffer: Option<Framebuffer>,
    pub matte: Option<Model>,
    pub initialized: bool,
}

impl EffectBody {
    pub fn spec(&self, name: &str) -> Option<&InputSpec> {
        self.schema.iter().find(|s| s.name == name)
    }
}

impl GraphNode for EffectBody {
    fn texture(&self) -> Option<TextureHandle> {
        self.framebuffer.as_ref().map(Framebuffer::texture)
    }

    fn framebuffer(&self) -> Option<FramebufferHandle> {
        self.framebuffer.as_ref().map(Framebuffer::handle)
    }

    fn lose_context(&mut self) {
        forget_fb(&mut self.framebuffer);
        if let Some(mut s) = self.shader.take() {
            s.forget();
        }
        if let Some(m) = self.matte.as_mut() {
            m.forget();
        }
        self.shader_dirty = true;
        self.initialized = false;
        self.instance.lose_context();
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        release_fb(&mut self.framebuffer, gpu);
        if let Some(mut s) = self.shader.take() {
            s.destroy(gpu);
        }
        if let Some(m) = self.matte.as_mut() {
            m.release(gpu);
        }
        self.instance.destroy(Some(gpu));
    }

    fn retire(&mut self) {
        self.instance.destroy(None);
    }
}

pub(crate) struct TransformBody {
    pub instance: Box<dyn Transform>,
    pub cumulative: Mat4,
    /// Owned only once the transform has been rasterized.
    pub framebuffer: Option<Framebuffer>,
    /// Last texture handed downstream (own or forwarded).
    pub texture: Option<TextureHandle>,
}

impl GraphNode for TransformBody {
    fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    fn framebuffer(&self) -> Option<FramebufferHandle> {
        self.framebuffer.as_ref().map(Framebuffer::handle)
    }

    fn cumulative_matrix(&self) -> Mat4 {
        self.cumulative
    }

    fn lose_context(&mut self) {
        forget_fb(&mut self.framebuffer);
        self.texture = None;
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        release_fb(&mut self.framebuffer, gpu);
        self.texture = None;
        self.retire();
    }

    fn retire(&mut self) {
        self.instance.destroy();
    }
}

pub(crate) struct TargetBody {
    pub instance: Box<dyn Target>,
    pub surface: Option<SurfaceId>,
}

impl GraphNode for TargetBody {
    fn texture(&self) -> Option<TextureHandle> {
        None
    }

    fn framebuffer(&self) -> Option<FramebufferHandle> {
        self.instance.destination()
    }

    fn lose_context(&mut self) {
        self.instance.lose_context();
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        self.instance.destroy(Some(gpu));
    }

    fn retire(&mut self) {
        self.instance.destroy(None);
    }
}

pub(crate) enum NodeBody {
    Source(SourceBody),
    Effect(EffectBody),
    Transform(TransformBody),
    Target(TargetBody),
}

impl NodeBody {
    fn inner(&self) -> &dyn GraphNode {
        match self {
            NodeBody::Source(b) => b,
            NodeBody::Effect(b) => b,
            NodeBody::Transform(b) => b,
            NodeBody::Target(b) => b,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn GraphNode {
        match self {
            NodeBody::Source(b) => b,
            NodeBody::Effect(b) => b,
            NodeBody::Transform(b) => b,
            NodeBody::Target(b) => b,
        }
    }

    pub fn as_effect(&self) -> Option<&EffectBody> {
        match self {
            NodeBody::Effect(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_effect_mut(&mut self) -> Option<&mut EffectBody> {
        match self {
            NodeBody::Effect(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_source(&self) -> Option<&SourceBody> {
        match self {
            NodeBody::Source(b) => Some(b),
            _ => None,
        }
    }
}

impl GraphNode for NodeBody {
    fn texture(&self) -> Option<TextureHandle> {
        self.inner().texture()
    }

    fn framebuffer(&self) -> Option<FramebufferHandle> {
        self.inner().framebuffer()
    }

    fn cumulative_matrix(&self) -> Mat4 {
        self.inner().cumulative_matrix()
    }

    fn lose_context(&mut self) {
        self.inner_mut().lose_context();
    }

    fn release(&mut self, gpu: &mut dyn Gpu) {
        self.inner_mut().release(gpu);
    }

    fn retire(&mut self) {
        self.inner_mut().retire();
    }
}

impl std::fmt::Debug for NodeBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            NodeBody::Source(_) => "Source",
            NodeBody::Effect(_) => "Effect",
            NodeBody::Transform(_) => "Transform",
            NodeBody::Target(_) => "Target",
        };
        f.debug_struct(kind)
            .field("texture", &self.texture())
            .field("framebuffer", &self.framebuffer())
            .finish()
    }
}
