//! Pull-based rendering: each node renders its upstream first, then itself if dirty.

use reel_core::{EngineError, Mat4};
use reel_graph::{NodeId, NodeKind, Upstream};

use super::{ensure_shader, Engine};
use crate::draw::{draw, DrawOptions, DrawTarget};
use crate::framebuffer::Framebuffer;
use crate::gpu::{FramebufferHandle, TextureHandle};
use crate::handle::NodeRef;
use crate::input::{InputType, InputValues, Value};
use crate::media::SourceError;
use crate::nodes::{GraphNode, NodeBody};
use crate::plugin::Pass;
use crate::shader::{ShaderProgram, UniformValue, Uniforms};
use crate::shaders::{BASE_FRAGMENT, BASE_VERTEX};

impl Engine {
    pub(super) fn draw_options(&self) -> DrawOptions {
        if self.config.premultiplied_alpha {
            DrawOptions::default()
        } else {
            DrawOptions::straight_alpha()
        }
    }

    /// Compiles the pass-through program and uploads the unit quad if either is missing.
    pub(super) fn ensure_base(&mut self) -> Result<(), EngineError> {
        let gpu = self.gpu.as_deref_mut().ok_or(EngineError::NoContext)?;
        if self.base_shader.is_none() {
            self.base_shader = Some(ShaderProgram::new(gpu, BASE_VERTEX, BASE_FRAGMENT)?);
        }
        if self.rect.buffers().is_none() {
            self.rect.upload(gpu)?;
        }
        Ok(())
    }

    /// Creates an effect's framebuffer, runs its `initialize` hook and builds its shader.
    pub(super) fn initialize_effect(&mut self, id: NodeId) -> Result<(), EngineError> {
        let (w, h) = self
            .graph
            .node(id)
            .map(|n| (n.width, n.height))
            .unwrap_or((1, 1));
        let hook = self.hook_of(id);
        let Some(gpu) = self.gpu.as_deref_mut() else {
            return Ok(());
        };
        let Some(NodeBody::Effect(body)) = self.nodes.get_mut(&id) else {
            return Ok(());
        };
        if body.initialized {
            return Ok(());
        }
        if body.framebuffer.is_none() {
            body.framebuffer = Some(Framebuffer::new(gpu, w, h, None)?);
        }
        body.instance.initialize(gpu, w, h)?;
        body.initialized = true;
        ensure_shader(gpu, &hook, body, &mut self.common)
    }

    /// Renders `id` and returns its output texture. `force` asks transforms to rasterize
    /// instead of forwarding their upstream texture.
    pub(super) fn render_node(&mut self, id: NodeId, force: bool) -> Result<Option<TextureHandle>, EngineError> {
        match self.kind_of(id) {
            Some(NodeKind::Source) => self.render_source(id),
            Some(NodeKind::Effect) => self.render_effect(id),
            Some(NodeKind::Transform) => self.render_transform(id, force),
            _ => Ok(None),
        }
    }

    fn render_source(&mut self, id: NodeId) -> Result<Option<TextureHandle>, EngineError> {
        let dirty = self.graph.node(id).map(|n| n.dirty()).unwrap_or(false);
        let Some(gpu) = self.gpu.as_deref_mut() else {
            return Ok(None);
        };
        let Some(NodeBody::Source(body)) = self.nodes.get_mut(&id) else {
            return Ok(None);
        };

        let mut fresh = false;
        let texture = match body.texture {
            Some(t) => t,
            None => {
                let (t, owned) = match body.instance.external_texture() {
                    Some(t) => (t, false),
                    None => (gpu.create_texture()?, true),
                };
                body.texture = Some(t);
                body.owns_texture = owned;
                fresh = owned;
                t
            }
        };

        let stale = dirty || fresh || body.instance.check_dirty();
        if !stale || !body.instance.loaded() {
            return Ok(Some(texture));
        }
        if body.refresh_disabled && !fresh {
            self.graph.clear_dirty(id);
            return Ok(Some(texture));
        }

        match body.instance.render(gpu, texture) {
            Ok(_) => {
                self.graph.clear_dirty(id);
                self.graph.emit(id, reel_core::EventKind::Render);
            }
            Err(SourceError::Denied(reason)) => {
                tracing::warn!(node = %id, %reason, "media upload denied; keeping last frame");
                body.refresh_disabled = true;
                self.graph.clear_dirty(id);
            }
            Err(SourceError::NotReady) => {}
            Err(SourceError::Other(msg)) => return Err(EngineError::Other(msg)),
        }
        Ok(Some(texture))
    }

    fn render_effect(&mut self, id: NodeId) -> Result<Option<TextureHandle>, EngineError> {
        if self.gpu.is_none() {
            return Ok(None);
        }
        self.initialize_effect(id)?;
        let hook = self.hook_of(id);
        {
            let gpu = self.gpu.as_deref_mut().ok_or(EngineError::NoContext)?;
            let Some(NodeBody::Effect(body)) = self.nodes.get_mut(&id) else {
                return Ok(None);
            };
            ensure_shader(gpu, &hook, body, &mut self.common)?;
        }

        let Some(node) = self.graph.node(id) else {
            return Ok(None);
        };
        let (w, h) = (node.width, node.height);
        if !(node.dirty() && node.ready()) {
            return Ok(self.nodes.get(&id).and_then(GraphNode::texture));
        }
        let slots: Vec<(String, NodeId)> = match node.upstream() {
            Upstream::Slots(slots) => slots
                .iter()
                .filter(|s| s.relevant)
                .filter_map(|s| s.node.map(|n| (s.name.clone(), n)))
                .collect(),
            _ => Vec::new(),
        };

        let mut textures: Vec<(String, TextureHandle)> = Vec::with_capacity(slots.len());
        for (name, up) in slots {
            let force = match self.effect_body(id) {
                Some(b) => !b.instance.in_place(&name, &b.inputs),
                None => true,
            };
            if let Some(t) = self.render_node(up, force)? {
                textures.push((name, t));
            }
        }

        let options = self.draw_options();
        let gpu = self.gpu.as_deref_mut().ok_or(EngineError::NoContext)?;
        let Some(NodeBody::Effect(body)) = self.nodes.get_mut(&id) else {
            return Ok(None);
        };

        let mut uniforms = Uniforms::new();
        uniforms.insert("resolution".into(), UniformValue::Floats(vec![w as f32, h as f32]));
        uniforms.insert("transform".into(), UniformValue::Mat4(Mat4::IDENTITY));
        for spec in &body.schema {
            let name = spec.uniform_name().to_string();
            let value = match (spec.ty, body.inputs.get(&spec.name)) {
                (InputType::Image, _) => textures
                    .iter()
                    .find(|(n, _)| *n == spec.name)
                    .map(|(_, t)| UniformValue::Texture(*t)),
                (_, Some(v)) => uniform_value(v),
                (_, None) => None,
            };
            if let Some(value) = value {
                uniforms.insert(name, value);
            }
        }

        let crate::nodes::EffectBody {
            instance,
            shader,
            framebuffer,
            matte,
            inputs,
            common,
            ..
        } = body;
        let shader = if *common {
            self.common.get(&hook).and_then(|c| c.program.as_ref())
        } else {
            shader.as_ref()
        }
        .ok_or_else(|| EngineError::other(format!("{id} has no shader")))?;
        let fb = framebuffer
            .as_ref()
            .ok_or_else(|| EngineError::other(format!("{id} has no framebuffer")))?;
        if let Some(m) = matte.as_mut() {
            if m.buffers().is_none() {
                m.upload(gpu)?;
            }
        }
        let model = matte.as_ref().unwrap_or(&self.rect);

        let mut pass = Pass {
            gpu,
            shader,
            model,
            uniforms,
            target: DrawTarget {
                framebuffer: Some(fb.handle()),
                width: w,
                height: h,
            },
            options,
            inputs: &*inputs,
        };
        instance.draw(&mut pass)?;
        let texture = fb.texture();

        self.graph.clear_dirty(id);
        self.graph.emit(id, reel_core::EventKind::Render);
        Ok(Some(texture))
    }

    fn render_transform(&mut self, id: NodeId, force: bool) -> Result<Option<TextureHandle>, EngineError> {
        let Some(node) = self.graph.node(id) else {
            return Ok(None);
        };
        let (w, h) = (node.width, node.height);
        let source = match node.upstream() {
            Upstream::Single(s) => *s,
            _ => None,
        };

        let source_texture = match source {
            Some(s) => self.render_node(s, false)?,
            None => None,
        };
        let source_matrix = source
            .and_then(|s| self.nodes.get(&s))
            .map(GraphNode::cumulative_matrix)
            .unwrap_or(Mat4::IDENTITY);

        let transform_dirty = self.graph.node(id).map(|n| n.transform_dirty()).unwrap_or(false);
        if transform_dirty {
            let Some(NodeBody::Transform(body)) = self.nodes.get_mut(&id) else {
                return Ok(None);
            };
            body.cumulative = match body.instance.matrix(w, h) {
                Some(local) => Mat4::mul(&local, &source_matrix),
                None => source_matrix,
            };
            self.graph.clear_transform_dirty(id);
        }

        let Some(source_texture) = source_texture else {
            if let Some(NodeBody::Transform(body)) = self.nodes.get_mut(&id) {
                body.texture = None;
            }
            return Ok(None);
        };

        let render_dirty = self.graph.node(id).map(|n| n.render_dirty()).unwrap_or(false);
        let options = self.draw_options();
        let Some(NodeBody::Transform(body)) = self.nodes.get_mut(&id) else {
            return Ok(None);
        };

        let texture = match (force, self.gpu.as_deref_mut(), self.base_shader.as_ref()) {
            (true, Some(gpu), Some(base)) => {
                if render_dirty || body.framebuffer.is_none() {
                    match body.framebuffer.as_mut() {
                        Some(fb) => fb.resize(gpu, w, h),
                        None => body.framebuffer = Some(Framebuffer::new(gpu, w, h, None)?),
                    }
                    let fb = body
                        .framebuffer
                        .as_ref()
                        .ok_or_else(|| EngineError::other(format!("{id} has no framebuffer")))?;
                    let mut uniforms = Uniforms::new();
                    uniforms.insert("source".into(), UniformValue::Texture(source_texture));
                    uniforms.insert("transform".into(), UniformValue::Mat4(body.cumulative));
                    uniforms.insert("resolution".into(), UniformValue::Floats(vec![w as f32, h as f32]));
                    draw(
                        gpu,
                        base,
                        &self.rect,
                        &uniforms,
                        DrawTarget {
                            framebuffer: Some(fb.handle()),
                            width: w,
                            height: h,
                        },
                        &options,
                    )?;
                    self.graph.clear_render_dirty(id);
                    self.graph.emit(id, reel_core::EventKind::Render);
                }
                body.framebuffer
                    .as_ref()
                    .map(Framebuffer::texture)
                    .unwrap_or(source_texture)
            }
            _ => source_texture,
        };
        body.texture = Some(texture);
        self.graph.clear_dirty(id);
        Ok(Some(texture))
    }

    /// Draws a target now if it is ready. Without a context this does nothing.
    pub fn render_target(&mut self, r: impl Into<NodeRef>) -> Result<(), EngineError> {
        self.check_alive()?;
        let id = self.resolve(r)?;
        if self.kind_of(id) != Some(NodeKind::Target) {
            return Err(EngineError::other(format!("{id} is not a target")));
        }
        let result = self.render_target_id(id);
        self.sync_wake();
        result
    }

    pub(super) fn render_target_id(&mut self, id: NodeId) -> Result<(), EngineError> {
        if self.gpu.is_none() {
            return Ok(());
        }
        let Some(node) = self.graph.node(id) else {
            return Ok(());
        };
        let source = match node.upstream() {
            Upstream::Single(Some(s)) if node.ready() => *s,
            _ => return Ok(()),
        };

        self.ensure_base()?;
        let Some(texture) = self.render_node(source, false)? else {
            return Ok(());
        };
        let matrix = self
            .nodes
            .get(&source)
            .map(GraphNode::cumulative_matrix)
            .unwrap_or(Mat4::IDENTITY);

        let options = self.draw_options();
        let gpu = self.gpu.as_deref_mut().ok_or(EngineError::NoContext)?;
        let base = self.base_shader.as_ref().ok_or(EngineError::NoContext)?;
        let Some(NodeBody::Target(body)) = self.nodes.get_mut(&id) else {
            return Ok(());
        };
        body.instance.prepare(gpu)?;
        let (w, h) = body.instance.size();

        let mut uniforms = Uniforms::new();
        uniforms.insert("source".into(), UniformValue::Texture(texture));
        uniforms.insert("transform".into(), UniformValue::Mat4(matrix));
        uniforms.insert("resolution".into(), UniformValue::Floats(vec![w as f32, h as f32]));
        let no_inputs = InputValues::new();
        let mut pass = Pass {
            gpu,
            shader: base,
            model: &self.rect,
            uniforms,
            target: DrawTarget {
                framebuffer: body.instance.destination(),
                width: w,
                height: h,
            },
            options,
            inputs: &no_inputs,
        };
        body.instance.render(&mut pass)?;

        self.graph.clear_dirty(id);
        self.graph.emit(id, reel_core::EventKind::Render);
        Ok(())
    }

    /// Renders as needed and reads `width`×`height` RGBA pixels at (`x`, `y`), bottom row
    /// first.
    pub fn read_pixels(
        &mut self,
        r: impl Into<NodeRef>,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, EngineError> {
        let mut out = vec![0u8; width as usize * height as usize * 4];
        self.read_pixels_into(r, x, y, width, height, &mut out)?;
        Ok(out)
    }

    /// Like [`Engine::read_pixels`] into a caller buffer of exactly `width * height * 4`
    /// bytes.
    pub fn read_pixels_into(
        &mut self,
        r: impl Into<NodeRef>,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        out: &mut [u8],
    ) -> Result<(), EngineError> {
        self.check_alive()?;
        let id = self.resolve(r)?;
        let expected = width as usize * height as usize * 4;
        if out.len() != expected {
            return Err(EngineError::BadReadBuffer {
                expected,
                got: out.len(),
            });
        }
        if self.gpu.is_none() {
            return Err(EngineError::NoContext);
        }

        let kind = self.kind_of(id);
        let framebuffer: Option<FramebufferHandle> = match kind {
            Some(NodeKind::Target) => {
                self.render_target_id(id)?;
                self.nodes.get(&id).and_then(GraphNode::framebuffer)
            }
            Some(NodeKind::Source) => {
                let (w, h) = self.graph.node(id).map(|n| (n.width, n.height)).unwrap_or((1, 1));
                let texture = self.render_node(id, false)?;
                let gpu = self.gpu.as_deref_mut().ok_or(EngineError::NoContext)?;
                let Some(NodeBody::Source(body)) = self.nodes.get_mut(&id) else {
                    return Err(EngineError::NoContext);
                };
                let wrapped = body.read_fb.as_ref().map(Framebuffer::texture);
                if let Some(t) = texture.filter(|t| wrapped != Some(*t)) {
                    if let Some(mut old) = body.read_fb.take() {
                        old.destroy(gpu);
                    }
                    body.read_fb = Some(Framebuffer::new(gpu, w, h, Some(t))?);
                }
                body.read_fb.as_ref().map(Framebuffer::handle)
            }
            Some(NodeKind::Transform) => {
                self.ensure_base()?;
                self.render_node(id, true)?;
                self.nodes.get(&id).and_then(GraphNode::framebuffer)
            }
            Some(NodeKind::Effect) => {
                self.render_node(id, false)?;
                self.nodes.get(&id).and_then(GraphNode::framebuffer)
            }
            None => None,
        };

        if framebuffer.is_none() && kind != Some(NodeKind::Target) {
            return Err(EngineError::other(format!("{id} has nothing to read yet")));
        }
        let gpu = self.gpu.as_deref_mut().ok_or(EngineError::NoContext)?;
        gpu.read_pixels(framebuffer, x, y, width, height, out);
        self.sync_wake();
        Ok(())
    }
}

/// Uniform binding for a non-image input value; strings and enums are not bound.
fn uniform_value(v: &Value) -> Option<UniformValue> {
    match v {
        Value::Number(n) => Some(UniformValue::Float(*n as f32)),
        Value::Boolean(b) => Some(UniformValue::Bool(*b)),
        Value::Color(c) => Some(UniformValue::Floats(c.to_vec())),
        Value::Vector(v) => Some(UniformValue::Floats(v.iter().map(|x| *x as f32).collect())),
        _ => None,
    }
}
