//! The engine instance: node registry, GPU context, render scheduling.
//!
//! One `Engine` owns one graph and (at most) one context. Nodes are created through the
//! factory methods here and addressed afterwards through the opaque handles in
//! [`crate::handle`]. Rendering is pull-based: a target renders its source chain, each node
//! re-rendering only if dirty.

mod alias;
mod events;
mod inputs;
mod lifecycle;
mod render;
mod scheduler;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use reel_core::{EngineConfig, EngineError};
use reel_graph::{Graph, NodeId, NodeKind, Upstream};

use crate::framebuffer::Framebuffer;
use crate::gpu::{Gpu, TextureHandle};
use crate::handle::{EffectHandle, EngineId, NodeRef, SourceHandle, TargetHandle, TransformHandle};
use crate::input::{merge_schema, normalize_schema, InputSpec, InputType, InputValues, Value};
use crate::media::{RawSource, RawTarget};
use crate::model::Model;
use crate::nodes::{EffectBody, GraphNode, NodeBody, SourceBody, TargetBody, TransformBody};
use crate::plugin::{Options, Registry, Source, Target};
use crate::shader::ShaderProgram;
use crate::shaders::ShaderSource;
use crate::surface;

pub use alias::RESERVED_ENGINE_NAMES;
pub use events::{Listener, ListenerId};
pub use scheduler::{CallbackId, FrameCallback, FrameScheduler, ManualScheduler};

use events::Listeners;
use scheduler::Daemon;

/// A program shared by every instance of one effect hook.
#[derive(Debug, Default)]
struct CommonShader {
    refs: usize,
    program: Option<ShaderProgram>,
}

pub struct Engine {
    id: EngineId,
    config: EngineConfig,
    registry: Arc<Registry>,
    gpu: Option<Box<dyn Gpu>>,
    graph: Graph,
    nodes: BTreeMap<NodeId, NodeBody>,
    base_shader: Option<ShaderProgram>,
    rect: Model,
    common: HashMap<String, CommonShader>,
    aliases: BTreeMap<String, alias::Alias>,
    defaults: HashMap<String, InputValues>,
    listeners: Listeners,
    daemon: Daemon,
    scheduler: Box<dyn FrameScheduler>,
    destroyed: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("gpu", &self.gpu)
            .field("nodes", &self.nodes.len())
            .field("aliases", &self.aliases.keys().collect::<Vec<_>>())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_registry(config, Registry::global())
    }

    pub fn with_registry(config: EngineConfig, registry: Arc<Registry>) -> Self {
        let id = EngineId::next();
        tracing::debug!(engine = id.0, "engine created");
        Self {
            id,
            config,
            registry,
            gpu: None,
            graph: Graph::new(),
            nodes: BTreeMap::new(),
            base_shader: None,
            rect: Model::rectangle(),
            common: HashMap::new(),
            aliases: BTreeMap::new(),
            defaults: HashMap::new(),
            listeners: Listeners::default(),
            daemon: Daemon::default(),
            scheduler: Box::new(ManualScheduler),
            destroyed: false,
        }
    }

    pub fn id(&self) -> EngineId {
        self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn gpu(&self) -> Option<&dyn Gpu> {
        self.gpu.as_deref()
    }

    /// The attached context as a concrete backend type.
    pub fn gpu_as<T: 'static>(&self) -> Option<&T> {
        self.gpu.as_deref()?.as_any()?.downcast_ref::<T>()
    }

    pub fn gpu_as_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.gpu.as_deref_mut()?.as_any_mut()?.downcast_mut::<T>()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn check_alive(&self) -> Result<(), EngineError> {
        if self.destroyed {
            return Err(EngineError::EngineDestroyed);
        }
        Ok(())
    }

    fn node_ref(&self, node: NodeId) -> NodeRef {
        NodeRef {
            engine: self.id,
            node,
        }
    }

    /// Maps a handle to a live node of this engine.
    fn resolve(&self, r: impl Into<NodeRef>) -> Result<NodeId, EngineError> {
        let r = r.into();
        if r.engine != self.id {
            return Err(EngineError::ForeignNode(r.node.0));
        }
        if self.graph.is_retired(r.node) {
            return Err(EngineError::Destroyed(r.node.0));
        }
        if !self.graph.contains(r.node) {
            return Err(EngineError::ForeignNode(r.node.0));
        }
        Ok(r.node)
    }

    fn kind_of(&self, id: NodeId) -> Option<NodeKind> {
        self.graph.node(id).map(|n| n.kind)
    }

    fn hook_of(&self, id: NodeId) -> String {
        self.graph
            .node(id)
            .map(|n| n.hook.clone())
            .unwrap_or_default()
    }

    fn effect_body(&self, id: NodeId) -> Option<&EffectBody> {
        self.nodes.get(&id).and_then(NodeBody::as_effect)
    }

    fn effect_body_mut(&mut self, id: NodeId) -> Option<&mut EffectBody> {
        self.nodes.get_mut(&id).and_then(NodeBody::as_effect_mut)
    }

    // ---------------------------------------------------------------------------------------------
    // Node factories
    // ---------------------------------------------------------------------------------------------

    /// Creates an effect of type `hook`.
    pub fn effect(&mut self, hook: &str, options: Options) -> Result<EffectHandle, EngineError> {
        self.check_alive()?;
        let plugin = self
            .registry
            .effect(hook)
            .ok_or_else(|| EngineError::UnknownType {
                kind: "effect",
                name: hook.to_string(),
            })?;

        let mut schema = merge_schema(plugin.inputs(), plugin.definition(&options));
        normalize_schema(&mut schema)?;

        let table = self.defaults.get(hook);
        let mut inputs = InputValues::new();
        for spec in &schema {
            let value = match spec.ty {
                InputType::Image => Value::Null,
                _ => effective_default(table, spec),
            };
            inputs.insert(spec.name.clone(), value);
        }

        let instance = plugin.create(&options);
        let common = plugin.common_shader();
        let id = self.graph.add_node(NodeKind::Effect, hook);
        for spec in schema.iter().filter(|s| s.ty == InputType::Image) {
            self.graph.add_slot(id, &spec.name)?;
        }
        self.nodes.insert(
            id,
            NodeBody::Effect(EffectBody {
                plugin,
                instance,
                schema,
                inputs,
                shader: None,
                common,
                shader_dirty: true,
                framebuffer: None,
                matte: None,
                initialized: false,
            }),
        );
        if common {
            self.common.entry(hook.to_string()).or_default().refs += 1;
        }

        self.refresh_relevance(id);
        self.update_effect_size(id);
        if self.gpu.is_some() {
            if let Err(e) = self.initialize_effect(id) {
                self.discard(id);
                return Err(e);
            }
        }
        tracing::debug!(node = %id, hook, "effect created");
        self.sync_wake();
        Ok(EffectHandle(self.node_ref(id)))
    }

    /// Wraps raw media as a source node. `hook` names the source type; with `None` every
    /// registered source plugin is probed in order. Media that already backs a source node of
    /// this engine returns that node.
    pub fn source(
        &mut self,
        hook: Option<&str>,
        raw: impl Into<RawSource>,
        options: Options,
    ) -> Result<SourceHandle, EngineError> {
        self.check_alive()?;
        let raw = raw.into();
        if let Some(existing) = self.find_source(&raw) {
            return Ok(SourceHandle(self.node_ref(existing)));
        }
        let id = self.create_source(hook, &raw, &options)?;
        self.sync_wake();
        Ok(SourceHandle(self.node_ref(id)))
    }

    fn find_source(&self, raw: &RawSource) -> Option<NodeId> {
        self.nodes.iter().find_map(|(id, body)| {
            body.as_source()
                .filter(|s| s.instance.compare(raw))
                .map(|_| *id)
        })
    }

    fn create_source(
        &mut self,
        hook: Option<&str>,
        raw: &RawSource,
        options: &Options,
    ) -> Result<NodeId, EngineError> {
        let unknown = |name: &str| EngineError::UnknownType {
            kind: "source",
            name: name.to_string(),
        };
        let (hook, instance): (String, Box<dyn Source>) = match hook {
            Some(h) => {
                let plugin = self.registry.source(h).ok_or_else(|| unknown(h))?;
                let instance = plugin.create(raw, options, true).ok_or_else(|| unknown(h))?;
                (h.to_string(), instance)
            }
            None => self
                .registry
                .source_plugins()
                .into_iter()
                .find_map(|(h, p)| p.create(raw, options, false).map(|i| (h, i)))
                .ok_or_else(|| unknown(raw.kind()))?,
        };

        let id = self.graph.add_node(NodeKind::Source, hook.as_str());
        self.nodes
            .insert(id, NodeBody::Source(SourceBody::new(instance)));
        self.poll_source(id);
        tracing::debug!(node = %id, hook = %hook, "source created");
        Ok(id)
    }

    /// Creates a transform of type `hook`. Options are applied as initial property values.
    pub fn transform(&mut self, hook: &str, options: Options) -> Result<TransformHandle, EngineError> {
        self.check_alive()?;
        let plugin = self
            .registry
            .transform(hook)
            .ok_or_else(|| EngineError::UnknownType {
                kind: "transform",
                name: hook.to_string(),
            })?;
        let instance = plugin.create(&options)?;
        let id = self.graph.add_node(NodeKind::Transform, hook);
        self.nodes.insert(
            id,
            NodeBody::Transform(TransformBody {
                instance,
                cumulative: reel_core::Mat4::IDENTITY,
                framebuffer: None,
                texture: None,
            }),
        );
        tracing::debug!(node = %id, hook, "transform created");
        Ok(TransformHandle(self.node_ref(id)))
    }

    /// Creates a render target. The first target that carries a context attaches it.
    ///
    /// Options: `auto` (render from the daemon; defaults to on after [`Engine::go`]),
    /// `source` (initial upstream node), plus whatever the target plugin reads.
    pub fn target(
        &mut self,
        hook: Option<&str>,
        raw: impl Into<RawTarget>,
        options: Options,
    ) -> Result<TargetHandle, EngineError> {
        self.check_alive()?;
        let mut raw = raw.into();

        let existing = self.nodes.iter().find_map(|(id, body)| match body {
            NodeBody::Target(t) if t.instance.compare(&raw) => Some(*id),
            _ => None,
        });
        if let Some(id) = existing {
            return Ok(TargetHandle(self.node_ref(id)));
        }

        let unknown = |name: &str| EngineError::UnknownType {
            kind: "target",
            name: name.to_string(),
        };
        let (hook, mut instance): (String, Box<dyn Target>) = match hook {
            Some(h) => {
                let plugin = self.registry.target(h).ok_or_else(|| unknown(h))?;
                let instance = plugin
                    .create(&mut raw, &options, true)
                    .ok_or_else(|| unknown(h))?;
                (h.to_string(), instance)
            }
            None => {
                let mut found = None;
                for (h, p) in self.registry.target_plugins() {
                    if let Some(i) = p.create(&mut raw, &options, false) {
                        found = Some((h, i));
                        break;
                    }
                }
                found.ok_or_else(|| unknown(raw.kind()))?
            }
        };

        if let Some(ctx) = instance.take_context() {
            if self.gpu.is_none() {
                self.attach_context(ctx)?;
            } else {
                tracing::warn!(hook = %hook, "target brought its own context; engine keeps its current one");
            }
        }
        if self.gpu.is_none() {
            tracing::info!(hook = %hook, "no graphics context yet; target will not draw until one is attached");
        }

        let surface_id = instance.surface();
        let (w, h) = instance.size();
        let id = self.graph.add_node(NodeKind::Target, hook.as_str());
        self.graph.set_size(id, w.max(1), h.max(1));
        if let Some(s) = surface_id {
            surface::claim(s, self.id);
        }
        self.nodes.insert(
            id,
            NodeBody::Target(TargetBody {
                instance,
                surface: surface_id,
            }),
        );

        let auto = options
            .get("auto")
            .map(Value::truthy)
            .unwrap_or(self.daemon.auto);
        self.graph.set_auto(id, auto)?;

        if let Some(source) = options.get("source") {
            if let Err(e) = self.set_single_source(id, "source", source) {
                self.discard(id);
                return Err(e);
            }
        }
        tracing::debug!(node = %id, hook = %hook, "target created");
        self.sync_wake();
        Ok(TargetHandle(self.node_ref(id)))
    }

    // ---------------------------------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------------------------------

    /// Effect node ids in creation order.
    pub fn effects(&self) -> Vec<NodeId> {
        self.graph.ids_of(NodeKind::Effect)
    }

    pub fn sources(&self) -> Vec<NodeId> {
        self.graph.ids_of(NodeKind::Source)
    }

    pub fn transforms(&self) -> Vec<NodeId> {
        self.graph.ids_of(NodeKind::Transform)
    }

    pub fn targets(&self) -> Vec<NodeId> {
        self.graph.ids_of(NodeKind::Target)
    }

    pub fn nodes_by_hook(&self, hook: &str) -> Vec<NodeId> {
        self.graph
            .nodes()
            .filter(|n| n.hook == hook)
            .map(|n| n.id)
            .collect()
    }

    /// The graph, read-only.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// True if `r` belongs to this engine and is (or was) one of its nodes.
    pub fn is_node(&self, r: impl Into<NodeRef>) -> bool {
        let r = r.into();
        r.engine == self.id && (self.graph.contains(r.node) || self.graph.is_retired(r.node))
    }

    pub fn is_destroyed_node(&self, r: impl Into<NodeRef>) -> bool {
        let r = r.into();
        r.engine == self.id && (self.destroyed || self.graph.is_retired(r.node))
    }

    pub fn is_ready(&self, r: impl Into<NodeRef>) -> Result<bool, EngineError> {
        let id = self.resolve(r)?;
        Ok(self.graph.node(id).map(|n| n.ready()).unwrap_or(false))
    }

    pub fn is_dirty(&self, r: impl Into<NodeRef>) -> Result<bool, EngineError> {
        let id = self.resolve(r)?;
        Ok(self.graph.node(id).map(|n| n.dirty()).unwrap_or(false))
    }

    pub fn size(&self, r: impl Into<NodeRef>) -> Result<(u32, u32), EngineError> {
        let id = self.resolve(r)?;
        Ok(self
            .graph
            .node(id)
            .map(|n| (n.width, n.height))
            .unwrap_or((0, 0)))
    }

    pub fn hook(&self, r: impl Into<NodeRef>) -> Result<String, EngineError> {
        let id = self.resolve(r)?;
        Ok(self.hook_of(id))
    }

    /// The node's current output texture, if it has one.
    pub fn node_texture(&self, r: impl Into<NodeRef>) -> Result<Option<TextureHandle>, EngineError> {
        let id = self.resolve(r)?;
        Ok(self.nodes.get(&id).and_then(GraphNode::texture))
    }

    /// Snapshot of an effect's inputs.
    pub fn inputs(&self, r: impl Into<NodeRef>) -> Result<InputValues, EngineError> {
        let id = self.resolve(r)?;
        self.effect_body(id)
            .map(|b| b.inputs.clone())
            .ok_or_else(|| EngineError::other(format!("{id} is not an effect")))
    }

    pub fn input_spec(&self, r: impl Into<NodeRef>, name: &str) -> Result<InputSpec, EngineError> {
        let id = self.resolve(r)?;
        let body = self
            .effect_body(id)
            .ok_or_else(|| EngineError::other(format!("{id} is not an effect")))?;
        body.spec(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownInput(name.to_string()))
    }

    /// Why effect `hook` cannot run here, or `None` if it can.
    pub fn incompatible(&self, hook: &str) -> Option<String> {
        let Some(gpu) = self.gpu.as_deref() else {
            return Some("no graphics context attached".into());
        };
        let Some(plugin) = self.registry.effect(hook) else {
            return Some(format!("unknown effect type '{hook}'"));
        };
        plugin.compatible(&gpu.limits()).err()
    }

    // ---------------------------------------------------------------------------------------------
    // Internal helpers shared by the submodules
    // ---------------------------------------------------------------------------------------------

    /// Recomputes which image inputs an effect currently requires, then its readiness.
    fn refresh_relevance(&mut self, id: NodeId) {
        let Some(body) = self.effect_body(id) else {
            return;
        };
        let flags: Vec<(String, bool)> = body
            .schema
            .iter()
            .filter(|s| s.ty == InputType::Image)
            .map(|s| (s.name.clone(), body.instance.requires(&s.name, &body.inputs)))
            .collect();
        for (name, relevant) in flags {
            self.graph.set_slot_relevant(id, &name, relevant);
        }
        self.graph.update_ready(id);
    }

    /// Size of the first relevant bound upstream node of `id`.
    fn upstream_size(&self, id: NodeId) -> Option<(u32, u32)> {
        let node = self.graph.node(id)?;
        let up = match node.upstream() {
            Upstream::None => None,
            Upstream::Single(s) => *s,
            Upstream::Slots(slots) => slots.iter().filter(|s| s.relevant).find_map(|s| s.node),
        }?;
        self.graph.node(up).map(|n| (n.width, n.height))
    }

    fn update_effect_size(&mut self, id: NodeId) {
        let Some(body) = self.effect_body(id) else {
            return;
        };
        let source = self.upstream_size(id);
        let explicit = || {
            let w = body.inputs.get("width").and_then(Value::as_f64)?;
            let h = body.inputs.get("height").and_then(Value::as_f64)?;
            (w >= 1.0 && h >= 1.0).then_some((w as u32, h as u32))
        };
        let (w, h) = body
            .instance
            .resize(source, &body.inputs)
            .or(source)
            .or_else(explicit)
            .unwrap_or((self.config.default_width, self.config.default_height));
        self.apply_size(id, w.max(1), h.max(1));
    }

    fn update_transform_size(&mut self, id: NodeId) {
        let Some(NodeBody::Transform(body)) = self.nodes.get(&id) else {
            return;
        };
        let Some(source) = self.upstream_size(id) else {
            return;
        };
        let (w, h) = body.instance.size(source);
        if self.apply_size(id, w.max(1), h.max(1)) {
            self.graph.set_transform_dirty(id);
        }
    }

    /// Records a new size, resizes the node's framebuffer and propagates downstream.
    fn apply_size(&mut self, id: NodeId, width: u32, height: u32) -> bool {
        if !self.graph.set_size(id, width, height) {
            return false;
        }
        if let Some(gpu) = self.gpu.as_deref_mut() {
            let fb: Option<&mut Framebuffer> = match self.nodes.get_mut(&id) {
                Some(NodeBody::Effect(b)) => b.framebuffer.as_mut(),
                Some(NodeBody::Transform(b)) => b.framebuffer.as_mut(),
                Some(NodeBody::Source(b)) => b.read_fb.as_mut(),
                _ => None,
            };
            if let Some(fb) = fb {
                fb.resize(gpu, width, height);
            }
        }
        self.propagate_resize(id);
        true
    }

    fn propagate_resize(&mut self, id: NodeId) {
        let targets: Vec<NodeId> = self
            .graph
            .node(id)
            .map(|n| n.targets().to_vec())
            .unwrap_or_default();
        for t in targets {
            match self.kind_of(t) {
                Some(NodeKind::Effect) => self.update_effect_size(t),
                Some(NodeKind::Transform) => self.update_transform_size(t),
                _ => {}
            }
        }
    }

    /// Brings a source's size and readiness in line with its media; marks it dirty again if
    /// the media reports new content.
    fn poll_source(&mut self, id: NodeId) {
        let Some(NodeBody::Source(body)) = self.nodes.get(&id) else {
            return;
        };
        let loaded = body.instance.loaded();
        let size = body.instance.size();
        let stale = body.instance.check_dirty();
        let (ready, dirty, consumed) = self
            .graph
            .node(id)
            .map(|n| (n.ready(), n.dirty(), !n.targets().is_empty()))
            .unwrap_or((false, false, false));

        if loaded {
            if let Some((w, h)) = size {
                self.apply_size(id, w.max(1), h.max(1));
            }
            if !ready {
                self.graph.set_ready(id);
            }
            // A dirty source nobody consumes stays as it is until something reads it.
            if stale || (dirty && consumed) {
                self.graph.refresh_dirty(id);
            }
        } else if ready {
            self.graph.set_unready(id);
        }
    }

    /// Host-delivered "media loaded / new frame" notification for a source.
    pub fn source_loaded(&mut self, r: impl Into<NodeRef>) -> Result<(), EngineError> {
        self.check_alive()?;
        let id = self.resolve(r)?;
        self.poll_source(id);
        self.sync_wake();
        Ok(())
    }

    /// Marks a node's output stale (for sources: re-upload the media).
    pub fn mark_dirty(&mut self, r: impl Into<NodeRef>) -> Result<(), EngineError> {
        self.check_alive()?;
        let id = self.resolve(r)?;
        if self.kind_of(id) == Some(NodeKind::Source) {
            self.graph.refresh_dirty(id);
        } else {
            self.graph.set_dirty(id);
        }
        self.sync_wake();
        Ok(())
    }

    /// Replaces an effect's full-frame quad with a mesh covering `polygons`.
    pub fn matte(
        &mut self,
        r: impl Into<NodeRef>,
        polygons: impl Into<crate::matte::MatteInput>,
    ) -> Result<(), EngineError> {
        self.check_alive()?;
        let id = self.resolve(r)?;
        let mut model = crate::matte::triangulate(polygons)?;
        let gpu = self.gpu.as_deref_mut();
        let Some(NodeBody::Effect(body)) = self.nodes.get_mut(&id) else {
            return Err(EngineError::other(format!("{id} is not an effect")));
        };
        match gpu {
            Some(gpu) => {
                model.upload(gpu)?;
                if let Some(mut old) = body.matte.replace(model) {
                    old.release(gpu);
                }
            }
            None => body.matte = Some(model),
        }
        self.graph.set_dirty(id);
        self.sync_wake();
        Ok(())
    }
}

/// Default for `spec` under an engine's per-hook defaults table.
fn effective_default(table: Option<&InputValues>, spec: &InputSpec) -> Value {
    table
        .and_then(|t| t.get(&spec.name))
        .and_then(|v| match spec.validate(v, &spec.default, &spec.default) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(input = %spec.name, error = %e, "ignoring invalid default");
                None
            }
        })
        .unwrap_or_else(|| spec.default.clone())
}

/// Builds (or rebuilds) the program an effect draws with.
fn ensure_shader(
    gpu: &mut dyn Gpu,
    hook: &str,
    body: &mut EffectBody,
    common: &mut HashMap<String, CommonShader>,
) -> Result<(), EngineError> {
    if body.common {
        let entry = common.entry(hook.to_string()).or_default();
        if entry.program.is_none() {
            let src = body.instance.shader(&body.inputs, ShaderSource::base());
            entry.program = Some(ShaderProgram::new(gpu, &src.vertex, &src.fragment)?);
            tracing::debug!(hook, "common shader built");
        }
        body.shader_dirty = false;
        return Ok(());
    }
    if body.shader_dirty || body.shader.is_none() {
        let src = body.instance.shader(&body.inputs, ShaderSource::base());
        let program = ShaderProgram::new(gpu, &src.vertex, &src.fragment)?;
        if let Some(mut old) = body.shader.replace(program) {
            old.destroy(gpu);
        }
        body.shader_dirty = false;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
