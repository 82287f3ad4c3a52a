//! Context attachment, loss and restoration; node and engine teardown.

use reel_core::{EngineError, EventKind};
use reel_graph::{NodeId, NodeKind};

use super::Engine;
use crate::gpu::Gpu;
use crate::handle::NodeRef;
use crate::input::Value;
use crate::nodes::{GraphNode, NodeBody};
use crate::surface;

impl Engine {
    /// Adopts `gpu` as the engine's context. Existing effects are initialized on it.
    pub fn attach_context(&mut self, gpu: Box<dyn Gpu>) -> Result<(), EngineError> {
        self.check_alive()?;
        if self.gpu.is_some() {
            return Err(EngineError::other("a context is already attached"));
        }
        let renderer = gpu.limits().renderer;
        self.gpu = Some(gpu);
        self.ensure_base()?;
        for id in self.effects() {
            self.initialize_effect(id)?;
        }
        tracing::info!(engine = self.id.0, %renderer, "context attached");
        self.sync_wake();
        Ok(())
    }

    /// The context is gone. Every GPU handle is dropped without being deleted, every node
    /// hears `ContextLost`, and the frame loop stops. Returns the dead context.
    pub fn context_lost(&mut self) -> Option<Box<dyn Gpu>> {
        let gpu = self.gpu.take()?;
        tracing::warn!(engine = self.id.0, "context lost");
        self.cancel_daemon();

        for body in self.nodes.values_mut() {
            body.lose_context();
        }
        if let Some(mut base) = self.base_shader.take() {
            base.forget();
        }
        self.rect.forget();
        for entry in self.common.values_mut() {
            if let Some(mut program) = entry.program.take() {
                program.forget();
            }
        }
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            self.graph.emit(id, EventKind::ContextLost);
        }
        self.flush_events();
        Some(gpu)
    }

    /// Rebuilds every GPU resource on `gpu` and marks the whole graph dirty.
    pub fn context_restored(&mut self, gpu: Box<dyn Gpu>) -> Result<(), EngineError> {
        self.check_alive()?;
        if self.gpu.is_some() {
            return Err(EngineError::other("a context is already attached"));
        }
        self.gpu = Some(gpu);
        self.ensure_base()?;
        for id in self.effects() {
            self.initialize_effect(id)?;
        }

        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for &id in &ids {
            self.graph.set_dirty(id);
            if self.kind_of(id) == Some(NodeKind::Transform) {
                self.graph.set_transform_dirty(id);
            }
        }
        for &id in &ids {
            self.graph.emit(id, EventKind::ContextRestored);
        }
        tracing::info!(engine = self.id.0, nodes = ids.len(), "context restored");

        if self.targets().iter().any(|t| self.graph.node(*t).is_some_and(|n| n.auto())) {
            self.start_daemon();
        }
        self.graph.take_wake();
        self.flush_events();
        Ok(())
    }

    /// Destroys one node. Destroying an already-destroyed node is a no-op.
    pub fn destroy_node(&mut self, r: impl Into<NodeRef>) -> Result<(), EngineError> {
        let r = r.into();
        if r.engine != self.id {
            return Err(EngineError::ForeignNode(r.node.0));
        }
        if self.destroyed || self.graph.is_retired(r.node) {
            return Ok(());
        }
        if !self.graph.contains(r.node) {
            return Err(EngineError::ForeignNode(r.node.0));
        }
        self.discard(r.node);
        self.sync_wake();
        Ok(())
    }

    /// Removes a node and frees everything it holds.
    pub(super) fn discard(&mut self, id: NodeId) {
        let Some(mut body) = self.nodes.remove(&id) else {
            return;
        };
        let hook = self.hook_of(id);

        match self.gpu.as_deref_mut() {
            Some(gpu) => body.release(gpu),
            None => {
                body.lose_context();
                body.retire();
            }
        }
        match &body {
            NodeBody::Effect(b) if b.common => self.release_common(&hook),
            NodeBody::Target(b) => {
                if let Some(s) = b.surface {
                    surface::release(s, self.id);
                }
            }
            _ => {}
        }

        self.aliases.retain(|_, a| a.node != id);
        self.listeners.remove_node(id);

        for detached in self.graph.remove_node(id) {
            let Some(slot) = detached.slot else {
                continue;
            };
            if let Some(b) = self.effect_body_mut(detached.target) {
                b.inputs.insert(slot, Value::Null);
            }
            self.update_effect_size(detached.target);
        }
        tracing::debug!(node = %id, hook = %hook, "node destroyed");
    }

    fn release_common(&mut self, hook: &str) {
        let Some(entry) = self.common.get_mut(hook) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return;
        }
        if let Some(mut program) = entry.program.take() {
            match self.gpu.as_deref_mut() {
                Some(gpu) => program.destroy(gpu),
                None => program.forget(),
            }
        }
        self.common.remove(hook);
        tracing::debug!(hook, "common shader released");
    }

    /// Number of live effects sharing `hook`'s common shader.
    pub fn common_shader_refs(&self, hook: &str) -> usize {
        self.common.get(hook).map(|c| c.refs).unwrap_or(0)
    }

    /// Tears the engine down: every node, the base shader, the quad and the context.
    /// Later calls on the engine fail with [`EngineError::EngineDestroyed`].
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.stop();
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            self.discard(id);
        }
        match self.gpu.as_deref_mut() {
            Some(gpu) => {
                if let Some(mut base) = self.base_shader.take() {
                    base.destroy(gpu);
                }
                self.rect.release(gpu);
            }
            None => {
                if let Some(mut base) = self.base_shader.take() {
                    base.forget();
                }
                self.rect.forget();
            }
        }
        self.common.clear();
        self.aliases.clear();
        self.defaults.clear();
        self.listeners.clear();
        self.graph.drain_events();
        self.gpu = None;
        self.destroyed = true;
        tracing::info!(engine = self.id.0, "engine destroyed");
    }
}
