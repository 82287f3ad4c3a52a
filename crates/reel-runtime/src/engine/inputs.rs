//! Reading and writing node inputs; connecting nodes.

use reel_core::EngineError;
use reel_graph::{NodeId, NodeKind, Upstream};

use super::{effective_default, Engine};
use crate::handle::NodeRef;
use crate::input::{InputType, InputValues, Value};
use crate::nodes::NodeBody;
use crate::plugin::Options;

impl Engine {
    /// Current value of input `name` on any node kind.
    ///
    /// Effects answer for their declared inputs (image inputs as the bound node, or `Null`).
    /// Transforms answer `source` and their plugin properties. Targets answer `source`,
    /// `width`, `height` and `auto`; sources answer `width` and `height`.
    pub fn get_input(&self, r: impl Into<NodeRef>, name: &str) -> Result<Value, EngineError> {
        let id = self.resolve(r)?;
        let unknown = || EngineError::UnknownInput(name.to_string());
        let node = self.graph.node(id).ok_or_else(unknown)?;
        match (self.nodes.get(&id), name) {
            (Some(NodeBody::Effect(b)), _) => b.inputs.get(name).cloned().ok_or_else(unknown),
            (Some(NodeBody::Transform(_)) | Some(NodeBody::Target(_)), "source") => {
                Ok(self.single_source_value(id))
            }
            (Some(NodeBody::Transform(b)), _) => b.instance.get(name).ok_or_else(unknown),
            (Some(NodeBody::Target(_)), "auto") => Ok(Value::Boolean(node.auto())),
            (Some(NodeBody::Target(_)) | Some(NodeBody::Source(_)), "width") => {
                Ok(Value::Number(node.width as f64))
            }
            (Some(NodeBody::Target(_)) | Some(NodeBody::Source(_)), "height") => {
                Ok(Value::Number(node.height as f64))
            }
            _ => Err(unknown()),
        }
    }

    fn single_source_value(&self, id: NodeId) -> Value {
        match self.graph.node(id).map(|n| n.upstream()) {
            Some(Upstream::Single(Some(up))) => Value::Node(self.node_ref(*up)),
            _ => Value::Null,
        }
    }

    /// Validates and stores an input; returns the value actually stored.
    pub fn set_input(
        &mut self,
        r: impl Into<NodeRef>,
        name: &str,
        value: Value,
    ) -> Result<Value, EngineError> {
        self.check_alive()?;
        let id = self.resolve(r)?;
        let stored = match self.kind_of(id) {
            Some(NodeKind::Effect) => self.set_effect_input(id, name, value),
            Some(NodeKind::Transform) if name == "source" => {
                self.set_single_source(id, name, &value)
            }
            Some(NodeKind::Transform) => self.set_transform_property(id, name, &value),
            Some(NodeKind::Target) => self.set_target_input(id, name, &value),
            _ => Err(EngineError::UnknownInput(name.to_string())),
        };
        self.sync_wake();
        stored
    }

    /// Applies several inputs in order; stops at the first failure.
    pub fn set_inputs(&mut self, r: impl Into<NodeRef>, values: Options) -> Result<(), EngineError> {
        let r = r.into();
        for (name, value) in values {
            self.set_input(r, &name, value)?;
        }
        Ok(())
    }

    pub(super) fn set_effect_input(
        &mut self,
        id: NodeId,
        name: &str,
        value: Value,
    ) -> Result<Value, EngineError> {
        let hook = self.hook_of(id);
        let body = self
            .effect_body(id)
            .ok_or_else(|| EngineError::other(format!("{id} is not an effect")))?;
        let spec = body
            .spec(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownInput(name.to_string()))?;

        if spec.ty == InputType::Image {
            let upstream = self.find_input_node(name, &value)?;
            self.graph.connect_slot(id, name, upstream)?;
            let stored = upstream
                .map(|n| Value::Node(self.node_ref(n)))
                .unwrap_or(Value::Null);
            if let Some(body) = self.effect_body_mut(id) {
                body.inputs.insert(name.to_string(), stored.clone());
            }
            self.refresh_relevance(id);
            self.update_effect_size(id);
            self.finish_effect_update(id, name);
            return Ok(stored);
        }

        let previous = body.inputs.get(name).cloned().unwrap_or_default();
        let default = effective_default(self.defaults.get(&hook), &spec);
        let stored = spec.validate(&value, &default, &previous)?;
        if let Some(body) = self.effect_body_mut(id) {
            body.inputs.insert(name.to_string(), stored.clone());
            if spec.shader_dirty {
                body.shader_dirty = true;
            }
        }
        // `update` may rewrite other inputs, so relevance is checked after it runs.
        self.finish_effect_update(id, name);
        if spec.update_sources {
            self.refresh_relevance(id);
        }
        self.update_effect_size(id);
        Ok(stored)
    }

    fn finish_effect_update(&mut self, id: NodeId, name: &str) {
        self.graph.set_dirty(id);
        if let Some(body) = self.effect_body_mut(id) {
            let inputs = &mut body.inputs;
            body.instance.update(name, inputs);
        }
    }

    /// Resolves an image-input value to a node of this engine, wrapping raw media in a
    /// (possibly existing) source node.
    fn find_input_node(&mut self, name: &str, value: &Value) -> Result<Option<NodeId>, EngineError> {
        match value {
            Value::Null => Ok(None),
            Value::Node(r) => self.resolve(*r).map(Some),
            Value::Source(raw) => {
                if let Some(existing) = self.find_source(raw) {
                    return Ok(Some(existing));
                }
                self.create_source(None, raw, &Options::new()).map(Some)
            }
            other => Err(EngineError::invalid_input(
                name,
                format!("expected a node or media, got {other:?}"),
            )),
        }
    }

    /// Connects the single upstream of a transform or target.
    pub(super) fn set_single_source(
        &mut self,
        id: NodeId,
        name: &str,
        value: &Value,
    ) -> Result<Value, EngineError> {
        let upstream = self.find_input_node(name, value)?;
        let previous = self.graph.connect_single(id, upstream)?;
        if previous != upstream {
            self.graph.update_ready(id);
            if self.kind_of(id) == Some(NodeKind::Transform) {
                self.update_transform_size(id);
                self.graph.set_transform_dirty(id);
            }
            self.graph.set_dirty(id);
        }
        Ok(self.single_source_value(id))
    }

    fn set_transform_property(
        &mut self,
        id: NodeId,
        name: &str,
        value: &Value,
    ) -> Result<Value, EngineError> {
        let Some(NodeBody::Transform(body)) = self.nodes.get_mut(&id) else {
            return Err(EngineError::UnknownInput(name.to_string()));
        };
        let changed = body.instance.set(name, value)?;
        let stored = body.instance.get(name).unwrap_or_default();
        if changed {
            self.graph.set_transform_dirty(id);
        }
        Ok(stored)
    }

    /// Invokes a method input of a transform (`reset`, `translate`, ...).
    pub fn call_transform(
        &mut self,
        r: impl Into<NodeRef>,
        method: &str,
        args: &[Value],
    ) -> Result<(), EngineError> {
        self.check_alive()?;
        let id = self.resolve(r)?;
        let Some(NodeBody::Transform(body)) = self.nodes.get_mut(&id) else {
            return Err(EngineError::other(format!("{id} is not a transform")));
        };
        if body.instance.call(method, args)? {
            self.graph.set_transform_dirty(id);
        }
        self.sync_wake();
        Ok(())
    }

    fn set_target_input(&mut self, id: NodeId, name: &str, value: &Value) -> Result<Value, EngineError> {
        match name {
            "source" => self.set_single_source(id, name, value),
            "auto" => {
                let auto = value.truthy();
                self.graph.set_auto(id, auto)?;
                Ok(Value::Boolean(auto))
            }
            "width" | "height" => {
                let n = value
                    .as_f64()
                    .filter(|n| n.is_finite() && *n >= 1.0)
                    .ok_or_else(|| EngineError::invalid_input(name, "expected a positive size"))?;
                let (w, h) = self.graph.node(id).map(|n| (n.width, n.height)).unwrap_or((1, 1));
                let (w, h) = if name == "width" { (n as u32, h) } else { (w, n as u32) };
                self.resize_target_id(id, w, h)?;
                Ok(Value::Number(n.floor()))
            }
            _ => Err(EngineError::UnknownInput(name.to_string())),
        }
    }

    /// Resizes a target's destination.
    pub fn resize_target(&mut self, r: impl Into<NodeRef>, width: u32, height: u32) -> Result<(), EngineError> {
        self.check_alive()?;
        let id = self.resolve(r)?;
        self.resize_target_id(id, width, height)?;
        self.sync_wake();
        Ok(())
    }

    fn resize_target_id(&mut self, id: NodeId, width: u32, height: u32) -> Result<(), EngineError> {
        let Some(NodeBody::Target(body)) = self.nodes.get_mut(&id) else {
            return Err(EngineError::other(format!("{id} is not a target")));
        };
        if !body.instance.set_size(width.max(1), height.max(1)) {
            return Err(EngineError::invalid_input("width", "target has a fixed size"));
        }
        let (w, h) = body.instance.size();
        self.graph.set_size(id, w, h);
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Per-hook defaults
    // ---------------------------------------------------------------------------------------------

    /// Replaces the engine-wide defaults for effect type `hook`. Existing effects of that type
    /// whose input still holds the old default move to the new one.
    pub fn set_defaults(&mut self, hook: &str, values: InputValues) -> Result<(), EngineError> {
        self.check_alive()?;
        let old = self.defaults.insert(hook.to_string(), values);
        self.migrate_defaults(hook, old.as_ref());
        self.sync_wake();
        Ok(())
    }

    /// Drops the defaults for `hook`; effects still on them fall back to declared defaults.
    pub fn clear_defaults(&mut self, hook: &str) -> Result<(), EngineError> {
        self.check_alive()?;
        if let Some(old) = self.defaults.remove(hook) {
            self.migrate_defaults(hook, Some(&old));
            self.sync_wake();
        }
        Ok(())
    }

    /// Defaults for every hook from one JSON object: `{ "hook": { "input": value } }`.
    #[cfg(feature = "serde")]
    pub fn set_defaults_json(&mut self, json: &serde_json::Value) -> Result<(), EngineError> {
        let table = json
            .as_object()
            .ok_or_else(|| EngineError::other("defaults must be a JSON object"))?;
        for (hook, inputs) in table {
            let inputs = inputs
                .as_object()
                .ok_or_else(|| EngineError::other(format!("defaults for '{hook}' must be an object")))?;
            let values = inputs
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect();
            self.set_defaults(hook, values)?;
        }
        Ok(())
    }

    pub fn defaults(&self, hook: &str) -> Option<&InputValues> {
        self.defaults.get(hook)
    }

    fn migrate_defaults(&mut self, hook: &str, old: Option<&InputValues>) {
        let new = self.defaults.get(hook).cloned();
        for id in self.nodes_by_hook(hook) {
            let Some(body) = self.effect_body(id) else {
                continue;
            };
            let moves: Vec<(String, Value)> = body
                .schema
                .iter()
                .filter(|s| s.ty != InputType::Image)
                .filter_map(|spec| {
                    let before = effective_default(old, spec);
                    let after = effective_default(new.as_ref(), spec);
                    let current = body.inputs.get(&spec.name)?;
                    (*current == before && after != before).then(|| (spec.name.clone(), after))
                })
                .collect();
            for (name, value) in moves {
                if let Err(e) = self.set_effect_input(id, &name, value) {
                    tracing::warn!(node = %id, input = %name, error = %e, "default not applied");
                }
            }
        }
    }
}
