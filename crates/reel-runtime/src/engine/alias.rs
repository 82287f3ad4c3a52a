//! Engine-level aliases: a name bound to one input of one node.

use reel_core::EngineError;
use reel_graph::NodeId;

use super::Engine;
use crate::handle::NodeRef;
use crate::input::Value;

/// Names an alias may not take; they collide with engine methods.
pub const RESERVED_ENGINE_NAMES: &[&str] = &[
    "add_post_render",
    "add_pre_render",
    "alias",
    "aliases",
    "defaults",
    "destroy",
    "effect",
    "effects",
    "go",
    "id",
    "incompatible",
    "is_destroyed",
    "is_node",
    "off",
    "on",
    "read_pixels",
    "remove_alias",
    "render",
    "source",
    "sources",
    "stop",
    "target",
    "targets",
    "tick",
    "transform",
    "transforms",
];

#[derive(Debug, Clone)]
pub(super) struct Alias {
    pub node: NodeId,
    pub input: String,
}

impl Engine {
    /// Publishes input `input` of node `r` under `name`. Re-aliasing a name rebinds it.
    pub fn alias(&mut self, name: &str, r: impl Into<NodeRef>, input: &str) -> Result<(), EngineError> {
        self.check_alive()?;
        if name.is_empty() || RESERVED_ENGINE_NAMES.contains(&name) {
            return Err(EngineError::ReservedName(name.to_string()));
        }
        let node = self.resolve(r)?;
        self.get_input(self.node_ref(node), input)?;
        tracing::debug!(alias = name, node = %node, input, "alias bound");
        self.aliases.insert(
            name.to_string(),
            Alias {
                node,
                input: input.to_string(),
            },
        );
        Ok(())
    }

    pub fn remove_alias(&mut self, name: &str) -> bool {
        self.aliases.remove(name).is_some()
    }

    pub fn aliases(&self) -> Vec<String> {
        self.aliases.keys().cloned().collect()
    }

    /// Reads the input behind alias `name`.
    pub fn get_alias(&self, name: &str) -> Result<Value, EngineError> {
        let a = self
            .aliases
            .get(name)
            .ok_or_else(|| EngineError::UnknownInput(name.to_string()))?;
        self.get_input(self.node_ref(a.node), &a.input)
    }

    /// Writes the input behind alias `name`; returns the stored value.
    pub fn set_alias(&mut self, name: &str, value: impl Into<Value>) -> Result<Value, EngineError> {
        let a = self
            .aliases
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownInput(name.to_string()))?;
        self.set_input(self.node_ref(a.node), &a.input, value.into())
    }
}
