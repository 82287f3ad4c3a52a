//! Opaque public handles to nodes.
//!
//! A handle is just the owning engine's id plus the node id. All behaviour lives on
//! [`Engine`]; the methods here are shorthands that forward to it.

use std::sync::atomic::{AtomicU64, Ordering};

use reel_core::EngineError;
use reel_graph::NodeId;

use crate::engine::Engine;
use crate::input::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineId(pub u64);

impl EngineId {
    pub fn next() -> EngineId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        EngineId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A node of a specific engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub engine: EngineId,
    pub node: NodeId,
}

macro_rules! node_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) NodeRef);

        impl $name {
            pub fn id(&self) -> NodeId {
                self.0.node
            }

            pub fn node_ref(&self) -> NodeRef {
                self.0
            }

            pub fn is_destroyed(&self, engine: &Engine) -> bool {
                engine.is_destroyed_node(self.0)
            }

            pub fn is_ready(&self, engine: &Engine) -> bool {
                engine.is_ready(self.0).unwrap_or(false)
            }

            pub fn destroy(&self, engine: &mut Engine) -> Result<(), EngineError> {
                engine.destroy_node(self.0)
            }

            /// Renders as needed, then reads back `width`×`height` pixels, bottom row first.
            pub fn read_pixels(
                &self,
                engine: &mut Engine,
                x: i32,
                y: i32,
                width: u32,
                height: u32,
            ) -> Result<Vec<u8>, EngineError> {
                engine.read_pixels(self.0, x, y, width, height)
            }
        }

        impl From<$name> for NodeRef {
            fn from(h: $name) -> NodeRef {
                h.0
            }
        }

        impl From<$name> for Value {
            fn from(h: $name) -> Value {
                Value::Node(h.0)
            }
        }
    };
}

node_handle!(
    /// An effect node.
    EffectHandle
);
node_handle!(
    /// A source node.
    SourceHandle
);
node_handle!(
    /// A transform node.
    TransformHandle
);
node_handle!(
    /// A target node.
    TargetHandle
);

impl EffectHandle {
    pub fn get(&self, engine: &Engine, input: &str) -> Result<Value, EngineError> {
        engine.get_input(self.0, input)
    }

    /// Validates and stores `value`; returns the stored (normalised) value.
    pub fn set(
        &self,
        engine: &mut Engine,
        input: &str,
        value: impl Into<Value>,
    ) -> Result<Value, EngineError> {
        engine.set_input(self.0, input, value.into())
    }

    /// Replaces the full-frame quad with a mesh covering `polygons`.
    pub fn matte(
        &self,
        engine: &mut Engine,
        polygons: impl Into<crate::matte::MatteInput>,
    ) -> Result<(), EngineError> {
        engine.matte(self.0, polygons)
    }
}

impl SourceHandle {
    /// Marks the media changed; it is re-uploaded on the next render.
    pub fn update(&self, engine: &mut Engine) -> Result<(), EngineError> {
        engine.mark_dirty(self.0)
    }
}

impl TransformHandle {
    pub fn get(&self, engine: &Engine, input: &str) -> Result<Value, EngineError> {
        engine.get_input(self.0, input)
    }

    pub fn set(
        &self,
        engine: &mut Engine,
        input: &str,
        value: impl Into<Value>,
    ) -> Result<Value, EngineError> {
        engine.set_input(self.0, input, value.into())
    }

    pub fn call(&self, engine: &mut Engine, method: &str, args: &[Value]) -> Result<(), EngineError> {
        engine.call_transform(self.0, method, args)
    }
}

impl TargetHandle {
    pub fn set_source(&self, engine: &mut Engine, source: impl Into<Value>) -> Result<(), EngineError> {
        engine.set_input(self.0, "source", source.into()).map(|_| ())
    }

    /// Renders now if the target is ready and dirty.
    pub fn render(&self, engine: &mut Engine) -> Result<(), EngineError> {
        engine.render_target(self.0)
    }

    pub fn set_auto(&self, engine: &mut Engine, auto: bool) -> Result<(), EngineError> {
        engine.set_input(self.0, "auto", Value::Boolean(auto)).map(|_| ())
    }

    pub fn resize(&self, engine: &mut Engine, width: u32, height: u32) -> Result<(), EngineError> {
        engine.resize_target(self.0, width, height)
    }
}
