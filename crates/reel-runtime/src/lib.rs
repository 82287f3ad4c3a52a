#![forbid(unsafe_code)]

//! Real-time compositing runtime.
//!
//! An [`Engine`] owns a graph of sources, effects, transforms and targets and renders it on
//! whatever [`Gpu`] backend the host attaches. Node types are plugins registered under hook
//! names in a [`Registry`]; the built-in sources, transforms and targets live here, effects
//! live in `reel-effects`.
//!
//! [`SoftGpu`] is a headless reference backend used by the tests and by hosts that only
//! need read-back.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod draw;
pub mod framebuffer;
pub mod gpu;
pub mod handle;
pub mod input;
pub mod matte;
pub mod media;
pub mod model;
pub mod plugin;
pub mod shader;
pub mod shaders;
pub mod soft;
pub mod sources;
pub mod surface;
pub mod targets;
pub mod transforms;

mod engine;
mod nodes;

pub use reel_core::{EngineConfig, EngineError, EventKind, Mat4, Rgba};
pub use reel_graph::{NodeEvent, NodeId, NodeKind};

pub use draw::{draw, DrawOptions, DrawTarget};
pub use engine::{
    CallbackId, Engine, FrameCallback, FrameScheduler, Listener, ListenerId, ManualScheduler,
    RESERVED_ENGINE_NAMES,
};
pub use framebuffer::Framebuffer;
pub use gpu::{Gpu, GpuLimits, TextureHandle};
pub use handle::{EffectHandle, EngineId, NodeRef, SourceHandle, TargetHandle, TransformHandle};
pub use input::{InputSpec, InputType, InputValues, Value};
pub use media::{PixelProvider, RawSource, RawTarget, SourceError, Surface};
pub use model::Model;
pub use plugin::{
    Effect, EffectPlugin, Options, Pass, Registry, Source, SourcePlugin, Target, TargetPlugin,
    Transform, TransformInput, TransformPlugin,
};
pub use shader::{ShaderProgram, UniformValue, Uniforms};
pub use shaders::{ShaderSource, BASE_FRAGMENT, BASE_VERTEX};
pub use soft::SoftGpu;
