//! Plugin contracts for the four node kinds, and the process-wide registry of hooks.
//!
//! A plugin is a factory registered under a hook name. Each node owns one instance created
//! by it; the engine drives the instance through the trait methods below and keeps all graph
//! bookkeeping (dirty/ready, edges, GPU lifetimes) to itself.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use reel_core::{EngineError, Mat4};

use crate::draw::{draw, DrawOptions, DrawTarget};
use crate::gpu::{FramebufferHandle, Gpu, GpuLimits, TextureHandle};
use crate::input::{InputSpec, InputType, InputValues, Value};
use crate::media::{RawSource, RawTarget, SourceError, SurfaceId};
use crate::model::Model;
use crate::shader::{ShaderProgram, Uniforms};
use crate::shaders::ShaderSource;

/// Construction options passed to plugin factories.
pub type Options = BTreeMap<String, Value>;

/// Everything one draw of a node needs, handed to effect and target instances.
///
/// `uniforms` arrive pre-filled: `resolution`, `transform`, every non-image input under its
/// uniform name, and image inputs already resolved to textures.
pub struct Pass<'a> {
    pub gpu: &'a mut dyn Gpu,
    pub shader: &'a ShaderProgram,
    pub model: &'a Model,
    pub uniforms: Uniforms,
    pub target: DrawTarget,
    pub options: DrawOptions,
    pub inputs: &'a InputValues,
}

impl std::fmt::Debug for Pass<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pass")
            .field("uniforms", &self.uniforms)
            .field("target", &self.target)
            .field("options", &self.options)
            .finish()
    }
}

impl Pass<'_> {
    /// One full draw with the pass's own shader, model and uniforms.
    pub fn draw_default(&mut self) -> Result<(), EngineError> {
        draw(
            self.gpu,
            self.shader,
            self.model,
            &self.uniforms,
            self.target,
            &self.options,
        )
    }

    /// Extra draws for multi-pass effects.
    pub fn draw_with(
        &mut self,
        shader: &ShaderProgram,
        model: &Model,
        uniforms: &Uniforms,
        target: DrawTarget,
        options: &DrawOptions,
    ) -> Result<(), EngineError> {
        draw(self.gpu, shader, model, uniforms, target, options)
    }
}

// -------------------------------------------------------------------------------------------------
// Effects
// -------------------------------------------------------------------------------------------------

pub trait EffectPlugin: Send + Sync {
    fn title(&self) -> &str;

    /// Static input schema.
    fn inputs(&self) -> Vec<InputSpec>;

    /// Extra or replacement inputs that depend on construction options.
    fn definition(&self, _options: &Options) -> Vec<InputSpec> {
        Vec::new()
    }

    /// All instances in one engine share a single compiled program.
    fn common_shader(&self) -> bool {
        false
    }

    /// `Err(reason)` when the effect cannot run on a context with these limits.
    fn compatible(&self, _limits: &GpuLimits) -> Result<(), String> {
        Ok(())
    }

    fn create(&self, options: &Options) -> Box<dyn Effect>;
}

/// Per-node effect behaviour.
pub trait Effect {
    /// Shader pair for the current inputs. `base` is the stock vertex/fragment pair.
    fn shader(&self, _inputs: &InputValues, base: ShaderSource) -> ShaderSource {
        base
    }

    /// Called once a context is attached (and again after it is restored).
    fn initialize(&mut self, _gpu: &mut dyn Gpu, _width: u32, _height: u32) -> Result<(), EngineError> {
        Ok(())
    }

    /// Whether image input `input` is needed under the current inputs.
    fn requires(&self, _input: &str, _inputs: &InputValues) -> bool {
        true
    }

    /// Whether `input` may be consumed without forcing upstream transforms to rasterize.
    fn in_place(&self, _input: &str, _inputs: &InputValues) -> bool {
        false
    }

    /// Runs after `input` was stored. May rewrite other inputs.
    fn update(&mut self, _input: &str, _inputs: &mut InputValues) {}

    /// Output size override; `source` is the size of the first bound image input.
    fn resize(&self, _source: Option<(u32, u32)>, _inputs: &InputValues) -> Option<(u32, u32)> {
        None
    }

    fn draw(&mut self, pass: &mut Pass<'_>) -> Result<(), EngineError> {
        pass.draw_default()
    }

    /// The context is gone; drop GPU handles without deleting them.
    fn lose_context(&mut self) {}

    /// The node is being destroyed. `gpu` is `None` when no context is attached; GPU
    /// objects were already dropped through `lose_context` in that case.
    fn destroy(&mut self, _gpu: Option<&mut dyn Gpu>) {}
}

// -------------------------------------------------------------------------------------------------
// Sources
// -------------------------------------------------------------------------------------------------

pub trait SourcePlugin: Send + Sync {
    fn title(&self) -> &str;

    /// Wraps `raw`, or declines with `None`. `forced` is set when the caller named this hook.
    fn create(&self, raw: &RawSource, options: &Options, forced: bool) -> Option<Box<dyn Source>>;
}

pub trait Source {
    /// Media size, once known.
    fn size(&self) -> Option<(u32, u32)>;

    fn loaded(&self) -> bool {
        self.size().is_some()
    }

    /// A texture the media already lives in. The node samples it directly and never
    /// uploads into or deletes it.
    fn external_texture(&self) -> Option<TextureHandle> {
        None
    }

    /// True when `raw` is the media this instance wraps.
    fn compare(&self, raw: &RawSource) -> bool;

    /// True when the media has changed since the last upload (a new video frame).
    fn check_dirty(&self) -> bool {
        false
    }

    /// Uploads the current media into `texture`. Returns whether anything was uploaded.
    fn render(&mut self, gpu: &mut dyn Gpu, texture: TextureHandle) -> Result<bool, SourceError>;

    fn lose_context(&mut self) {}

    fn destroy(&mut self) {}
}

// -------------------------------------------------------------------------------------------------
// Transforms
// -------------------------------------------------------------------------------------------------

/// One settable property or callable method of a transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformInput {
    pub name: String,
    pub ty: InputType,
    pub method: bool,
}

impl TransformInput {
    pub fn property(name: &str, ty: InputType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            method: false,
        }
    }

    pub fn method(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: InputType::Number,
            method: true,
        }
    }
}

pub trait TransformPlugin: Send + Sync {
    fn title(&self) -> &str;

    fn create(&self, options: &Options) -> Result<Box<dyn Transform>, EngineError>;
}

pub trait Transform {
    fn inputs(&self) -> Vec<TransformInput>;

    fn get(&self, name: &str) -> Option<Value>;

    /// Returns whether the matrix changed.
    fn set(&mut self, name: &str, value: &Value) -> Result<bool, EngineError>;

    /// Invokes a method input. Returns whether the matrix changed.
    fn call(&mut self, method: &str, args: &[Value]) -> Result<bool, EngineError>;

    /// Local matrix in the pixel space of a `width`×`height` node, or `None` when the
    /// transform currently contributes nothing.
    fn matrix(&self, width: u32, height: u32) -> Option<Mat4>;

    fn size(&self, source: (u32, u32)) -> (u32, u32) {
        source
    }

    fn destroy(&mut self) {}
}

// -------------------------------------------------------------------------------------------------
// Targets
// -------------------------------------------------------------------------------------------------

pub trait TargetPlugin: Send + Sync {
    fn title(&self) -> &str;

    /// Wraps `raw`, or declines with `None`. May move a context out of a surface.
    fn create(
        &self,
        raw: &mut RawTarget,
        options: &Options,
        forced: bool,
    ) -> Option<Box<dyn Target>>;
}

pub trait Target {
    fn size(&self) -> (u32, u32);

    /// Requested size change. Returns false when the destination has a fixed size.
    fn set_size(&mut self, _width: u32, _height: u32) -> bool {
        false
    }

    fn surface(&self) -> Option<SurfaceId> {
        None
    }

    /// A context the engine may adopt when it has none.
    fn take_context(&mut self) -> Option<Box<dyn Gpu>> {
        None
    }

    /// Creates whatever GPU objects the destination needs. Called before every render.
    fn prepare(&mut self, _gpu: &mut dyn Gpu) -> Result<(), EngineError> {
        Ok(())
    }

    /// Framebuffer to draw into; `None` is the context's default framebuffer.
    fn destination(&self) -> Option<FramebufferHandle>;

    /// True when `raw` names the destination this instance draws to.
    fn compare(&self, _raw: &RawTarget) -> bool {
        false
    }

    fn render(&mut self, pass: &mut Pass<'_>) -> Result<(), EngineError> {
        pass.draw_default()
    }

    fn lose_context(&mut self) {}

    /// Called once on node destroy, with the context if one is attached.
    fn destroy(&mut self, _gpu: Option<&mut dyn Gpu>) {}
}

// -------------------------------------------------------------------------------------------------
// Registry
// -------------------------------------------------------------------------------------------------

/// Hook tables. Source and target plugins are probed in registration order.
#[derive(Default)]
pub struct Registry {
    effects: RwLock<BTreeMap<String, Arc<dyn EffectPlugin>>>,
    sources: RwLock<Vec<(String, Arc<dyn SourcePlugin>)>>,
    transforms: RwLock<BTreeMap<String, Arc<dyn TransformPlugin>>>,
    targets: RwLock<Vec<(String, Arc<dyn TargetPlugin>)>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("effects", &self.effect_hooks())
            .field("sources", &self.source_hooks())
            .field("transforms", &self.transform_hooks())
            .field("targets", &self.target_hooks())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in source, transform and target hooks.
    pub fn with_builtins() -> Self {
        let r = Self::new();
        crate::sources::register_builtins(&r);
        crate::transforms::register_builtins(&r);
        crate::targets::register_builtins(&r);
        r
    }

    /// The process-wide registry every `Engine::new` uses.
    pub fn global() -> Arc<Registry> {
        static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(Registry::with_builtins()))
            .clone()
    }

    /// Returns false (keeping the existing plugin) when `hook` is taken.
    pub fn register_effect(&self, hook: &str, plugin: Arc<dyn EffectPlugin>) -> bool {
        let mut m = write(&self.effects);
        if m.contains_key(hook) {
            tracing::warn!(hook, "effect already registered");
            return false;
        }
        m.insert(hook.to_string(), plugin);
        true
    }

    pub fn register_source(&self, hook: &str, plugin: Arc<dyn SourcePlugin>) -> bool {
        let mut v = write(&self.sources);
        if v.iter().any(|(h, _)| h == hook) {
            tracing::warn!(hook, "source already registered");
            return false;
        }
        v.push((hook.to_string(), plugin));
        true
    }

    pub fn register_transform(&self, hook: &str, plugin: Arc<dyn TransformPlugin>) -> bool {
        let mut m = write(&self.transforms);
        if m.contains_key(hook) {
            tracing::warn!(hook, "transform already registered");
            return false;
        }
        m.insert(hook.to_string(), plugin);
        true
    }

    pub fn register_target(&self, hook: &str, plugin: Arc<dyn TargetPlugin>) -> bool {
        let mut v = write(&self.targets);
        if v.iter().any(|(h, _)| h == hook) {
            tracing::warn!(hook, "target already registered");
            return false;
        }
        v.push((hook.to_string(), plugin));
        true
    }

    pub fn remove_effect(&self, hook: &str) -> bool {
        write(&self.effects).remove(hook).is_some()
    }

    pub fn remove_source(&self, hook: &str) -> bool {
        let mut v = write(&self.sources);
        let before = v.len();
        v.retain(|(h, _)| h != hook);
        v.len() != before
    }

    pub fn remove_transform(&self, hook: &str) -> bool {
        write(&self.transforms).remove(hook).is_some()
    }

    pub fn remove_target(&self, hook: &str) -> bool {
        let mut v = write(&self.targets);
        let before = v.len();
        v.retain(|(h, _)| h != hook);
        v.len() != before
    }

    pub fn effect(&self, hook: &str) -> Option<Arc<dyn EffectPlugin>> {
        read(&self.effects).get(hook).cloned()
    }

    pub fn source(&self, hook: &str) -> Option<Arc<dyn SourcePlugin>> {
        read(&self.sources)
            .iter()
            .find(|(h, _)| h == hook)
            .map(|(_, p)| p.clone())
    }

    pub fn transform(&self, hook: &str) -> Option<Arc<dyn TransformPlugin>> {
        read(&self.transforms).get(hook).cloned()
    }

    pub fn target(&self, hook: &str) -> Option<Arc<dyn TargetPlugin>> {
        read(&self.targets)
            .iter()
            .find(|(h, _)| h == hook)
            .map(|(_, p)| p.clone())
    }

    /// Source plugins in registration order.
    pub fn source_plugins(&self) -> Vec<(String, Arc<dyn SourcePlugin>)> {
        read(&self.sources).clone()
    }

    pub fn target_plugins(&self) -> Vec<(String, Arc<dyn TargetPlugin>)> {
        read(&self.targets).clone()
    }

    pub fn effect_hooks(&self) -> Vec<String> {
        read(&self.effects).keys().cloned().collect()
    }

    pub fn source_hooks(&self) -> Vec<String> {
        read(&self.sources).iter().map(|(h, _)| h.clone()).collect()
    }

    pub fn transform_hooks(&self) -> Vec<String> {
        read(&self.transforms).keys().cloned().collect()
    }

    pub fn target_hooks(&self) -> Vec<String> {
        read(&self.targets).iter().map(|(h, _)| h.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl Effect for Nop {}

    impl EffectPlugin for Nop {
        fn title(&self) -> &str {
            "nop"
        }
        fn inputs(&self) -> Vec<InputSpec> {
            vec![InputSpec::image("source")]
        }
        fn create(&self, _options: &Options) -> Box<dyn Effect> {
            Box::new(Nop)
        }
    }

    #[test]
    fn duplicate_hooks_keep_the_first_plugin() {
        let r = Registry::new();
        assert!(r.register_effect("nop", Arc::new(Nop)));
        assert!(!r.register_effect("nop", Arc::new(Nop)));
        assert_eq!(r.effect_hooks(), vec!["nop".to_string()]);
        assert!(r.remove_effect("nop"));
        assert!(r.effect("nop").is_none());
    }

    #[test]
    fn builtins_probe_in_registration_order() {
        let r = Registry::with_builtins();
        assert_eq!(r.source_hooks(), vec!["image", "canvas", "video", "texture"]);
        assert_eq!(r.target_hooks(), vec!["surface", "texture", "framebuffer"]);
        assert!(r.transform("2d").is_some());
        assert!(r.transform("flip").is_some());
    }
}
