//! Compile-only compatibility crate.
//!
//! This crate exists to ensure the public SDK surface remains usable by third-party
//! consumers. It is not shipped or run; it must only build.

use std::sync::Arc;

use reel_core::{EngineConfig, EngineError, EventKind, Mat4};
use reel_graph::{Graph, NodeKind};
use reel_runtime::input::InputSpec;
use reel_runtime::{
    Effect, EffectPlugin, Engine, FrameScheduler, Gpu, InputValues, ManualScheduler, NodeEvent,
    Options, Registry, ShaderSource, SoftGpu, Surface, Value,
};

/// Third-party effects must be implementable with public types only.
struct Passthrough;

impl Effect for Passthrough {
    fn shader(&self, _inputs: &InputValues, base: ShaderSource) -> ShaderSource {
        base
    }
}

impl EffectPlugin for Passthrough {
    fn title(&self) -> &str {
        "Passthrough"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![InputSpec::image("source")]
    }

    fn create(&self, _options: &Options) -> Box<dyn Effect> {
        Box::new(Passthrough)
    }
}

struct HostClock;

impl FrameScheduler for HostClock {
    fn request_frame(&mut self) {}

    fn cancel_frame(&mut self) {}
}

#[allow(dead_code)]
pub fn _compile_witness() -> Result<(), EngineError> {
    // Graph bookkeeping stays usable on its own.
    let mut g = Graph::new();
    let src = g.add_node(NodeKind::Source, "image");
    let fx = g.add_node(NodeKind::Effect, "passthrough");
    let _ = (src, fx);

    // Registry + engine built from public constructors.
    let registry = Registry::with_builtins();
    reel_effects::register_all(&registry);
    registry.register_effect("passthrough", Arc::new(Passthrough));
    let mut engine = Engine::with_registry(EngineConfig::default(), Arc::new(registry));
    engine.set_scheduler(Box::new(HostClock));
    engine.set_scheduler(Box::new(ManualScheduler));

    let out = engine.target(
        None,
        Surface::with_context(4, 4, Box::new(SoftGpu::with_screen(4, 4))),
        Options::new(),
    )?;
    let pass = engine.effect("passthrough", Options::new())?;
    let color = engine.effect("color", Options::new())?;
    pass.set(&mut engine, "source", color)?;
    out.set_source(&mut engine, pass)?;
    engine.on(
        pass,
        EventKind::Resize,
        Box::new(|_: &mut Engine, _: NodeEvent| {}),
    )?;
    engine.alias("tint", color, "color")?;
    engine.set_alias("tint", Value::from("#336699"))?;

    let _frame: Vec<u8> = out.read_pixels(&mut engine, 0, 0, 4, 4)?;
    let _limits = engine.gpu().map(|g: &dyn Gpu| g.limits());
    let _m = Mat4::IDENTITY;
    engine.go(None, None);
    engine.tick(0.0);
    engine.stop();
    engine.destroy();
    Ok(())
}
