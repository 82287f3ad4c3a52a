use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgba, RgbaImage};

use super::*;
use crate::input::InputSpec;
use crate::media::Surface;
use crate::plugin::{Effect, EffectPlugin, Pass};
use crate::soft::{register_kernel, Fragment, SoftGpu};
use reel_core::EventKind;
use reel_graph::NodeEvent;

const INVERT_FRAGMENT: &str = "#version 330 core
// engine tests: invert
in vec2 vTexCoord;
out vec4 fragColor;
uniform sampler2D source;
uniform float amount;
void main() {
    vec4 c = texture(source, vTexCoord);
    fragColor = vec4(mix(c.rgb, 1.0 - c.rgb, amount), c.a);
}
";

const SOLID_FRAGMENT: &str = "#version 330 core
// engine tests: solid
out vec4 fragColor;
uniform vec4 color;
void main() {
    fragColor = color;
}
";

const PICK_FRAGMENT: &str = "#version 330 core
// engine tests: pick
in vec2 vTexCoord;
out vec4 fragColor;
uniform sampler2D a;
uniform sampler2D b;
uniform float mix;
void main() {
    fragColor = mix < 0.5 ? texture(a, vTexCoord) : texture(b, vTexCoord);
}
";

fn invert_kernel(f: &Fragment<'_>) -> [f32; 4] {
    let c = f.texel("source");
    let t = f.float("amount");
    let m = |x: f32| x + (1.0 - 2.0 * x) * t;
    [m(c[0]), m(c[1]), m(c[2]), c[3]]
}

fn solid_kernel(f: &Fragment<'_>) -> [f32; 4] {
    f.vec4("color")
}

fn pick_kernel(f: &Fragment<'_>) -> [f32; 4] {
    if f.float("mix") < 0.5 {
        f.texel("a")
    } else {
        f.texel("b")
    }
}

struct Invert;

impl Effect for Invert {
    fn shader(&self, _inputs: &InputValues, _base: ShaderSource) -> ShaderSource {
        ShaderSource::with_fragment(INVERT_FRAGMENT)
    }
}

impl EffectPlugin for Invert {
    fn title(&self) -> &str {
        "Invert"
    }
    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::image("source"),
            InputSpec::number("amount").default(1.0).range(0.0, 1.0),
        ]
    }
    fn create(&self, _options: &Options) -> Box<dyn Effect> {
        Box::new(Invert)
    }
}

/// Generator sharing one program across instances; counts destroyed instances.
struct Solid {
    destroyed: Arc<AtomicUsize>,
}

struct SolidInstance {
    destroyed: Arc<AtomicUsize>,
}

impl Effect for SolidInstance {
    fn shader(&self, _inputs: &InputValues, _base: ShaderSource) -> ShaderSource {
        ShaderSource::with_fragment(SOLID_FRAGMENT)
    }
    fn destroy(&mut self, _gpu: Option<&mut dyn Gpu>) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
    fn lose_context(&mut self) {}
}

impl EffectPlugin for Solid {
    fn title(&self) -> &str {
        "Solid"
    }
    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::color("color").default([1.0, 0.0, 0.0, 1.0]),
            InputSpec::number("width").default(4.0),
            InputSpec::number("height").default(2.0),
        ]
    }
    fn common_shader(&self) -> bool {
        true
    }
    fn create(&self, _options: &Options) -> Box<dyn Effect> {
        Box::new(SolidInstance {
            destroyed: self.destroyed.clone(),
        })
    }
}

/// Two image inputs; `mix` decides which one is needed.
struct Pick;

impl Effect for Pick {
    fn shader(&self, _inputs: &InputValues, _base: ShaderSource) -> ShaderSource {
        ShaderSource::with_fragment(PICK_FRAGMENT)
    }
    fn requires(&self, input: &str, inputs: &InputValues) -> bool {
        let mix = inputs.get("mix").and_then(Value::as_f64).unwrap_or(0.0);
        match input {
            "a" => mix < 1.0,
            "b" => mix > 0.0,
            _ => true,
        }
    }
}

impl EffectPlugin for Pick {
    fn title(&self) -> &str {
        "Pick"
    }
    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::image("a"),
            InputSpec::image("b"),
            InputSpec::number("mix").default(0.0).range(0.0, 1.0).update_sources(),
        ]
    }
    fn create(&self, _options: &Options) -> Box<dyn Effect> {
        Box::new(Pick)
    }
}

/// Generator whose draw always fails.
struct Failing;

impl Effect for Failing {
    fn shader(&self, _inputs: &InputValues, _base: ShaderSource) -> ShaderSource {
        ShaderSource::with_fragment(SOLID_FRAGMENT)
    }
    fn draw(&mut self, _pass: &mut Pass<'_>) -> Result<(), EngineError> {
        Err(EngineError::other("draw refused"))
    }
}

impl EffectPlugin for Failing {
    fn title(&self) -> &str {
        "Failing"
    }
    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::number("width").default(2.0),
            InputSpec::number("height").default(2.0),
        ]
    }
    fn create(&self, _options: &Options) -> Box<dyn Effect> {
        Box::new(Failing)
    }
}

struct Fixture {
    engine: Engine,
    destroyed: Arc<AtomicUsize>,
}

fn fixture() -> Fixture {
    register_kernel(INVERT_FRAGMENT, Arc::new(invert_kernel));
    register_kernel(SOLID_FRAGMENT, Arc::new(solid_kernel));
    register_kernel(PICK_FRAGMENT, Arc::new(pick_kernel));
    let destroyed = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(Registry::with_builtins());
    registry.register_effect("invert", Arc::new(Invert));
    registry.register_effect(
        "solid",
        Arc::new(Solid {
            destroyed: destroyed.clone(),
        }),
    );
    registry.register_effect("pick", Arc::new(Pick));
    registry.register_effect("failing", Arc::new(Failing));
    Fixture {
        engine: Engine::with_registry(EngineConfig::default(), registry),
        destroyed,
    }
}

fn solid_image(w: u32, h: u32, px: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(w, h, Rgba(px))
}

fn surface(engine: &mut Engine, w: u32, h: u32) -> TargetHandle {
    let s = Surface::with_context(w, h, Box::new(SoftGpu::with_screen(w, h)));
    engine.target(None, s, Options::new()).unwrap()
}

/// red image -> invert -> 2x2 surface
fn red_chain(engine: &mut Engine) -> (SourceHandle, EffectHandle, TargetHandle) {
    let out = surface(engine, 2, 2);
    let src = engine
        .source(None, solid_image(2, 2, [255, 0, 0, 255]), Options::new())
        .unwrap();
    let fx = engine.effect("invert", Options::new()).unwrap();
    fx.set(engine, "source", src).unwrap();
    out.set_source(engine, fx).unwrap();
    (src, fx, out)
}

fn all_pixels(bytes: &[u8]) -> Vec<[u8; 4]> {
    bytes.chunks(4).map(|c| [c[0], c[1], c[2], c[3]]).collect()
}

#[test]
fn red_through_invert_reads_cyan() {
    let mut f = fixture();
    let (_, fx, out) = red_chain(&mut f.engine);
    assert!(out.is_ready(&f.engine));
    out.render(&mut f.engine).unwrap();
    let px = out.read_pixels(&mut f.engine, 0, 0, 2, 2).unwrap();
    assert!(all_pixels(&px).iter().all(|p| *p == [0, 255, 255, 255]));

    let px = fx.read_pixels(&mut f.engine, 0, 0, 2, 2).unwrap();
    assert!(all_pixels(&px).iter().all(|p| *p == [0, 255, 255, 255]));
}

#[test]
fn rendering_clears_dirty_and_input_changes_dirty_downstream_only() {
    let mut f = fixture();
    let (src, fx, out) = red_chain(&mut f.engine);
    out.render(&mut f.engine).unwrap();
    for n in [src.node_ref(), fx.node_ref(), out.node_ref()] {
        assert!(!f.engine.is_dirty(n).unwrap());
    }

    fx.set(&mut f.engine, "amount", 0.0).unwrap();
    assert!(!f.engine.is_dirty(src).unwrap());
    assert!(f.engine.is_dirty(fx).unwrap());
    assert!(f.engine.is_dirty(out).unwrap());

    let px = out.read_pixels(&mut f.engine, 0, 0, 1, 1).unwrap();
    assert_eq!(px, vec![255, 0, 0, 255]);
}

#[test]
fn out_of_range_numbers_are_clamped() {
    let mut f = fixture();
    let fx = f.engine.effect("invert", Options::new()).unwrap();
    assert_eq!(fx.set(&mut f.engine, "amount", 7.0).unwrap(), Value::Number(1.0));
    assert!(matches!(
        fx.set(&mut f.engine, "nope", 1.0),
        Err(EngineError::UnknownInput(_))
    ));
}

#[test]
fn cycles_are_rejected_before_anything_changes() {
    let mut f = fixture();
    let a = f.engine.effect("invert", Options::new()).unwrap();
    let b = f.engine.effect("invert", Options::new()).unwrap();
    b.set(&mut f.engine, "source", a).unwrap();
    let err = a.set(&mut f.engine, "source", b).unwrap_err();
    assert!(matches!(err, EngineError::CyclicalConnection { .. }));
    assert_eq!(a.get(&f.engine, "source").unwrap(), Value::Null);
    assert!(matches!(
        a.set(&mut f.engine, "source", a),
        Err(EngineError::CyclicalConnection { .. })
    ));
}

#[test]
fn readiness_ignores_inputs_the_effect_does_not_need() {
    let mut f = fixture();
    let src = f
        .engine
        .source(None, solid_image(1, 1, [0, 0, 255, 255]), Options::new())
        .unwrap();
    let pick = f.engine.effect("pick", Options::new()).unwrap();
    pick.set(&mut f.engine, "a", src).unwrap();
    assert!(pick.is_ready(&f.engine));

    pick.set(&mut f.engine, "mix", 0.5).unwrap();
    assert!(!pick.is_ready(&f.engine));

    pick.set(&mut f.engine, "mix", 1.0).unwrap();
    assert!(!pick.is_ready(&f.engine));
    pick.set(&mut f.engine, "b", src).unwrap();
    assert!(pick.is_ready(&f.engine));
}

#[test]
fn destroy_is_idempotent_and_detaches_downstream() {
    let mut f = fixture();
    let (src, fx, out) = red_chain(&mut f.engine);
    src.destroy(&mut f.engine).unwrap();
    src.destroy(&mut f.engine).unwrap();
    assert!(src.is_destroyed(&f.engine));
    assert_eq!(fx.get(&f.engine, "source").unwrap(), Value::Null);
    assert!(!fx.is_ready(&f.engine));
    assert!(!out.is_ready(&f.engine));
    assert!(matches!(
        fx.set(&mut f.engine, "source", src),
        Err(EngineError::Destroyed(_))
    ));
    assert!(f.engine.sources().is_empty());
}

#[test]
fn common_shader_is_shared_and_released_once_per_node() {
    let mut f = fixture();
    let _out = surface(&mut f.engine, 2, 2);
    let a = f.engine.effect("solid", Options::new()).unwrap();
    let b = f.engine.effect("solid", Options::new()).unwrap();
    assert_eq!(f.engine.common_shader_refs("solid"), 2);
    assert_eq!(f.engine.size(a).unwrap(), (4, 2));

    let programs = f.engine.gpu_as::<SoftGpu>().unwrap().stats().live_programs;
    a.destroy(&mut f.engine).unwrap();
    a.destroy(&mut f.engine).unwrap();
    assert_eq!(f.engine.common_shader_refs("solid"), 1);
    assert_eq!(f.destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(f.engine.gpu_as::<SoftGpu>().unwrap().stats().live_programs, programs);

    b.destroy(&mut f.engine).unwrap();
    assert_eq!(f.engine.common_shader_refs("solid"), 0);
    assert_eq!(
        f.engine.gpu_as::<SoftGpu>().unwrap().stats().live_programs,
        programs - 1
    );
}

#[test]
fn plugin_destroy_runs_without_a_context() {
    let mut f = fixture();
    let fx = f.engine.effect("solid", Options::new()).unwrap();
    fx.destroy(&mut f.engine).unwrap();
    fx.destroy(&mut f.engine).unwrap();
    assert_eq!(f.destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(f.engine.common_shader_refs("solid"), 0);

    let _out = surface(&mut f.engine, 2, 2);
    let lost = f.engine.effect("solid", Options::new()).unwrap();
    let _gpu = f.engine.context_lost().unwrap();
    lost.destroy(&mut f.engine).unwrap();
    assert_eq!(f.destroyed.load(Ordering::SeqCst), 2);
    assert_eq!(f.engine.common_shader_refs("solid"), 0);
}

#[test]
fn context_loss_drops_handles_and_restore_rebuilds() {
    let mut f = fixture();
    let (src, fx, out) = red_chain(&mut f.engine);
    out.render(&mut f.engine).unwrap();

    let heard = Rc::new(RefCell::new(Vec::new()));
    for kind in [EventKind::ContextLost, EventKind::ContextRestored] {
        let log = heard.clone();
        f.engine
            .on(fx, kind, Box::new(move |_: &mut Engine, ev: NodeEvent| log.borrow_mut().push(ev.kind)))
            .unwrap();
    }

    let mut gpu = f.engine.context_lost().unwrap();
    for n in [src.node_ref(), fx.node_ref()] {
        assert_eq!(f.engine.node_texture(n).unwrap(), None);
    }
    assert!(matches!(
        out.read_pixels(&mut f.engine, 0, 0, 1, 1),
        Err(EngineError::NoContext)
    ));
    assert_eq!(*heard.borrow(), vec![EventKind::ContextLost]);

    let soft = gpu.as_any_mut().unwrap().downcast_mut::<SoftGpu>().unwrap();
    soft.lose_context();
    soft.restore_context();
    f.engine.context_restored(gpu).unwrap();
    assert!(f.engine.is_dirty(fx).unwrap());
    assert_eq!(
        *heard.borrow(),
        vec![EventKind::ContextLost, EventKind::ContextRestored]
    );

    let px = out.read_pixels(&mut f.engine, 0, 0, 2, 2).unwrap();
    assert!(all_pixels(&px).iter().all(|p| *p == [0, 255, 255, 255]));
}

#[test]
fn aliases_forward_to_the_node_input() {
    let mut f = fixture();
    let fx = f.engine.effect("invert", Options::new()).unwrap();
    f.engine.alias("strength", fx, "amount").unwrap();
    assert_eq!(f.engine.set_alias("strength", 0.25).unwrap(), Value::Number(0.25));
    assert_eq!(fx.get(&f.engine, "amount").unwrap(), Value::Number(0.25));
    assert!(matches!(
        f.engine.alias("render", fx, "amount"),
        Err(EngineError::ReservedName(_))
    ));
    assert!(f.engine.alias("x", fx, "missing").is_err());

    fx.destroy(&mut f.engine).unwrap();
    assert!(f.engine.get_alias("strength").is_err());
}

#[test]
fn defaults_apply_to_new_effects_and_migrate_untouched_ones() {
    let mut f = fixture();
    let untouched = f.engine.effect("invert", Options::new()).unwrap();
    let edited = f.engine.effect("invert", Options::new()).unwrap();
    edited.set(&mut f.engine, "amount", 0.5).unwrap();

    let mut table = InputValues::new();
    table.insert("amount".into(), Value::Number(0.25));
    f.engine.set_defaults("invert", table).unwrap();

    assert_eq!(untouched.get(&f.engine, "amount").unwrap(), Value::Number(0.25));
    assert_eq!(edited.get(&f.engine, "amount").unwrap(), Value::Number(0.5));
    let fresh = f.engine.effect("invert", Options::new()).unwrap();
    assert_eq!(fresh.get(&f.engine, "amount").unwrap(), Value::Number(0.25));

    f.engine.clear_defaults("invert").unwrap();
    assert_eq!(fresh.get(&f.engine, "amount").unwrap(), Value::Number(1.0));
}

#[test]
fn listeners_run_on_flush_and_can_be_removed() {
    let mut f = fixture();
    let (_, fx, out) = red_chain(&mut f.engine);
    let renders = Rc::new(Cell::new(0));
    let r = renders.clone();
    let id = f
        .engine
        .on(out, EventKind::Render, Box::new(move |_: &mut Engine, _: NodeEvent| r.set(r.get() + 1)))
        .unwrap();

    out.render(&mut f.engine).unwrap();
    assert_eq!(renders.get(), 0);
    f.engine.flush_events();
    assert_eq!(renders.get(), 1);

    assert!(f.engine.off(out, id));
    fx.set(&mut f.engine, "amount", 0.5).unwrap();
    out.render(&mut f.engine).unwrap();
    f.engine.flush_events();
    assert_eq!(renders.get(), 1);
}

#[test]
fn daemon_renders_dirty_auto_targets() {
    let mut f = fixture();
    let (_, fx, out) = red_chain(&mut f.engine);
    assert!(!f.engine.frame_requested());

    let frames = Rc::new(Cell::new(0));
    let counter = frames.clone();
    f.engine.go(Some(Box::new(move |_: &mut Engine, _: f64| counter.set(counter.get() + 1))), None);
    assert!(f.engine.frame_requested());
    assert!(f.engine.tick(16.0));
    assert_eq!(frames.get(), 1);
    assert!(!f.engine.is_dirty(out).unwrap());

    fx.set(&mut f.engine, "amount", 0.0).unwrap();
    assert!(f.engine.tick(32.0));
    assert!(!f.engine.is_dirty(out).unwrap());

    f.engine.stop();
    assert!(!f.engine.frame_requested());
    assert!(!f.engine.tick(48.0));
    assert_eq!(frames.get(), 2);
}

#[test]
fn foreign_handles_and_bad_buffers_are_rejected() {
    let mut a = fixture();
    let mut b = fixture();
    let (_, fx, out) = red_chain(&mut a.engine);
    let other = b.engine.effect("invert", Options::new()).unwrap();
    assert!(matches!(
        other.set(&mut b.engine, "source", fx),
        Err(EngineError::ForeignNode(_))
    ));

    let mut buf = vec![0u8; 3];
    assert!(matches!(
        a.engine.read_pixels_into(out, 0, 0, 1, 1, &mut buf),
        Err(EngineError::BadReadBuffer { expected: 4, got: 3 })
    ));
}

#[test]
fn without_a_context_rendering_is_a_no_op() {
    let mut f = fixture();
    let out = f.engine.target(None, Surface::new(2, 2), Options::new()).unwrap();
    let fx = f.engine.effect("solid", Options::new()).unwrap();
    out.set_source(&mut f.engine, fx).unwrap();
    out.render(&mut f.engine).unwrap();
    assert!(matches!(
        out.read_pixels(&mut f.engine, 0, 0, 1, 1),
        Err(EngineError::NoContext)
    ));
    assert_eq!(
        f.engine.incompatible("solid").as_deref(),
        Some("no graphics context attached")
    );
}

#[test]
fn vertical_flip_swaps_rows_without_an_extra_pass() {
    let mut f = fixture();
    let out = surface(&mut f.engine, 1, 2);
    let mut img = RgbaImage::new(1, 2);
    img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
    img.put_pixel(0, 1, Rgba([0, 0, 255, 255]));
    let src = f.engine.source(None, img, Options::new()).unwrap();

    out.set_source(&mut f.engine, src).unwrap();
    let px = out.read_pixels(&mut f.engine, 0, 0, 1, 2).unwrap();
    // bottom row first: the image's bottom (blue) row
    assert_eq!(&px[..4], &[0, 0, 255, 255]);

    let mut opts = Options::new();
    opts.insert("direction".into(), Value::from("vertical"));
    let flip = f.engine.transform("flip", opts).unwrap();
    flip.set(&mut f.engine, "source", src).unwrap();
    out.set_source(&mut f.engine, flip).unwrap();
    let draws = f.engine.gpu_as::<SoftGpu>().unwrap().stats().draw_calls;
    let px = out.read_pixels(&mut f.engine, 0, 0, 1, 2).unwrap();
    assert_eq!(&px[..4], &[255, 0, 0, 255]);
    assert_eq!(f.engine.gpu_as::<SoftGpu>().unwrap().stats().draw_calls, draws + 1);
}

#[test]
fn destroyed_engine_refuses_new_work() {
    let mut f = fixture();
    let (_, fx, _) = red_chain(&mut f.engine);
    f.engine.destroy();
    assert!(f.engine.is_destroyed());
    assert!(fx.is_destroyed(&f.engine));
    assert!(matches!(
        f.engine.effect("invert", Options::new()),
        Err(EngineError::EngineDestroyed)
    ));
    f.engine.destroy();
}

#[test]
fn explicit_renders_do_not_accumulate_events() {
    let mut f = fixture();
    let (_, fx, out) = red_chain(&mut f.engine);
    for i in 0..500 {
        let amount = if i % 2 == 0 { 0.0 } else { 1.0 };
        fx.set(&mut f.engine, "amount", amount).unwrap();
        out.render(&mut f.engine).unwrap();
    }
    assert!(f.engine.graph().pending_events().is_empty());

    let renders = Rc::new(Cell::new(0));
    let r = renders.clone();
    f.engine
        .on(out, EventKind::Render, Box::new(move |_: &mut Engine, _: NodeEvent| r.set(r.get() + 1)))
        .unwrap();
    for i in 0..10 {
        let amount = if i % 2 == 0 { 0.0 } else { 1.0 };
        fx.set(&mut f.engine, "amount", amount).unwrap();
        out.render(&mut f.engine).unwrap();
    }
    let pending = f.engine.graph().pending_events();
    assert!(pending.len() <= 20);
    assert!(pending.iter().all(|e| e.node == out.node_ref().node));
    f.engine.flush_events();
    assert_eq!(renders.get(), 10);
    assert!(f.engine.graph().pending_events().is_empty());
}

#[test]
fn context_loss_stops_the_daemon_and_restore_resumes_it() {
    let mut f = fixture();
    let (_, _, out) = red_chain(&mut f.engine);
    f.engine.go(None, None);
    assert!(f.engine.frame_requested());

    let mut gpu = f.engine.context_lost().unwrap();
    assert!(!f.engine.frame_requested());
    assert!(!f.engine.tick(16.0));

    let soft = gpu.as_any_mut().unwrap().downcast_mut::<SoftGpu>().unwrap();
    soft.lose_context();
    soft.restore_context();
    f.engine.context_restored(gpu).unwrap();
    assert!(f.engine.frame_requested());
    assert!(f.engine.is_dirty(out).unwrap());

    f.engine.tick(32.0);
    assert!(!f.engine.is_dirty(out).unwrap());
}

#[test]
fn idle_daemon_stops_and_wakes_when_an_auto_target_dirties() {
    let mut f = fixture();
    let out = surface(&mut f.engine, 4, 2);
    let fx = f.engine.effect("solid", Options::new()).unwrap();
    out.set_source(&mut f.engine, fx).unwrap();
    f.engine.go(None, None);
    assert!(f.engine.frame_requested());

    // no sources and no callbacks: one frame, then idle
    assert!(!f.engine.tick(16.0));
    assert!(!f.engine.frame_requested());
    assert!(!f.engine.is_dirty(out).unwrap());

    fx.set(&mut f.engine, "color", Value::from("#00ff00")).unwrap();
    assert!(f.engine.frame_requested());
    assert!(!f.engine.tick(32.0));
    assert!(!f.engine.is_dirty(out).unwrap());
    let px = out.read_pixels(&mut f.engine, 0, 0, 1, 1).unwrap();
    assert_eq!(px, vec![0, 255, 0, 255]);
}

#[test]
fn failed_target_render_does_not_stop_the_frame() {
    let mut f = fixture();
    let (_, _, out) = red_chain(&mut f.engine);
    let broken_out = f.engine.target(None, Surface::new(2, 2), Options::new()).unwrap();
    let broken = f.engine.effect("failing", Options::new()).unwrap();
    broken_out.set_source(&mut f.engine, broken).unwrap();
    assert!(broken_out.is_ready(&f.engine));

    f.engine.go(None, None);
    assert!(f.engine.tick(16.0));
    assert!(!f.engine.is_dirty(out).unwrap());
    assert!(f.engine.is_dirty(broken_out).unwrap());
    assert!(f.engine.frame_requested());
    assert!(matches!(
        broken_out.render(&mut f.engine),
        Err(EngineError::Other(_))
    ));
}

#[test]
fn unconsumed_dirty_source_is_left_alone_by_the_daemon() {
    let mut f = fixture();
    let _out = surface(&mut f.engine, 2, 2);
    let src = f
        .engine
        .source(None, solid_image(1, 1, [0, 0, 255, 255]), Options::new())
        .unwrap();
    let dirty = Rc::new(Cell::new(0));
    let d = dirty.clone();
    f.engine
        .on(src, EventKind::Dirty, Box::new(move |_: &mut Engine, _: NodeEvent| d.set(d.get() + 1)))
        .unwrap();

    f.engine.go(None, None);
    for frame in 0..5 {
        assert!(f.engine.tick(16.0 * frame as f64));
    }
    assert_eq!(dirty.get(), 0);
    assert!(f.engine.is_dirty(src).unwrap());
}
