#![forbid(unsafe_code)]

//! Behavioural contracts of the public engine surface, checked end to end on `SoftGpu`.

#[cfg(test)]
mod support {
    use image::{Rgba, RgbaImage};
    use reel_runtime::{
        Engine, EngineConfig, Options, SoftGpu, SourceHandle, Surface, TargetHandle,
    };

    pub fn engine() -> Engine {
        engine_with(EngineConfig::default())
    }

    pub fn engine_with(config: EngineConfig) -> Engine {
        Engine::with_registry(config, reel_effects::registry())
    }

    pub fn surface(engine: &mut Engine, w: u32, h: u32) -> TargetHandle {
        let s = Surface::with_context(w, h, Box::new(SoftGpu::with_screen(w, h)));
        engine.target(None, s, Options::new()).expect("surface target")
    }

    pub fn solid(engine: &mut Engine, w: u32, h: u32, px: [u8; 4]) -> SourceHandle {
        engine
            .source(None, RgbaImage::from_pixel(w, h, Rgba(px)), Options::new())
            .expect("image source")
    }

    pub fn pixels(bytes: &[u8]) -> Vec<[u8; 4]> {
        bytes.chunks(4).map(|c| [c[0], c[1], c[2], c[3]]).collect()
    }

    pub fn soft(engine: &Engine) -> &SoftGpu {
        engine.gpu_as::<SoftGpu>().expect("SoftGpu attached")
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use reel_runtime::framebuffer::Framebuffer;
    use reel_runtime::input::InputSpec;
    use reel_runtime::{
        Engine, EngineConfig, EngineError, EventKind, NodeEvent, Options, SoftGpu, Value,
    };

    use crate::support::*;

    // ---- Golden fixtures (JSON contracts) ----
    const CONFIG_BASIC_JSON: &str = include_str!("../fixtures/config_basic.json");
    const CONFIG_ZERO_SIZE_JSON: &str = include_str!("../fixtures/config_zero_size.json");
    const DEFAULTS_PACK_JSON: &str = include_str!("../fixtures/defaults_pack.json");

    #[test]
    fn golden_config_basic_parses() {
        let cfg = EngineConfig::from_json_str(CONFIG_BASIC_JSON).expect("config_basic.json should parse");
        assert_eq!((cfg.default_width, cfg.default_height), (320, 240));
        assert!(!cfg.keep_alive_with_sources);
        assert_eq!(cfg.log_filter.as_deref(), Some("reel_runtime=debug"));
        // Unlisted fields keep their defaults.
        assert_eq!(cfg.max_texture_units, EngineConfig::default().max_texture_units);
    }

    #[test]
    fn golden_config_zero_size_is_rejected() {
        let err = EngineConfig::from_json_str(CONFIG_ZERO_SIZE_JSON)
            .expect_err("config_zero_size.json must fail");
        assert!(
            err.to_string().contains("must be > 0"),
            "expected size complaint, got: {err}"
        );
    }

    #[test]
    fn golden_defaults_are_validated_against_the_schema() {
        let mut engine = engine();
        let json: serde_json::Value = serde_json::from_str(DEFAULTS_PACK_JSON).unwrap();
        engine.set_defaults_json(&json).expect("defaults_pack.json should apply");

        let inv = engine.effect("invert", Options::new()).unwrap();
        assert_eq!(inv.get(&engine, "amount").unwrap(), Value::Number(0.5));

        // 2.0 is out of range for `mix`; the stored default is clamped.
        let xf = engine.effect("crossfade", Options::new()).unwrap();
        assert_eq!(xf.get(&engine, "mix").unwrap(), Value::Number(1.0));
    }

    // ---- End to end ----

    #[test]
    fn red_through_invert_reads_cyan_on_every_pixel() {
        let mut engine = engine();
        let out = surface(&mut engine, 2, 2);
        let src = solid(&mut engine, 2, 2, [255, 0, 0, 255]);
        let fx = engine.effect("invert", Options::new()).unwrap();
        fx.set(&mut engine, "source", src).unwrap();
        out.set_source(&mut engine, fx).unwrap();

        out.render(&mut engine).unwrap();
        let px = out.read_pixels(&mut engine, 0, 0, 2, 2).unwrap();
        assert_eq!(pixels(&px), vec![[0, 255, 255, 255]; 4]);
    }

    #[test]
    fn second_render_without_changes_draws_nothing() {
        let mut engine = engine();
        let out = surface(&mut engine, 2, 2);
        let src = solid(&mut engine, 2, 2, [255, 0, 0, 255]);
        let fx = engine.effect("invert", Options::new()).unwrap();
        fx.set(&mut engine, "source", src).unwrap();
        out.set_source(&mut engine, fx).unwrap();
        out.render(&mut engine).unwrap();
        let uploads = soft(&engine).stats().texture_image_calls;
        let draws = soft(&engine).stats().draw_calls;

        // The target still draws on request; nothing upstream does.
        out.render(&mut engine).unwrap();
        assert_eq!(soft(&engine).stats().texture_image_calls, uploads);
        assert_eq!(soft(&engine).stats().draw_calls, draws + 1);
    }

    // ---- Graph rules ----

    #[test]
    fn cycles_are_rejected_and_leave_the_graph_as_it_was() {
        let mut engine = engine();
        let a = engine.effect("invert", Options::new()).unwrap();
        let b = engine.effect("invert", Options::new()).unwrap();
        b.set(&mut engine, "source", a).unwrap();

        let err = a.set(&mut engine, "source", b).unwrap_err();
        assert!(matches!(err, EngineError::CyclicalConnection { .. }), "got {err:?}");
        assert_eq!(a.get(&engine, "source").unwrap(), Value::Null);
        assert_eq!(b.get(&engine, "source").unwrap(), Value::Node(a.node_ref()));
    }

    #[test]
    fn self_connection_is_a_cycle() {
        let mut engine = engine();
        let a = engine.effect("invert", Options::new()).unwrap();
        assert!(matches!(
            a.set(&mut engine, "source", a),
            Err(EngineError::CyclicalConnection { .. })
        ));
    }

    #[test]
    fn nodes_of_another_engine_are_refused() {
        let mut one = engine();
        let mut two = engine();
        let src = solid(&mut one, 1, 1, [0, 0, 0, 255]);
        let fx = two.effect("invert", Options::new()).unwrap();
        assert!(matches!(
            fx.set(&mut two, "source", src),
            Err(EngineError::ForeignNode(_))
        ));
    }

    #[test]
    fn destroy_is_idempotent_and_detaches_downstream() {
        let mut engine = engine();
        let out = surface(&mut engine, 2, 2);
        let src = solid(&mut engine, 2, 2, [255, 0, 0, 255]);
        let fx = engine.effect("invert", Options::new()).unwrap();
        fx.set(&mut engine, "source", src).unwrap();
        out.set_source(&mut engine, fx).unwrap();
        assert!(out.is_ready(&engine));

        src.destroy(&mut engine).unwrap();
        src.destroy(&mut engine).unwrap();
        assert!(src.is_destroyed(&engine));
        assert_eq!(fx.get(&engine, "source").unwrap(), Value::Null);
        assert!(!out.is_ready(&engine));
        assert!(matches!(
            fx.set(&mut engine, "source", src),
            Err(EngineError::Destroyed(_))
        ));
    }

    #[test]
    fn destroyed_engine_refuses_everything() {
        let mut engine = engine();
        let fx = engine.effect("invert", Options::new()).unwrap();
        engine.destroy();
        engine.destroy();
        assert!(engine.is_destroyed());
        assert!(matches!(
            engine.effect("invert", Options::new()),
            Err(EngineError::EngineDestroyed)
        ));
        assert!(fx.set(&mut engine, "amount", 0.5).is_err());
    }

    // ---- Resources ----

    #[test]
    fn framebuffer_resize_to_the_same_size_is_a_no_op() {
        let mut gpu = SoftGpu::new();
        let mut fb = Framebuffer::new(&mut gpu, 4, 4, None).unwrap();
        let before = gpu.stats();

        fb.resize(&mut gpu, 4, 4);
        let after = gpu.stats();
        assert_eq!(after.texture_image_calls, before.texture_image_calls);
        assert_eq!(after.renderbuffer_storage_calls, before.renderbuffer_storage_calls);

        fb.resize(&mut gpu, 8, 2);
        assert_eq!(fb.size(), (8, 2));
        assert_eq!(gpu.stats().texture_image_calls, before.texture_image_calls + 1);

        fb.destroy(&mut gpu);
        fb.destroy(&mut gpu);
        assert_eq!(gpu.stats().live_framebuffers, 0);
    }

    #[test]
    fn common_shader_is_compiled_once_and_freed_with_the_last_user() {
        let mut engine = engine();
        let _out = surface(&mut engine, 1, 1);
        let base_programs = soft(&engine).stats().live_programs;

        let a = engine.effect("color", Options::new()).unwrap();
        let b = engine.effect("color", Options::new()).unwrap();
        assert_eq!(engine.common_shader_refs("color"), 2);
        assert_eq!(soft(&engine).stats().live_programs, base_programs + 1);

        a.destroy(&mut engine).unwrap();
        assert_eq!(engine.common_shader_refs("color"), 1);
        assert_eq!(soft(&engine).stats().live_programs, base_programs + 1);

        b.destroy(&mut engine).unwrap();
        assert_eq!(engine.common_shader_refs("color"), 0);
        assert_eq!(soft(&engine).stats().live_programs, base_programs);
    }

    // ---- Context loss ----

    #[test]
    fn context_loss_and_restore_rebuild_the_same_picture() {
        let mut engine = engine();
        let out = surface(&mut engine, 2, 2);
        let src = solid(&mut engine, 2, 2, [255, 0, 0, 255]);
        let fx = engine.effect("invert", Options::new()).unwrap();
        fx.set(&mut engine, "source", src).unwrap();
        out.set_source(&mut engine, fx).unwrap();
        out.render(&mut engine).unwrap();

        let seen: Rc<RefCell<Vec<EventKind>>> = Rc::default();
        for kind in [EventKind::ContextLost, EventKind::ContextRestored] {
            let seen = seen.clone();
            engine
                .on(fx, kind, Box::new(move |_: &mut Engine, ev: NodeEvent| seen.borrow_mut().push(ev.kind)))
                .unwrap();
        }

        engine.go(None, None);
        assert!(engine.frame_requested());

        let mut gpu = engine.context_lost().expect("context was attached");
        assert!(engine.gpu().is_none());
        assert!(!engine.frame_requested());
        assert!(matches!(
            out.read_pixels(&mut engine, 0, 0, 1, 1),
            Err(EngineError::NoContext)
        ));

        let soft_gpu = gpu
            .as_any_mut()
            .and_then(|a| a.downcast_mut::<SoftGpu>())
            .expect("soft backend");
        assert_eq!(soft_gpu.stats().live_textures, 0);
        soft_gpu.restore_context();

        engine.context_restored(gpu).unwrap();
        assert!(engine.frame_requested());
        assert!(engine.is_dirty(out).unwrap());
        out.render(&mut engine).unwrap();
        let px = out.read_pixels(&mut engine, 0, 0, 2, 2).unwrap();
        assert_eq!(pixels(&px), vec![[0, 255, 255, 255]; 4]);
        assert_eq!(
            *seen.borrow(),
            vec![EventKind::ContextLost, EventKind::ContextRestored]
        );
    }

    // ---- Validators ----

    #[test]
    fn number_validator_clamps_steps_and_wraps() {
        let spec = InputSpec::number("n").range(0.0, 10.0).step(0.5);
        let d = Value::Number(0.0);
        assert_eq!(spec.validate(&Value::Number(12.0), &d, &d).unwrap(), Value::Number(10.0));
        assert_eq!(spec.validate(&Value::Number(3.3), &d, &d).unwrap(), Value::Number(3.5));
        assert_eq!(
            spec.validate(&Value::String("2".into()), &d, &d).unwrap(),
            Value::Number(2.0)
        );

        let wrap = InputSpec::number("angle").modulo(360.0);
        assert_eq!(wrap.validate(&Value::Number(370.0), &d, &d).unwrap(), Value::Number(10.0));
    }

    #[test]
    fn enum_validator_falls_back_to_the_default_on_unknown_keys() {
        let spec = InputSpec::enumeration("mode", &[("a", "A"), ("b", "B")]);
        let d = Value::from("a");
        let prev = Value::from("b");
        assert_eq!(spec.validate(&Value::from("zzz"), &d, &prev).unwrap(), d);
        assert_eq!(spec.validate(&Value::from("b"), &d, &prev).unwrap(), prev);
    }

    #[test]
    fn color_validator_parses_css() {
        let spec = InputSpec::color("c");
        let d = Value::Color([0.0, 0.0, 0.0, 1.0]);
        assert_eq!(
            spec.validate(&Value::from("#ff0000"), &d, &d).unwrap(),
            Value::Color([1.0, 0.0, 0.0, 1.0])
        );
        assert_eq!(
            spec.validate(&Value::from("not a color"), &d, &d).unwrap(),
            d
        );
    }

    #[test]
    fn reserved_input_names_are_refused() {
        let mut schema = vec![InputSpec::number("render")];
        assert!(matches!(
            reel_runtime::input::normalize_schema(&mut schema),
            Err(EngineError::ReservedName(_))
        ));
    }
}

#[cfg(test)]
mod determinism;
