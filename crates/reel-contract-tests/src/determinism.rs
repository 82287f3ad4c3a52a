use proptest::prelude::*;

use reel_runtime::{Engine, Options};

use crate::support::*;

/// Builds red/blue -> crossfade(mix) -> 2x2 surface and returns the surface pixels.
fn crossfade_frame(engine: &mut Engine, mix: f64) -> Vec<u8> {
    let out = surface(engine, 2, 2);
    let red = solid(engine, 2, 2, [255, 0, 0, 255]);
    let blue = solid(engine, 2, 2, [0, 0, 255, 255]);
    let fx = engine.effect("crossfade", Options::new()).unwrap();
    fx.set(engine, "a", red).unwrap();
    fx.set(engine, "b", blue).unwrap();
    fx.set(engine, "mix", mix).unwrap();
    out.set_source(engine, fx).unwrap();
    out.render(engine).unwrap();
    out.read_pixels(engine, 0, 0, 2, 2).unwrap()
}

/// Determinism contract:
/// the same graph built in two engines renders byte-identical frames.
#[test]
fn same_graph_renders_the_same_bytes() {
    let p1 = crossfade_frame(&mut engine(), 0.25);
    let p2 = crossfade_frame(&mut engine(), 0.25);
    assert_eq!(p1, p2, "frames must be byte-identical");
}

/// Re-rendering after an unrelated input round trip gives the original frame back.
#[test]
fn restoring_an_input_restores_the_frame() {
    let mut engine = engine();
    let out = surface(&mut engine, 2, 2);
    let src = solid(&mut engine, 2, 2, [200, 100, 50, 255]);
    let fx = engine.effect("invert", Options::new()).unwrap();
    fx.set(&mut engine, "source", src).unwrap();
    out.set_source(&mut engine, fx).unwrap();
    let first = out.read_pixels(&mut engine, 0, 0, 2, 2).unwrap();

    fx.set(&mut engine, "amount", 0.0).unwrap();
    let plain = out.read_pixels(&mut engine, 0, 0, 2, 2).unwrap();
    assert_eq!(pixels(&plain)[0], [200, 100, 50, 255]);

    fx.set(&mut engine, "amount", 1.0).unwrap();
    let again = out.read_pixels(&mut engine, 0, 0, 2, 2).unwrap();
    assert_eq!(first, again);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Opaque crossfades stay opaque and split the two channels between them.
    #[test]
    fn crossfade_conserves_intensity(mix in 0.0f64..=1.0) {
        let px = crossfade_frame(&mut engine(), mix);
        for p in pixels(&px) {
            prop_assert_eq!(p[3], 255);
            prop_assert_eq!(p[1], 0);
            let total = p[0] as i32 + p[2] as i32;
            prop_assert!((254..=256).contains(&total), "r + b = {}", total);
        }
    }
}
