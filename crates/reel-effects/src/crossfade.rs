//! `crossfade`: blends two sources by `mix`. At either end only one source is needed, so the
//! other may be missing or unready without holding up the render.

use reel_runtime::input::InputSpec;
use reel_runtime::soft::Fragment;
use reel_runtime::{Effect, EffectPlugin, InputValues, Options, ShaderSource, Value};

pub const HOOK: &str = "crossfade";

pub const FRAGMENT: &str = r#"#version 330 core
// reel: crossfade
in vec2 vTexCoord;
out vec4 fragColor;

uniform sampler2D sourceA;
uniform sampler2D sourceB;
uniform float mixAmount;

void main() {
    vec4 a = texture(sourceA, vTexCoord);
    vec4 b = texture(sourceB, vTexCoord);
    fragColor = mix(a, b, mixAmount);
}
"#;

pub(crate) fn kernel(f: &Fragment<'_>) -> [f32; 4] {
    let a = f.texel("sourceA");
    let b = f.texel("sourceB");
    let t = f.float("mixAmount");
    std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t)
}

#[derive(Debug, Default)]
pub struct Crossfade;

impl EffectPlugin for Crossfade {
    fn title(&self) -> &str {
        "Crossfade"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::image("a").uniform("sourceA"),
            InputSpec::image("b").uniform("sourceB"),
            InputSpec::number("mix")
                .default(0.0)
                .range(0.0, 1.0)
                .uniform("mixAmount")
                .update_sources(),
        ]
    }

    fn common_shader(&self) -> bool {
        true
    }

    fn create(&self, _options: &Options) -> Box<dyn Effect> {
        Box::new(CrossfadeEffect)
    }
}

#[derive(Debug)]
struct CrossfadeEffect;

fn mix_of(inputs: &InputValues) -> f64 {
    inputs.get("mix").and_then(Value::as_f64).unwrap_or(0.0)
}

impl Effect for CrossfadeEffect {
    fn shader(&self, _inputs: &InputValues, _base: ShaderSource) -> ShaderSource {
        ShaderSource::with_fragment(FRAGMENT)
    }

    fn requires(&self, input: &str, inputs: &InputValues) -> bool {
        let mix = mix_of(inputs);
        match input {
            "a" => mix < 1.0,
            "b" => mix > 0.0,
            _ => true,
        }
    }

    fn in_place(&self, _input: &str, _inputs: &InputValues) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn a_alone_is_enough_at_zero() {
        let mut engine = engine();
        let out = surface(&mut engine, 2, 2);
        let red = solid(&mut engine, 2, 2, [255, 0, 0, 255]);
        let fx = engine.effect(HOOK, Options::new()).unwrap();
        fx.set(&mut engine, "a", red).unwrap();
        out.set_source(&mut engine, fx).unwrap();
        assert!(out.is_ready(&engine));

        fx.set(&mut engine, "mix", 1.0).unwrap();
        assert!(!out.is_ready(&engine), "b is required once mix leaves zero");
    }

    #[test]
    fn halfway_blends_both_sources() {
        let mut engine = engine();
        let out = surface(&mut engine, 2, 2);
        let red = solid(&mut engine, 2, 2, [255, 0, 0, 255]);
        let blue = solid(&mut engine, 2, 2, [0, 0, 255, 255]);
        let fx = engine.effect(HOOK, Options::new()).unwrap();
        fx.set(&mut engine, "a", red).unwrap();
        fx.set(&mut engine, "b", blue).unwrap();
        fx.set(&mut engine, "mix", 0.5).unwrap();
        out.set_source(&mut engine, fx).unwrap();
        out.render(&mut engine).unwrap();

        let [r, g, b, a] = first_pixel(&mut engine, out);
        assert!((127..=128).contains(&r), "r = {r}");
        assert_eq!(g, 0);
        assert!((127..=128).contains(&b), "b = {b}");
        assert_eq!(a, 255);
    }
}
