//! `invert`: flips the color channels of its source, leaving alpha.

use reel_runtime::input::InputSpec;
use reel_runtime::soft::Fragment;
use reel_runtime::{Effect, EffectPlugin, InputValues, Options, ShaderSource};

pub const HOOK: &str = "invert";

pub const FRAGMENT: &str = r#"#version 330 core
// reel: invert
in vec2 vTexCoord;
out vec4 fragColor;

uniform sampler2D source;
uniform float amount;

void main() {
    vec4 c = texture(source, vTexCoord);
    fragColor = vec4(mix(c.rgb, 1.0 - c.rgb, amount), c.a);
}
"#;

pub(crate) fn kernel(f: &Fragment<'_>) -> [f32; 4] {
    let c = f.texel("source");
    let t = f.float("amount");
    let flip = |x: f32| x + (1.0 - 2.0 * x) * t;
    [flip(c[0]), flip(c[1]), flip(c[2]), c[3]]
}

#[derive(Debug, Default)]
pub struct Invert;

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

    fn common_shader(&self) -> bool {
        true
    }

    fn create(&self, _options: &Options) -> Box<dyn Effect> {
        Box::new(InvertEffect)
    }
}

#[derive(Debug)]
struct InvertEffect;

impl Effect for InvertEffect {
    fn shader(&self, _inputs: &InputValues, _base: ShaderSource) -> ShaderSource {
        ShaderSource::with_fragment(FRAGMENT)
    }

    fn in_place(&self, _input: &str, _inputs: &InputValues) -> bool {
        true
    }
}
