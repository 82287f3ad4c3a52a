//! `color`: fills its frame with one color. A generator with no image input.

use reel_runtime::input::InputSpec;
use reel_runtime::soft::Fragment;
use reel_runtime::{Effect, EffectPlugin, InputValues, Options, ShaderSource};

pub const HOOK: &str = "color";

pub const FRAGMENT: &str = r#"#version 330 core
// reel: color
out vec4 fragColor;

uniform vec4 color;

void main() {
    fragColor = color;
}
"#;

pub(crate) fn kernel(f: &Fragment<'_>) -> [f32; 4] {
    f.vec4("color")
}

#[derive(Debug, Default)]
pub struct Color;

impl EffectPlugin for Color {
    fn title(&self) -> &str {
        "Color"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::color("color").default([0.0_f32, 0.0, 0.0, 1.0]),
            InputSpec::number("width").default(640.0).range(1.0, 16384.0).step(1.0),
            InputSpec::number("height").default(480.0).range(1.0, 16384.0).step(1.0),
        ]
    }

    fn common_shader(&self) -> bool {
        true
    }

    fn create(&self, _options: &Options) -> Box<dyn Effect> {
        Box::new(ColorEffect)
    }
}

#[derive(Debug)]
struct ColorEffect;

impl Effect for ColorEffect {
    fn shader(&self, _inputs: &InputValues, _base: ShaderSource) -> ShaderSource {
        ShaderSource::with_fragment(FRAGMENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use reel_runtime::Value;

    #[test]
    fn fills_the_target_and_sizes_from_its_inputs() {
        let mut engine = engine();
        let out = surface(&mut engine, 2, 2);
        let fx = engine.effect(HOOK, Options::new()).unwrap();
        fx.set(&mut engine, "color", "#00ff00").unwrap();
        fx.set(&mut engine, "width", 8.0).unwrap();
        fx.set(&mut engine, "height", 4.0).unwrap();
        assert_eq!(engine.size(fx).unwrap(), (8, 4));

        out.set_source(&mut engine, fx).unwrap();
        out.render(&mut engine).unwrap();
        assert_eq!(first_pixel(&mut engine, out), [0, 255, 0, 255]);
    }

    #[test]
    fn css_colors_are_parsed_on_write() {
        let mut engine = engine();
        let fx = engine.effect(HOOK, Options::new()).unwrap();
        let stored = fx.set(&mut engine, "color", "red").unwrap();
        assert_eq!(stored, Value::Color([1.0, 0.0, 0.0, 1.0]));
    }
}
