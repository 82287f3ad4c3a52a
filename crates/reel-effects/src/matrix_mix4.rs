//! `matrix-mix4`: weighted sum of four sources.
//!
//! The `preset` input picks one of the named weight sets; picking one rewrites `weights`.
//! Writing `weights` directly leaves `preset` as it was.

use reel_runtime::input::InputSpec;
use reel_runtime::soft::Fragment;
use reel_runtime::{Effect, EffectPlugin, GpuLimits, InputValues, Options, ShaderSource, Value};

pub const HOOK: &str = "matrix-mix4";

pub const FRAGMENT: &str = r#"#version 330 core
// reel: matrix-mix4
in vec2 vTexCoord;
out vec4 fragColor;

uniform sampler2D input0;
uniform sampler2D input1;
uniform sampler2D input2;
uniform sampler2D input3;
uniform vec4 weights;

void main() {
    vec4 a = texture(input0, vTexCoord);
    vec4 b = texture(input1, vTexCoord);
    vec4 c = texture(input2, vTexCoord);
    vec4 d = texture(input3, vTexCoord);
    fragColor = a * weights.x + b * weights.y + c * weights.z + d * weights.w;
}
"#;

const INPUTS: [&str; 4] = ["input0", "input1", "input2", "input3"];

pub(crate) fn kernel(f: &Fragment<'_>) -> [f32; 4] {
    let w = f.vec4("weights");
    let mut out = [0.0; 4];
    for (name, weight) in INPUTS.iter().zip(w) {
        if weight == 0.0 {
            continue;
        }
        for (o, c) in out.iter_mut().zip(f.texel(name)) {
            *o += c * weight;
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixPreset {
    Solo0,
    Solo1,
    Solo2,
    Solo3,
    /// Equal weights across all 4 inputs.
    Quad,
    /// A/B split (0,1) vs (2,3).
    Sum01,
    Sum23,
}

impl MatrixPreset {
    pub const ALL: [MatrixPreset; 7] = [
        MatrixPreset::Solo0,
        MatrixPreset::Solo1,
        MatrixPreset::Solo2,
        MatrixPreset::Solo3,
        MatrixPreset::Quad,
        MatrixPreset::Sum01,
        MatrixPreset::Sum23,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MatrixPreset::Solo0 => "solo0",
            MatrixPreset::Solo1 => "solo1",
            MatrixPreset::Solo2 => "solo2",
            MatrixPreset::Solo3 => "solo3",
            MatrixPreset::Quad => "quad",
            MatrixPreset::Sum01 => "sum01",
            MatrixPreset::Sum23 => "sum23",
        }
    }

    pub fn from_name(name: &str) -> Option<MatrixPreset> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn weights(self) -> [f64; 4] {
        match self {
            MatrixPreset::Solo0 => [1.0, 0.0, 0.0, 0.0],
            MatrixPreset::Solo1 => [0.0, 1.0, 0.0, 0.0],
            MatrixPreset::Solo2 => [0.0, 0.0, 1.0, 0.0],
            MatrixPreset::Solo3 => [0.0, 0.0, 0.0, 1.0],
            MatrixPreset::Quad => [0.25, 0.25, 0.25, 0.25],
            MatrixPreset::Sum01 => [0.5, 0.5, 0.0, 0.0],
            MatrixPreset::Sum23 => [0.0, 0.0, 0.5, 0.5],
        }
    }
}

#[derive(Debug, Default)]
pub struct MatrixMix4;

impl EffectPlugin for MatrixMix4 {
    fn title(&self) -> &str {
        "Matrix Mix 4"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        let presets: Vec<(&str, &str)> = MatrixPreset::ALL.iter().map(|p| (p.name(), p.name())).collect();
        let mut v: Vec<InputSpec> = INPUTS.iter().map(|n| InputSpec::image(*n)).collect();
        v.push(
            InputSpec::vector("weights", 4)
                .default(MatrixPreset::Solo0.weights().to_vec())
                .range(0.0, 1.0)
                .update_sources(),
        );
        v.push(InputSpec::enumeration("preset", &presets).update_sources());
        v
    }

    fn common_shader(&self) -> bool {
        true
    }

    fn compatible(&self, limits: &GpuLimits) -> Result<(), String> {
        if limits.max_texture_units < 4 {
            return Err(format!(
                "needs 4 texture units, context has {}",
                limits.max_texture_units
            ));
        }
        Ok(())
    }

    fn create(&self, _options: &Options) -> Box<dyn Effect> {
        Box::new(MatrixMix4Effect)
    }
}

#[derive(Debug)]
struct MatrixMix4Effect;

fn weight(inputs: &InputValues, index: usize) -> f64 {
    inputs
        .get("weights")
        .and_then(Value::as_vector)
        .and_then(|w| w.get(index).copied())
        .unwrap_or(0.0)
}

impl Effect for MatrixMix4Effect {
    fn shader(&self, _inputs: &InputValues, _base: ShaderSource) -> ShaderSource {
        ShaderSource::with_fragment(FRAGMENT)
    }

    /// An input with zero weight contributes nothing and need not be ready.
    fn requires(&self, input: &str, inputs: &InputValues) -> bool {
        match INPUTS.iter().position(|n| *n == input) {
            Some(i) => weight(inputs, i) > 0.0,
            None => true,
        }
    }

    fn in_place(&self, _input: &str, _inputs: &InputValues) -> bool {
        true
    }

    fn update(&mut self, input: &str, inputs: &mut InputValues) {
        if input != "preset" {
            return;
        }
        let Some(preset) = inputs
            .get("preset")
            .and_then(Value::as_str)
            .and_then(MatrixPreset::from_name)
        else {
            return;
        };
        tracing::debug!(preset = preset.name(), "matrix-mix4 preset applied");
        inputs.insert("weights".into(), Value::Vector(preset.weights().to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn preset_names_round_trip() {
        for p in MatrixPreset::ALL {
            assert_eq!(MatrixPreset::from_name(p.name()), Some(p));
        }
        assert_eq!(MatrixPreset::from_name("solo4"), None);
    }

    #[test]
    fn weights_sum_to_one() {
        for p in MatrixPreset::ALL {
            let sum: f64 = p.weights().iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "{p:?}");
        }
    }

    #[test]
    fn choosing_a_preset_rewrites_weights() {
        let mut engine = engine();
        let fx = engine.effect(HOOK, Options::new()).unwrap();
        fx.set(&mut engine, "preset", "sum23").unwrap();
        assert_eq!(
            fx.get(&engine, "weights").unwrap(),
            Value::Vector(vec![0.0, 0.0, 0.5, 0.5])
        );
    }

    #[test]
    fn solo_preset_only_needs_its_input() {
        let mut engine = engine();
        let out = surface(&mut engine, 2, 2);
        let green = solid(&mut engine, 2, 2, [0, 255, 0, 255]);
        let fx = engine.effect(HOOK, Options::new()).unwrap();
        fx.set(&mut engine, "preset", "solo2").unwrap();
        fx.set(&mut engine, "input2", green).unwrap();
        out.set_source(&mut engine, fx).unwrap();
        assert!(out.is_ready(&engine));

        out.render(&mut engine).unwrap();
        assert_eq!(first_pixel(&mut engine, out), [0, 255, 0, 255]);
    }

    #[test]
    fn refuses_contexts_with_too_few_units() {
        let limits = GpuLimits {
            renderer: "tiny".into(),
            max_texture_size: 256,
            max_texture_units: 2,
            max_vertex_uniform_vectors: 16,
            max_fragment_uniform_vectors: 16,
            max_varying_vectors: 8,
        };
        assert!(MatrixMix4.compatible(&limits).is_err());
    }
}
