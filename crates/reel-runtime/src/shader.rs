use std::collections::BTreeMap;

use reel_core::{EngineError, Mat4};
use reel_graph::NodeId;

use crate::gpu::{Gpu, GlslType, ProgramHandle, ShaderStage, TextureHandle, UniformData};

/// A value bound to a named uniform at draw time.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Floats(Vec<f32>),
    Int(i32),
    Bool(bool),
    Mat4(Mat4),
    /// Bound to the next free texture unit by the draw primitive.
    Texture(TextureHandle),
    /// A graph node whose output texture is looked up right before drawing.
    Node(NodeId),
}

pub type Uniforms = BTreeMap<String, UniformValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformInfo {
    pub location: u32,
    pub ty: GlslType,
    pub size: i32,
}

/// A linked program plus its introspected uniform and attribute tables.
#[derive(Debug)]
pub struct ShaderProgram {
    program: Option<ProgramHandle>,
    uniforms: BTreeMap<String, UniformInfo>,
    attributes: BTreeMap<String, u32>,
}

impl ShaderProgram {
    /// Compiles and links `vertex` + `fragment`.
    ///
    /// Compile failures carry the backend log, the numbered source and the device limits.
    pub fn new(gpu: &mut dyn Gpu, vertex: &str, fragment: &str) -> Result<Self, EngineError> {
        let vs = gpu
            .compile_shader(ShaderStage::Vertex, vertex)
            .map_err(|log| EngineError::VertexCompile(diagnostic(&*gpu, &log, vertex)))?;

        let fs = match gpu.compile_shader(ShaderStage::Fragment, fragment) {
            Ok(fs) => fs,
            Err(log) => {
                gpu.delete_shader(vs);
                return Err(EngineError::FragmentCompile(diagnostic(&*gpu, &log, fragment)));
            }
        };

        let linked = gpu.link_program(vs, fs);
        gpu.delete_shader(vs);
        gpu.delete_shader(fs);
        let program = linked
            .map_err(|log| EngineError::Link(format!("{log}\n{}", gpu.limits().describe())))?;

        let uniforms = gpu
            .active_uniforms(program)
            .into_iter()
            .map(|u| {
                // GL reports arrays as "name[0]".
                let name = u.name.trim_end_matches("[0]").to_string();
                (
                    name,
                    UniformInfo {
                        location: u.location,
                        ty: u.ty,
                        size: u.size,
                    },
                )
            })
            .collect();
        let attributes = gpu
            .active_attributes(program)
            .into_iter()
            .map(|a| (a.name, a.location))
            .collect();

        tracing::debug!(?program, "shader program linked");
        Ok(Self {
            program: Some(program),
            uniforms,
            attributes,
        })
    }

    pub fn program(&self) -> Option<ProgramHandle> {
        self.program
    }

    pub fn is_destroyed(&self) -> bool {
        self.program.is_none()
    }

    pub fn use_program(&self, gpu: &mut dyn Gpu) {
        gpu.use_program(self.program);
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.get(name)
    }

    pub fn uniforms(&self) -> impl Iterator<Item = (&str, &UniformInfo)> {
        self.uniforms.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn attribute(&self, name: &str) -> Option<u32> {
        self.attributes.get(name).copied()
    }

    /// Sets a uniform by name, converting `value` to the declared type.
    ///
    /// Unknown names are ignored (the uniform may have been optimized out). Texture and node
    /// values must be resolved to a unit by the caller.
    pub fn set(&self, gpu: &mut dyn Gpu, name: &str, value: &UniformValue) -> Result<(), EngineError> {
        let (Some(program), Some(info)) = (self.program, self.uniforms.get(name)) else {
            return Ok(());
        };
        let data = uniform_data(info, value)
            .map_err(|msg| EngineError::other(format!("uniform '{name}': {msg}")))?;
        gpu.set_uniform(program, info.location, info.ty, &data);
        Ok(())
    }

    pub fn get(&self, gpu: &mut dyn Gpu, name: &str) -> Option<UniformData> {
        let program = self.program?;
        let info = self.uniforms.get(name)?;
        gpu.get_uniform(program, info.location, info.ty)
    }

    pub fn destroy(&mut self, gpu: &mut dyn Gpu) {
        if let Some(program) = self.program.take() {
            gpu.delete_program(program);
        }
        self.uniforms.clear();
        self.attributes.clear();
    }

    /// Drops the handle without touching the device (its context is gone).
    pub fn forget(&mut self) {
        self.program = None;
        self.uniforms.clear();
        self.attributes.clear();
    }
}

fn uniform_data(info: &UniformInfo, value: &UniformValue) -> Result<UniformData, String> {
    let comps = info.ty.components();
    let max = comps * info.size.max(1) as usize;

    let floats: Vec<f32> = match value {
        UniformValue::Float(f) => vec![*f],
        UniformValue::Floats(v) => v.clone(),
        UniformValue::Int(i) => vec![*i as f32],
        UniformValue::Bool(b) => vec![if *b { 1.0 } else { 0.0 }],
        UniformValue::Mat4(m) => m.0.to_vec(),
        UniformValue::Texture(_) | UniformValue::Node(_) => {
            return Err("texture values must be bound to a unit first".into())
        }
    };
    if floats.len() < comps {
        return Err(format!(
            "expected {comps} components for {:?}, got {}",
            info.ty,
            floats.len()
        ));
    }
    let mut floats = floats;
    floats.truncate(max);

    Ok(if info.ty.is_matrix() {
        UniformData::Matrix(floats)
    } else if info.ty.is_integer() {
        UniformData::Int(floats.into_iter().map(|f| f.round() as i32).collect())
    } else {
        UniformData::Float(floats)
    })
}

fn diagnostic(gpu: &dyn Gpu, log: &str, source: &str) -> String {
    let mut out = String::new();
    out.push_str(log.trim_end());
    out.push('\n');
    for (i, line) in source.lines().enumerate() {
        out.push_str(&format!("{:>4}: {line}\n", i + 1));
    }
    out.push_str(&gpu.limits().describe());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::{BASE_FRAGMENT, BASE_VERTEX};
    use crate::soft::SoftGpu;

    #[test]
    fn base_program_exposes_its_uniforms_and_attributes() {
        let mut gpu = SoftGpu::new();
        let p = ShaderProgram::new(&mut gpu, BASE_VERTEX, BASE_FRAGMENT).unwrap();
        assert_eq!(p.uniform("transform").unwrap().ty, GlslType::Mat4);
        assert_eq!(p.uniform("resolution").unwrap().ty, GlslType::Vec2);
        assert_eq!(p.uniform("source").unwrap().ty, GlslType::Sampler2D);
        assert!(p.attribute("position").is_some());
        assert!(p.attribute("texCoord").is_some());
    }

    #[test]
    fn typed_set_then_get() {
        let mut gpu = SoftGpu::new();
        let p = ShaderProgram::new(&mut gpu, BASE_VERTEX, BASE_FRAGMENT).unwrap();
        p.set(&mut gpu, "resolution", &UniformValue::Floats(vec![4.0, 2.0]))
            .unwrap();
        assert_eq!(
            p.get(&mut gpu, "resolution"),
            Some(UniformData::Float(vec![4.0, 2.0]))
        );
        // unknown uniforms are ignored
        p.set(&mut gpu, "nope", &UniformValue::Float(1.0)).unwrap();
        // too few components is an error
        assert!(p.set(&mut gpu, "transform", &UniformValue::Float(1.0)).is_err());
    }

    #[test]
    fn fragment_failure_is_annotated() {
        let mut gpu = SoftGpu::new();
        let bad = "#version 330 core\nvoid main() { oops }\n";
        let msg = match ShaderProgram::new(&mut gpu, BASE_VERTEX, bad) {
            Err(EngineError::FragmentCompile(msg)) => msg,
            other => panic!("expected a fragment compile error, got {other:?}"),
        };
        assert!(msg.contains("   2: void main() { oops }"));
        assert!(msg.contains("MAX_TEXTURE_IMAGE_UNITS"));
    }

    #[test]
    fn destroy_releases_the_program() {
        let mut gpu = SoftGpu::new();
        let mut p = ShaderProgram::new(&mut gpu, BASE_VERTEX, BASE_FRAGMENT).unwrap();
        assert_eq!(gpu.stats().live_programs, 1);
        p.destroy(&mut gpu);
        assert!(p.is_destroyed());
        assert_eq!(gpu.stats().live_programs, 0);
        p.destroy(&mut gpu);
        assert_eq!(gpu.stats().live_programs, 0);
    }
}
