//! The one routine that touches pipeline state.
//!
//! Every node render path ends here: bind target, viewport, blend/depth, clear, program,
//! geometry, uniforms (textures assigned to units in the order encountered), indexed draw.

use reel_core::EngineError;

use crate::gpu::{BlendEquation, BlendFactor, BlendState, FramebufferHandle, Gpu};
use crate::model::Model;
use crate::shader::{ShaderProgram, UniformValue, Uniforms};

/// Per-draw pipeline switches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawOptions {
    pub blend: bool,
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub equation: BlendEquation,
    pub depth: bool,
    pub clear: bool,
    pub clear_color: [f32; 4],
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self {
            blend: true,
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::OneMinusSrcAlpha,
            equation: BlendEquation::Add,
            depth: false,
            clear: true,
            clear_color: [0.0; 4],
        }
    }
}

impl DrawOptions {
    /// Blend factors for straight (non-premultiplied) alpha.
    pub fn straight_alpha() -> Self {
        Self {
            src_factor: BlendFactor::SrcAlpha,
            ..Self::default()
        }
    }

    fn blend_state(&self) -> Option<BlendState> {
        self.blend.then_some(BlendState {
            src: self.src_factor,
            dst: self.dst_factor,
            equation: self.equation,
        })
    }
}

/// Where a draw lands: a framebuffer (or the default one) and its pixel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawTarget {
    pub framebuffer: Option<FramebufferHandle>,
    pub width: u32,
    pub height: u32,
}

/// Draws `model` with `shader` into `target`.
///
/// `Node` uniforms must already be resolved to textures; unresolved ones are skipped, which
/// leaves the sampler on an empty unit.
pub fn draw(
    gpu: &mut dyn Gpu,
    shader: &ShaderProgram,
    model: &Model,
    uniforms: &Uniforms,
    target: DrawTarget,
    options: &DrawOptions,
) -> Result<(), EngineError> {
    let Some(buffers) = model.buffers() else {
        return Err(EngineError::other("model geometry has not been uploaded"));
    };
    if shader.is_destroyed() {
        return Err(EngineError::other("draw with a destroyed shader program"));
    }

    gpu.bind_framebuffer(target.framebuffer);
    gpu.viewport(0, 0, target.width, target.height);
    gpu.set_blend(options.blend_state());
    gpu.set_depth_test(options.depth);
    if options.clear {
        gpu.clear(options.clear_color, options.depth);
    }

    shader.use_program(gpu);
    if let Some(loc) = shader.attribute("position") {
        gpu.bind_attribute(loc, buffers.vertex, 3);
    }
    if let Some(loc) = shader.attribute("texCoord") {
        gpu.bind_attribute(loc, buffers.tex_coord, 2);
    }

    let limits = gpu.limits();
    let mut unit = 0u32;
    for (name, value) in uniforms {
        match value {
            UniformValue::Texture(texture) => {
                if shader.uniform(name).is_none() {
                    continue;
                }
                if unit >= limits.max_texture_units {
                    return Err(EngineError::other(format!(
                        "uniform '{name}': out of texture units ({})",
                        limits.max_texture_units
                    )));
                }
                gpu.bind_texture(unit, Some(*texture));
                shader.set(gpu, name, &UniformValue::Int(unit as i32))?;
                unit += 1;
            }
            UniformValue::Node(node) => {
                tracing::trace!(uniform = %name, %node, "unresolved node uniform skipped");
            }
            other => shader.set(gpu, name, other)?,
        }
    }

    gpu.draw_indexed(buffers.index, model.index_count());

    for u in 0..unit {
        gpu.bind_texture(u, None);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::{BASE_FRAGMENT, BASE_VERTEX};
    use crate::soft::SoftGpu;
    use crate::Framebuffer;
    use reel_core::Mat4;

    fn solid(gpu: &mut SoftGpu, rgba: [u8; 4], w: u32, h: u32) -> crate::gpu::TextureHandle {
        let t = gpu.create_texture().unwrap();
        let px: Vec<u8> = (0..w * h).flat_map(|_| rgba).collect();
        gpu.texture_image(t, w, h, Some(&px));
        t
    }

    #[test]
    fn base_shader_copies_a_texture() {
        let mut gpu = SoftGpu::new();
        let shader = ShaderProgram::new(&mut gpu, BASE_VERTEX, BASE_FRAGMENT).unwrap();
        let mut model = Model::rectangle();
        model.upload(&mut gpu).unwrap();
        let fb = Framebuffer::new(&mut gpu, 4, 4, None).unwrap();
        let src = solid(&mut gpu, [10, 20, 30, 255], 2, 2);

        let mut uniforms = Uniforms::new();
        uniforms.insert("source".into(), UniformValue::Texture(src));
        uniforms.insert("transform".into(), UniformValue::Mat4(Mat4::IDENTITY));
        uniforms.insert("resolution".into(), UniformValue::Floats(vec![4.0, 4.0]));
        let target = DrawTarget {
            framebuffer: Some(fb.handle()),
            width: 4,
            height: 4,
        };
        draw(&mut gpu, &shader, &model, &uniforms, target, &DrawOptions::default()).unwrap();

        let mut out = vec![0u8; 4 * 4 * 4];
        gpu.read_pixels(Some(fb.handle()), 0, 0, 4, 4, &mut out);
        assert!(out.chunks(4).all(|p| p == [10, 20, 30, 255]));
    }

    #[test]
    fn half_scale_transform_leaves_a_cleared_border() {
        let mut gpu = SoftGpu::new();
        let shader = ShaderProgram::new(&mut gpu, BASE_VERTEX, BASE_FRAGMENT).unwrap();
        let mut model = Model::rectangle();
        model.upload(&mut gpu).unwrap();
        let fb = Framebuffer::new(&mut gpu, 4, 4, None).unwrap();
        let src = solid(&mut gpu, [255, 255, 255, 255], 1, 1);

        let mut uniforms = Uniforms::new();
        uniforms.insert("source".into(), UniformValue::Texture(src));
        uniforms.insert(
            "transform".into(),
            UniformValue::Mat4(Mat4::scaling(0.5, 0.5, 1.0)),
        );
        uniforms.insert("resolution".into(), UniformValue::Floats(vec![4.0, 4.0]));
        let target = DrawTarget {
            framebuffer: Some(fb.handle()),
            width: 4,
            height: 4,
        };
        draw(&mut gpu, &shader, &model, &uniforms, target, &DrawOptions::default()).unwrap();

        let mut out = vec![0u8; 4 * 4 * 4];
        gpu.read_pixels(Some(fb.handle()), 0, 0, 4, 4, &mut out);
        let at = |x: usize, y: usize| &out[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(at(0, 0), [0, 0, 0, 0]);
        assert_eq!(at(1, 1), [255, 255, 255, 255]);
        assert_eq!(at(2, 2), [255, 255, 255, 255]);
        assert_eq!(at(3, 3), [0, 0, 0, 0]);
    }

    #[test]
    fn missing_upload_is_an_error() {
        let mut gpu = SoftGpu::new();
        let shader = ShaderProgram::new(&mut gpu, BASE_VERTEX, BASE_FRAGMENT).unwrap();
        let model = Model::rectangle();
        let target = DrawTarget {
            framebuffer: None,
            width: 1,
            height: 1,
        };
        let err = draw(
            &mut gpu,
            &shader,
            &model,
            &Uniforms::new(),
            target,
            &DrawOptions::default(),
        );
        assert!(err.is_err());
    }
}
