use reel_core::EngineError;

use crate::gpu::{FramebufferHandle, Gpu, RenderbufferHandle, TextureHandle};

/// Offscreen render target: color texture + depth renderbuffer.
///
/// When built around a caller-supplied texture the framebuffer does not own it and will
/// neither reallocate nor delete it.
#[derive(Debug)]
pub struct Framebuffer {
    framebuffer: FramebufferHandle,
    texture: TextureHandle,
    renderbuffer: RenderbufferHandle,
    width: u32,
    height: u32,
    owns_texture: bool,
    destroyed: bool,
}

impl Framebuffer {
    pub fn new(
        gpu: &mut dyn Gpu,
        width: u32,
        height: u32,
        texture: Option<TextureHandle>,
    ) -> Result<Self, EngineError> {
        let w = width.max(1);
        let h = height.max(1);

        let owns_texture = texture.is_none();
        let texture = match texture {
            Some(t) => t,
            None => {
                let t = gpu.create_texture()?;
                gpu.texture_image(t, w, h, None);
                t
            }
        };

        let renderbuffer = match gpu.create_renderbuffer() {
            Ok(rb) => rb,
            Err(e) => {
                if owns_texture {
                    gpu.delete_texture(texture);
                }
                return Err(e);
            }
        };
        gpu.renderbuffer_storage(renderbuffer, w, h);

        let framebuffer = match gpu.create_framebuffer(texture, Some(renderbuffer)) {
            Ok(fb) => fb,
            Err(e) => {
                gpu.delete_renderbuffer(renderbuffer);
                if owns_texture {
                    gpu.delete_texture(texture);
                }
                return Err(e);
            }
        };

        let status = gpu.framebuffer_status(framebuffer);
        if !status.is_complete() {
            gpu.delete_framebuffer(framebuffer);
            gpu.delete_renderbuffer(renderbuffer);
            if owns_texture {
                gpu.delete_texture(texture);
            }
            return Err(EngineError::FramebufferIncomplete(status.reason()));
        }

        Ok(Self {
            framebuffer,
            texture,
            renderbuffer,
            width: w,
            height: h,
            owns_texture,
            destroyed: false,
        })
    }

    pub fn handle(&self) -> FramebufferHandle {
        self.framebuffer
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn owns_texture(&self) -> bool {
        self.owns_texture
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Reallocates storage for a new size. Same handles; no-op when the size is unchanged.
    pub fn resize(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) {
        let w = width.max(1);
        let h = height.max(1);
        if self.destroyed || (w == self.width && h == self.height) {
            return;
        }
        self.width = w;
        self.height = h;
        if self.owns_texture {
            gpu.texture_image(self.texture, w, h, None);
        }
        gpu.renderbuffer_storage(self.renderbuffer, w, h);
    }

    pub fn destroy(&mut self, gpu: &mut dyn Gpu) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        gpu.delete_framebuffer(self.framebuffer);
        gpu.delete_renderbuffer(self.renderbuffer);
        if self.owns_texture {
            gpu.delete_texture(self.texture);
        }
    }

    /// Marks the handles dead without device calls (context lost).
    pub fn forget(&mut self) {
        self.destroyed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftGpu;

    #[test]
    fn resize_to_same_size_allocates_nothing() {
        let mut gpu = SoftGpu::new();
        let mut fb = Framebuffer::new(&mut gpu, 8, 4, None).unwrap();
        let before = gpu.stats();
        fb.resize(&mut gpu, 8, 4);
        let after = gpu.stats();
        assert_eq!(before.texture_image_calls, after.texture_image_calls);
        assert_eq!(before.renderbuffer_storage_calls, after.renderbuffer_storage_calls);

        fb.resize(&mut gpu, 16, 4);
        assert_eq!(gpu.stats().texture_image_calls, after.texture_image_calls + 1);
        assert_eq!(fb.size(), (16, 4));
    }

    #[test]
    fn borrowed_texture_survives_destroy() {
        let mut gpu = SoftGpu::new();
        let tex = gpu.create_texture().unwrap();
        gpu.texture_image(tex, 2, 2, None);
        let mut fb = Framebuffer::new(&mut gpu, 2, 2, Some(tex)).unwrap();
        assert!(!fb.owns_texture());
        fb.destroy(&mut gpu);
        fb.destroy(&mut gpu);
        assert!(gpu.has_texture(tex));
    }

    #[test]
    fn zero_size_is_clamped() {
        let mut gpu = SoftGpu::new();
        let fb = Framebuffer::new(&mut gpu, 0, 0, None).unwrap();
        assert_eq!(fb.size(), (1, 1));
    }
}
