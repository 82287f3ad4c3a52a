//! Built-in target hooks: `surface`, `texture`, `framebuffer`.

use std::sync::Arc;

use reel_core::EngineError;

use crate::framebuffer::Framebuffer;
use crate::gpu::{FramebufferHandle, Gpu, TextureHandle};
use crate::media::{RawTarget, SurfaceId};
use crate::plugin::{Options, Registry, Target, TargetPlugin};

pub(crate) fn register_builtins(r: &Registry) {
    r.register_target("surface", Arc::new(SurfacePlugin));
    r.register_target("texture", Arc::new(TextureTargetPlugin));
    r.register_target("framebuffer", Arc::new(FramebufferTargetPlugin));
}

fn size_option(options: &Options, name: &str) -> Option<u32> {
    options
        .get(name)
        .and_then(|v| v.as_f64())
        .filter(|n| *n >= 1.0)
        .map(|n| n as u32)
}

// ---- surface ----

struct SurfacePlugin;

impl TargetPlugin for SurfacePlugin {
    fn title(&self) -> &str {
        "Surface"
    }

    fn create(&self, raw: &mut RawTarget, options: &Options, _forced: bool) -> Option<Box<dyn Target>> {
        let RawTarget::Surface(surface) = raw else {
            return None;
        };
        Some(Box::new(SurfaceTarget {
            id: surface.id,
            width: size_option(options, "width").unwrap_or(surface.width),
            height: size_option(options, "height").unwrap_or(surface.height),
            context: surface.context.take(),
        }))
    }
}

struct SurfaceTarget {
    id: SurfaceId,
    width: u32,
    height: u32,
    context: Option<Box<dyn Gpu>>,
}

impl Target for SurfaceTarget {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn set_size(&mut self, width: u32, height: u32) -> bool {
        self.width = width.max(1);
        self.height = height.max(1);
        true
    }

    fn surface(&self) -> Option<SurfaceId> {
        Some(self.id)
    }

    fn take_context(&mut self) -> Option<Box<dyn Gpu>> {
        self.context.take()
    }

    fn destination(&self) -> Option<FramebufferHandle> {
        None
    }

    fn compare(&self, raw: &RawTarget) -> bool {
        matches!(raw, RawTarget::Surface(s) if s.id == self.id)
    }
}

// ---- texture ----

struct TextureTargetPlugin;

impl TargetPlugin for TextureTargetPlugin {
    fn title(&self) -> &str {
        "Texture"
    }

    fn create(&self, raw: &mut RawTarget, _options: &Options, _forced: bool) -> Option<Box<dyn Target>> {
        let RawTarget::Texture {
            texture,
            width,
            height,
        } = raw
        else {
            return None;
        };
        Some(Box::new(TextureTarget {
            texture: *texture,
            width: *width,
            height: *height,
            framebuffer: None,
        }))
    }
}

/// Draws into a caller-owned texture through a framebuffer that borrows it.
struct TextureTarget {
    texture: TextureHandle,
    width: u32,
    height: u32,
    framebuffer: Option<Framebuffer>,
}

impl Target for TextureTarget {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn prepare(&mut self, gpu: &mut dyn Gpu) -> Result<(), EngineError> {
        if self.framebuffer.is_none() {
            self.framebuffer = Some(Framebuffer::new(
                gpu,
                self.width,
                self.height,
                Some(self.texture),
            )?);
        }
        Ok(())
    }

    fn destination(&self) -> Option<FramebufferHandle> {
        self.framebuffer.as_ref().map(Framebuffer::handle)
    }

    fn compare(&self, raw: &RawTarget) -> bool {
        matches!(raw, RawTarget::Texture { texture, .. } if *texture == self.texture)
    }

    fn lose_context(&mut self) {
        if let Some(mut fb) = self.framebuffer.take() {
            fb.forget();
        }
    }

    fn destroy(&mut self, gpu: Option<&mut dyn Gpu>) {
        if let Some(mut fb) = self.framebuffer.take() {
            match gpu {
                Some(gpu) => fb.destroy(gpu),
                None => fb.forget(),
            }
        }
    }
}

// ---- framebuffer ----

struct FramebufferTargetPlugin;

impl TargetPlugin for FramebufferTargetPlugin {
    fn title(&self) -> &str {
        "Framebuffer"
    }

    fn create(&self, raw: &mut RawTarget, _options: &Options, _forced: bool) -> Option<Box<dyn Target>> {
        let RawTarget::Framebuffer {
            framebuffer,
            width,
            height,
        } = raw
        else {
            return None;
        };
        Some(Box::new(FramebufferTarget {
            framebuffer: *framebuffer,
            width: *width,
            height: *height,
        }))
    }
}

struct FramebufferTarget {
    framebuffer: FramebufferHandle,
    width: u32,
    height: u32,
}

impl Target for FramebufferTarget {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn destination(&self) -> Option<FramebufferHandle> {
        Some(self.framebuffer)
    }

    fn compare(&self, raw: &RawTarget) -> bool {
        matches!(raw, RawTarget::Framebuffer { framebuffer, .. } if *framebuffer == self.framebuffer)
    }
}
