//! Built-in source hooks: `image`, `canvas`, `video`, `texture`.
//!
//! Media arrives top row first; textures are stored bottom row first. With the `flip`
//! option (default on) rows are reversed during upload so the picture lands upright.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use image::RgbaImage;

use crate::gpu::{Gpu, TextureHandle};
use crate::media::{PixelProvider, RawSource, SourceError};
use crate::plugin::{Options, Registry, Source, SourcePlugin};

pub(crate) fn register_builtins(r: &Registry) {
    r.register_source("image", Arc::new(ImagePlugin));
    r.register_source("canvas", Arc::new(CanvasPlugin));
    r.register_source("video", Arc::new(VideoPlugin));
    r.register_source("texture", Arc::new(TexturePlugin));
}

fn flip_option(options: &Options) -> bool {
    options.get("flip").map(|v| v.truthy()).unwrap_or(true)
}

/// Reverses row order of a tightly packed RGBA8 buffer.
pub fn flip_rows(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let row = width as usize * 4;
    let mut out = Vec::with_capacity(pixels.len());
    for y in (0..height as usize).rev() {
        out.extend_from_slice(&pixels[y * row..(y + 1) * row]);
    }
    out
}

fn upload(
    gpu: &mut dyn Gpu,
    texture: TextureHandle,
    width: u32,
    height: u32,
    pixels: &[u8],
    flip: bool,
) -> Result<(), SourceError> {
    let want = width as usize * height as usize * 4;
    if pixels.len() != want {
        return Err(SourceError::Other(format!(
            "frame is {} bytes, expected {want} for {width}x{height}",
            pixels.len()
        )));
    }
    if flip {
        gpu.texture_image(texture, width, height, Some(&flip_rows(pixels, width, height)));
    } else {
        gpu.texture_image(texture, width, height, Some(pixels));
    }
    Ok(())
}

// ---- image ----

struct ImagePlugin;

impl SourcePlugin for ImagePlugin {
    fn title(&self) -> &str {
        "Image"
    }

    fn create(&self, raw: &RawSource, options: &Options, _forced: bool) -> Option<Box<dyn Source>> {
        let RawSource::Image(image) = raw else {
            return None;
        };
        Some(Box::new(ImageSource {
            image: image.clone(),
            flip: flip_option(options),
        }))
    }
}

struct ImageSource {
    image: Arc<RgbaImage>,
    flip: bool,
}

impl Source for ImageSource {
    fn size(&self) -> Option<(u32, u32)> {
        Some(self.image.dimensions())
    }

    fn compare(&self, raw: &RawSource) -> bool {
        matches!(raw, RawSource::Image(i) if Arc::ptr_eq(i, &self.image))
    }

    fn render(&mut self, gpu: &mut dyn Gpu, texture: TextureHandle) -> Result<bool, SourceError> {
        let (w, h) = self.image.dimensions();
        upload(gpu, texture, w, h, self.image.as_raw(), self.flip)?;
        Ok(true)
    }
}

// ---- canvas ----

struct CanvasPlugin;

impl SourcePlugin for CanvasPlugin {
    fn title(&self) -> &str {
        "Canvas"
    }

    fn create(&self, raw: &RawSource, options: &Options, _forced: bool) -> Option<Box<dyn Source>> {
        let RawSource::Canvas(canvas) = raw else {
            return None;
        };
        Some(Box::new(CanvasSource {
            canvas: canvas.clone(),
            flip: flip_option(options),
        }))
    }
}

struct CanvasSource {
    canvas: Rc<RefCell<RgbaImage>>,
    flip: bool,
}

impl Source for CanvasSource {
    fn size(&self) -> Option<(u32, u32)> {
        self.canvas.try_borrow().ok().map(|c| c.dimensions())
    }

    fn compare(&self, raw: &RawSource) -> bool {
        matches!(raw, RawSource::Canvas(c) if Rc::ptr_eq(c, &self.canvas))
    }

    fn render(&mut self, gpu: &mut dyn Gpu, texture: TextureHandle) -> Result<bool, SourceError> {
        let canvas = self
            .canvas
            .try_borrow()
            .map_err(|_| SourceError::NotReady)?;
        let (w, h) = canvas.dimensions();
        upload(gpu, texture, w, h, canvas.as_raw(), self.flip)?;
        Ok(true)
    }
}

// ---- video ----

struct VideoPlugin;

impl SourcePlugin for VideoPlugin {
    fn title(&self) -> &str {
        "Video"
    }

    fn create(&self, raw: &RawSource, options: &Options, _forced: bool) -> Option<Box<dyn Source>> {
        let RawSource::Media(media) = raw else {
            return None;
        };
        Some(Box::new(VideoSource {
            media: media.clone(),
            flip: flip_option(options),
            uploaded: None,
        }))
    }
}

struct VideoSource {
    media: Rc<dyn PixelProvider>,
    flip: bool,
    /// Frame version last uploaded.
    uploaded: Option<u64>,
}

impl Source for VideoSource {
    fn size(&self) -> Option<(u32, u32)> {
        self.media.size()
    }

    fn loaded(&self) -> bool {
        self.media.loaded()
    }

    fn compare(&self, raw: &RawSource) -> bool {
        matches!(raw, RawSource::Media(m) if std::ptr::addr_eq(Rc::as_ptr(m), Rc::as_ptr(&self.media)))
    }

    fn check_dirty(&self) -> bool {
        self.media.loaded() && self.uploaded != Some(self.media.version())
    }

    fn render(&mut self, gpu: &mut dyn Gpu, texture: TextureHandle) -> Result<bool, SourceError> {
        let Some((w, h)) = self.media.size() else {
            return Err(SourceError::NotReady);
        };
        let version = self.media.version();
        let frame = self.media.frame()?;
        upload(gpu, texture, w, h, &frame, self.flip)?;
        self.uploaded = Some(version);
        Ok(true)
    }

    fn lose_context(&mut self) {
        self.uploaded = None;
    }
}

// ---- texture ----

struct TexturePlugin;

impl SourcePlugin for TexturePlugin {
    fn title(&self) -> &str {
        "Texture"
    }

    fn create(&self, raw: &RawSource, _options: &Options, _forced: bool) -> Option<Box<dyn Source>> {
        let RawSource::Texture {
            texture,
            width,
            height,
        } = raw
        else {
            return None;
        };
        Some(Box::new(TextureSource {
            texture: *texture,
            width: *width,
            height: *height,
        }))
    }
}

struct TextureSource {
    texture: TextureHandle,
    width: u32,
    height: u32,
}

impl Source for TextureSource {
    fn size(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn external_texture(&self) -> Option<TextureHandle> {
        Some(self.texture)
    }

    fn compare(&self, raw: &RawSource) -> bool {
        matches!(raw, RawSource::Texture { texture, .. } if *texture == self.texture)
    }

    fn render(&mut self, _gpu: &mut dyn Gpu, _texture: TextureHandle) -> Result<bool, SourceError> {
        Ok(false)
    }
}
