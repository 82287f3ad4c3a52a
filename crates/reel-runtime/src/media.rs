//! Raw things a host hands the engine: pixel sources and render destinations.

use std::any::Any;
use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbaImage;

use crate::gpu::{FramebufferHandle, Gpu, TextureHandle};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The media exists but may not be read (cross-origin style denial).
    #[error("access denied: {0}")]
    Denied(String),
    #[error("media not ready")]
    NotReady,
    #[error("{0}")]
    Other(String),
}

/// Asynchronously loaded, frame-producing media (video, camera, decoder).
pub trait PixelProvider {
    /// Frame size once known.
    fn size(&self) -> Option<(u32, u32)>;

    fn loaded(&self) -> bool {
        self.size().is_some()
    }

    /// Bumped whenever a new frame is available.
    fn version(&self) -> u64;

    /// The current frame, RGBA8, top row first.
    fn frame(&self) -> Result<Cow<'_, [u8]>, SourceError>;
}

/// A pixel source before it becomes a graph node.
#[derive(Clone)]
pub enum RawSource {
    /// Static image, ready immediately.
    Image(Arc<RgbaImage>),
    /// Host-drawn canvas; re-uploaded whenever the node is marked dirty.
    Canvas(Rc<RefCell<RgbaImage>>),
    Media(Rc<dyn PixelProvider>),
    /// An existing texture on the engine's context. The node never deletes it.
    Texture {
        texture: TextureHandle,
        width: u32,
        height: u32,
    },
    /// Anything a third-party source plugin understands.
    Custom(Rc<dyn Any>),
}

impl RawSource {
    pub fn kind(&self) -> &'static str {
        match self {
            RawSource::Image(_) => "image",
            RawSource::Canvas(_) => "canvas",
            RawSource::Media(_) => "media",
            RawSource::Texture { .. } => "texture",
            RawSource::Custom(_) => "custom",
        }
    }
}

impl std::fmt::Debug for RawSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawSource::Image(img) => write!(f, "Image({}x{})", img.width(), img.height()),
            RawSource::Canvas(c) => match c.try_borrow() {
                Ok(c) => write!(f, "Canvas({}x{})", c.width(), c.height()),
                Err(_) => f.write_str("Canvas(<borrowed>)"),
            },
            RawSource::Media(m) => write!(f, "Media({:?})", m.size()),
            RawSource::Texture {
                texture,
                width,
                height,
            } => write!(f, "Texture({texture:?}, {width}x{height})"),
            RawSource::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Identity comparison: two raw sources are equal when they are the same object.
impl PartialEq for RawSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RawSource::Image(a), RawSource::Image(b)) => Arc::ptr_eq(a, b),
            (RawSource::Canvas(a), RawSource::Canvas(b)) => Rc::ptr_eq(a, b),
            (RawSource::Media(a), RawSource::Media(b)) => {
                std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
            }
            (
                RawSource::Texture { texture: a, .. },
                RawSource::Texture { texture: b, .. },
            ) => a == b,
            (RawSource::Custom(a), RawSource::Custom(b)) => {
                std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl From<RgbaImage> for RawSource {
    fn from(img: RgbaImage) -> Self {
        RawSource::Image(Arc::new(img))
    }
}

impl From<Arc<RgbaImage>> for RawSource {
    fn from(img: Arc<RgbaImage>) -> Self {
        RawSource::Image(img)
    }
}

impl From<Rc<RefCell<RgbaImage>>> for RawSource {
    fn from(c: Rc<RefCell<RgbaImage>>) -> Self {
        RawSource::Canvas(c)
    }
}

/// Host surface identity, used to detect two engines drawing to one surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    pub fn next() -> SurfaceId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SurfaceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// An on-screen destination: the default framebuffer of a context.
pub struct Surface {
    pub id: SurfaceId,
    pub width: u32,
    pub height: u32,
    /// The surface's context. Adopted by an engine that has none yet.
    pub context: Option<Box<dyn Gpu>>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            id: SurfaceId::next(),
            width,
            height,
            context: None,
        }
    }

    pub fn with_context(width: u32, height: u32, context: Box<dyn Gpu>) -> Self {
        Self {
            context: Some(context),
            ..Self::new(width, height)
        }
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

/// A render destination before it becomes a target node.
#[derive(Debug)]
pub enum RawTarget {
    Surface(Surface),
    /// Caller-owned texture on the engine's context.
    Texture {
        texture: TextureHandle,
        width: u32,
        height: u32,
    },
    /// Caller-owned framebuffer on the engine's context.
    Framebuffer {
        framebuffer: FramebufferHandle,
        width: u32,
        height: u32,
    },
}

impl RawTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            RawTarget::Surface(_) => "surface",
            RawTarget::Texture { .. } => "texture",
            RawTarget::Framebuffer { .. } => "framebuffer",
        }
    }
}

impl From<Surface> for RawTarget {
    fn from(s: Surface) -> Self {
        RawTarget::Surface(s)
    }
}
