//! Built-in effect pack.
//!
//! Each effect ships its GLSL and the matching `SoftGpu` kernel. [`register_all`] installs
//! both; hosts on a real backend only need the plugins, but the kernels are harmless there.

use std::sync::Arc;

use reel_runtime::soft::register_kernel;
use reel_runtime::Registry;

pub mod color;
pub mod crossfade;
pub mod invert;
pub mod matrix_mix4;

pub use matrix_mix4::MatrixPreset;

/// Registers every effect in this crate on `registry`. Existing hooks are left alone.
pub fn register_all(registry: &Registry) {
    let effects: [(&str, Arc<dyn reel_runtime::EffectPlugin>); 4] = [
        (color::HOOK, Arc::new(color::Color)),
        (invert::HOOK, Arc::new(invert::Invert)),
        (crossfade::HOOK, Arc::new(crossfade::Crossfade)),
        (matrix_mix4::HOOK, Arc::new(matrix_mix4::MatrixMix4)),
    ];
    for (hook, plugin) in effects {
        registry.register_effect(hook, plugin);
    }
    tracing::debug!("reel-effects registered");

    register_kernel(color::FRAGMENT, Arc::new(color::kernel));
    register_kernel(invert::FRAGMENT, Arc::new(invert::kernel));
    register_kernel(crossfade::FRAGMENT, Arc::new(crossfade::kernel));
    register_kernel(matrix_mix4::FRAGMENT, Arc::new(matrix_mix4::kernel));
}

/// A registry with the built-in sources, transforms and targets plus this pack.
pub fn registry() -> Arc<Registry> {
    let r = Registry::with_builtins();
    register_all(&r);
    Arc::new(r)
}

#[cfg(test)]
mod test_util {
    use image::{Rgba, RgbaImage};
    use reel_runtime::{Engine, EngineConfig, Options, SoftGpu, SourceHandle, Surface, TargetHandle};

    pub fn engine() -> Engine {
        Engine::with_registry(EngineConfig::default(), super::registry())
    }

    pub fn surface(engine: &mut Engine, w: u32, h: u32) -> TargetHandle {
        let s = Surface::with_context(w, h, Box::new(SoftGpu::with_screen(w, h)));
        engine.target(None, s, Options::new()).unwrap()
    }

    pub fn solid(engine: &mut Engine, w: u32, h: u32, px: [u8; 4]) -> SourceHandle {
        engine
            .source(None, RgbaImage::from_pixel(w, h, Rgba(px)), Options::new())
            .unwrap()
    }

    pub fn first_pixel(engine: &mut Engine, out: TargetHandle) -> [u8; 4] {
        let px = out.read_pixels(engine, 0, 0, 1, 1).unwrap();
        [px[0], px[1], px[2], px[3]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_all_is_idempotent() {
        let r = Registry::new();
        register_all(&r);
        register_all(&r);
        for hook in [color::HOOK, invert::HOOK, crossfade::HOOK, matrix_mix4::HOOK] {
            assert!(r.effect(hook).is_some(), "{hook} missing");
        }
    }
}
