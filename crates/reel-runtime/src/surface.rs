//! Process-wide record of which engine draws to which surface.
//!
//! Two engines may share a surface, but it is almost always a mistake, so the second claim
//! is logged. Claims are released when the claiming target is destroyed.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::handle::EngineId;
use crate::media::SurfaceId;

fn claims() -> MutexGuard<'static, HashMap<SurfaceId, Vec<EngineId>>> {
    static CLAIMS: OnceLock<Mutex<HashMap<SurfaceId, Vec<EngineId>>>> = OnceLock::new();
    CLAIMS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

/// Records that `engine` draws to `surface`. Returns false when another engine already does.
pub fn claim(surface: SurfaceId, engine: EngineId) -> bool {
    let mut m = claims();
    let owners = m.entry(surface).or_default();
    let shared = owners.iter().any(|e| *e != engine);
    if shared {
        tracing::warn!(
            surface = surface.0,
            engine = engine.0,
            others = owners.len(),
            "surface is already a target of another engine"
        );
    }
    owners.push(engine);
    !shared
}

/// Drops one claim of `engine` on `surface`.
pub fn release(surface: SurfaceId, engine: EngineId) {
    let mut m = claims();
    if let Some(owners) = m.get_mut(&surface) {
        if let Some(i) = owners.iter().position(|e| *e == engine) {
            owners.remove(i);
        }
        if owners.is_empty() {
            m.remove(&surface);
        }
    }
}

/// Engines currently drawing to `surface`.
pub fn claimants(surface: SurfaceId) -> Vec<EngineId> {
    claims().get(&surface).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_engine_claim_is_flagged() {
        let s = SurfaceId::next();
        let (a, b) = (EngineId::next(), EngineId::next());
        assert!(claim(s, a));
        assert!(claim(s, a));
        assert!(!claim(s, b));
        release(s, b);
        release(s, a);
        assert_eq!(claimants(s), vec![a]);
        release(s, a);
        assert!(claimants(s).is_empty());
    }
}
