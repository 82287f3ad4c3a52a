use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Engine-wide settings. Every field has a default so a partial JSON file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size used by generator effects that have no image input and no explicit size.
    pub default_width: u32,
    pub default_height: u32,

    /// Blend with premultiplied-alpha factors (ONE, ONE_MINUS_SRC_ALPHA).
    pub premultiplied_alpha: bool,

    /// Keep the render daemon rescheduling while any source node exists.
    pub keep_alive_with_sources: bool,

    /// Upper bound on texture units bound by a single draw.
    pub max_texture_units: u32,

    /// Optional `tracing` filter directive, e.g. `"reel_runtime=debug"`.
    pub log_filter: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_width: 640,
            default_height: 480,
            premultiplied_alpha: true,
            keep_alive_with_sources: true,
            max_texture_units: 16,
            log_filter: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> Result<Self, EngineError> {
        let cfg: EngineConfig = serde_json::from_str(s)?;
        cfg.validate(Path::new("<inline>"))?;
        Ok(cfg)
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: EngineConfig = serde_json::from_str(&text)?;
        cfg.validate(path)?;
        Ok(cfg)
    }

    pub fn validate(&self, path: &Path) -> Result<(), EngineError> {
        if self.default_width == 0 || self.default_height == 0 {
            return Err(EngineError::Config {
                path: path.to_path_buf(),
                msg: "default_width/default_height must be > 0".into(),
            });
        }
        if self.max_texture_units == 0 {
            return Err(EngineError::Config {
                path: path.to_path_buf(),
                msg: "max_texture_units must be > 0".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{ "default_width": 320 }"#).unwrap();
        assert_eq!(cfg.default_width, 320);
        assert_eq!(cfg.default_height, 480);
        assert!(cfg.premultiplied_alpha);
    }

    #[test]
    fn zero_size_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "default_height": 0 }"#).unwrap_err();
        assert!(err.to_string().contains("must be > 0"), "got: {err}");
    }

    #[test]
    fn missing_file_reports_path() {
        let err = EngineConfig::from_json_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }
}
