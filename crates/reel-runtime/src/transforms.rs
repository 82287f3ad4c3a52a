//! Built-in transform hooks: `2d` and `flip`.
//!
//! Matrices act on pixel coordinates centred on the node (see the base vertex stage), so a
//! translation of 10 moves the picture ten pixels regardless of the node's size.

use std::sync::Arc;

use reel_core::{EngineError, Mat4};

use crate::input::{InputType, Value};
use crate::plugin::{Options, Registry, Transform, TransformInput, TransformPlugin};

pub(crate) fn register_builtins(r: &Registry) {
    r.register_transform("2d", Arc::new(TwoDPlugin));
    r.register_transform("flip", Arc::new(FlipPlugin));
}

fn number(name: &str, value: &Value) -> Result<f32, EngineError> {
    value
        .as_f64()
        .filter(|n| n.is_finite())
        .map(|n| n as f32)
        .ok_or_else(|| EngineError::invalid_input(name, format!("expected a number, got {value:?}")))
}

// ---- 2d ----

struct TwoDPlugin;

impl TransformPlugin for TwoDPlugin {
    fn title(&self) -> &str {
        "2D Transform"
    }

    fn create(&self, options: &Options) -> Result<Box<dyn Transform>, EngineError> {
        let mut t = TwoD::default();
        for (name, value) in options {
            t.set(name, value)?;
        }
        Ok(Box::new(t))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TwoD {
    translate_x: f32,
    translate_y: f32,
    scale_x: f32,
    scale_y: f32,
    /// Degrees, counter-clockwise.
    rotation: f32,
    pivot_x: f32,
    pivot_y: f32,
}

impl Default for TwoD {
    fn default() -> Self {
        Self {
            translate_x: 0.0,
            translate_y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
            pivot_x: 0.0,
            pivot_y: 0.0,
        }
    }
}

impl TwoD {
    fn field(&mut self, name: &str) -> Option<&mut f32> {
        Some(match name {
            "translate_x" => &mut self.translate_x,
            "translate_y" => &mut self.translate_y,
            "scale_x" => &mut self.scale_x,
            "scale_y" => &mut self.scale_y,
            "rotation" => &mut self.rotation,
            "pivot_x" => &mut self.pivot_x,
            "pivot_y" => &mut self.pivot_y,
            _ => return None,
        })
    }
}

impl Transform for TwoD {
    fn inputs(&self) -> Vec<TransformInput> {
        let mut v: Vec<_> = [
            "translate_x",
            "translate_y",
            "scale_x",
            "scale_y",
            "rotation",
            "pivot_x",
            "pivot_y",
        ]
        .into_iter()
        .map(|n| TransformInput::property(n, InputType::Number))
        .collect();
        v.push(TransformInput::method("reset"));
        v
    }

    fn get(&self, name: &str) -> Option<Value> {
        let mut copy = *self;
        copy.field(name).map(|f| Value::Number(*f as f64))
    }

    fn set(&mut self, name: &str, value: &Value) -> Result<bool, EngineError> {
        let n = number(name, value)?;
        let f = self
            .field(name)
            .ok_or_else(|| EngineError::UnknownInput(name.to_string()))?;
        if *f == n {
            return Ok(false);
        }
        *f = n;
        Ok(true)
    }

    fn call(&mut self, method: &str, _args: &[Value]) -> Result<bool, EngineError> {
        match method {
            "reset" => {
                let changed = *self != TwoD::default();
                *self = TwoD::default();
                Ok(changed)
            }
            _ => Err(EngineError::UnknownInput(method.to_string())),
        }
    }

    fn matrix(&self, _width: u32, _height: u32) -> Option<Mat4> {
        if *self == TwoD::default() {
            return None;
        }
        let m = Mat4::translation(self.translate_x + self.pivot_x, self.translate_y + self.pivot_y, 0.0)
            .mul(&Mat4::rotation_z(self.rotation.to_radians()))
            .mul(&Mat4::scaling(self.scale_x, self.scale_y, 1.0))
            .mul(&Mat4::translation(-self.pivot_x, -self.pivot_y, 0.0));
        Some(m)
    }
}

// ---- flip ----

struct FlipPlugin;

impl TransformPlugin for FlipPlugin {
    fn title(&self) -> &str {
        "Flip"
    }

    fn create(&self, options: &Options) -> Result<Box<dyn Transform>, EngineError> {
        let mut t = Flip { horizontal: true };
        if let Some(v) = options.get("direction") {
            t.set("direction", v)?;
        }
        Ok(Box::new(t))
    }
}

struct Flip {
    horizontal: bool,
}

impl Transform for Flip {
    fn inputs(&self) -> Vec<TransformInput> {
        vec![TransformInput::property("direction", InputType::Enum)]
    }

    fn get(&self, name: &str) -> Option<Value> {
        (name == "direction").then(|| {
            Value::from(if self.horizontal { "horizontal" } else { "vertical" })
        })
    }

    fn set(&mut self, name: &str, value: &Value) -> Result<bool, EngineError> {
        if name != "direction" {
            return Err(EngineError::UnknownInput(name.to_string()));
        }
        let horizontal = match value.as_str() {
            Some("horizontal") => true,
            Some("vertical") => false,
            _ => {
                return Err(EngineError::invalid_input(
                    name,
                    "expected \"horizontal\" or \"vertical\"",
                ))
            }
        };
        let changed = horizontal != self.horizontal;
        self.horizontal = horizontal;
        Ok(changed)
    }

    fn call(&mut self, method: &str, _args: &[Value]) -> Result<bool, EngineError> {
        Err(EngineError::UnknownInput(method.to_string()))
    }

    fn matrix(&self, _width: u32, _height: u32) -> Option<Mat4> {
        Some(if self.horizontal {
            Mat4::scaling(-1.0, 1.0, 1.0)
        } else {
            Mat4::scaling(1.0, -1.0, 1.0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: [f32; 4], b: [f32; 4]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-4)
    }

    #[test]
    fn untouched_2d_contributes_nothing() {
        let t = TwoDPlugin.create(&Options::new()).unwrap();
        assert!(t.matrix(10, 10).is_none());
    }

    #[test]
    fn rotation_turns_about_the_pivot() {
        let mut t = TwoD::default();
        assert!(t.set("rotation", &Value::Number(90.0)).unwrap());
        t.set("pivot_x", &Value::Number(1.0)).unwrap();
        let m = t.matrix(4, 4).unwrap();
        // the pivot stays put; a point one unit right of it swings above it
        assert!(close(m.transform_point([1.0, 0.0, 0.0, 1.0]), [1.0, 0.0, 0.0, 1.0]));
        assert!(close(m.transform_point([2.0, 0.0, 0.0, 1.0]), [1.0, 1.0, 0.0, 1.0]));
    }

    #[test]
    fn setting_the_same_value_reports_no_change() {
        let mut t = TwoD::default();
        assert!(!t.set("scale_x", &Value::Number(1.0)).unwrap());
        assert!(t.set("scale_x", &Value::from("2")).unwrap());
        assert!(t.set("bogus", &Value::Number(1.0)).is_err());
        assert!(t.set("scale_x", &Value::from("wide")).is_err());
    }

    #[test]
    fn reset_restores_identity() {
        let mut t = TwoD::default();
        t.set("translate_x", &Value::Number(5.0)).unwrap();
        assert!(t.call("reset", &[]).unwrap());
        assert!(!t.call("reset", &[]).unwrap());
        assert!(t.matrix(1, 1).is_none());
    }

    #[test]
    fn flip_direction_is_validated() {
        let mut opts = Options::new();
        opts.insert("direction".into(), Value::from("vertical"));
        let mut t = FlipPlugin.create(&opts).unwrap();
        assert_eq!(t.get("direction"), Some(Value::from("vertical")));
        assert_eq!(t.matrix(1, 1), Some(Mat4::scaling(1.0, -1.0, 1.0)));
        assert!(t.set("direction", &Value::from("sideways")).is_err());
    }
}
