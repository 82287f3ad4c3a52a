//! Effect input schema and the validators that normalise values written to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use reel_core::{parse_color, EngineError, Rgba};

use crate::handle::NodeRef;
use crate::media::RawSource;

/// Names an effect input may not use: they would shadow members of the public handle.
pub const RESERVED_INPUT_NAMES: &[&str] = &[
    "alias",
    "destroy",
    "effect",
    "id",
    "initialize",
    "inputs",
    "is_destroyed",
    "is_ready",
    "matte",
    "off",
    "on",
    "read_pixels",
    "render",
    "title",
    "update",
];

/// A dynamically typed input value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Number(f64),
    Boolean(bool),
    String(String),
    Color(Rgba),
    Vector(Vec<f64>),
    /// A node of some engine.
    Node(NodeRef),
    /// Raw media, turned into (or matched to) a source node when connected.
    Source(RawSource),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Rgba> {
        match self {
            Value::Color(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeRef> {
        match self {
            Value::Node(n) => Some(*n),
            _ => None,
        }
    }

    /// Loose truthiness used by the boolean validator.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Boolean(b) => *b,
            Value::String(s) => !s.is_empty() && s != "false" && s != "0",
            _ => true,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Rgba> for Value {
    fn from(c: Rgba) -> Self {
        Value::Color(c)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Vector(v)
    }
}

impl From<NodeRef> for Value {
    fn from(n: NodeRef) -> Self {
        Value::Node(n)
    }
}

impl From<RawSource> for Value {
    fn from(s: RawSource) -> Self {
        Value::Source(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    Number,
    Boolean,
    String,
    Color,
    Vector,
    Enum,
    Image,
}

/// Custom validator: `(value, spec, default, previous) -> normalised value`.
pub type Validator =
    Arc<dyn Fn(&Value, &InputSpec, &Value, &Value) -> Result<Value, String> + Send + Sync>;

/// Current values of an effect's inputs, by name.
pub type InputValues = BTreeMap<String, Value>;

/// One declared input of an effect.
#[derive(Clone)]
pub struct InputSpec {
    pub name: String,
    pub ty: InputType,
    pub title: Option<String>,
    pub default: Value,
    pub min: f64,
    pub max: f64,
    pub step: Option<f64>,
    pub modulo: Option<f64>,
    /// `(key, label)` pairs for enum inputs.
    pub options: Vec<(String, String)>,
    /// Vector length, clamped to 2..=4.
    pub dimensions: usize,
    /// Uniform the value is bound to; defaults to the input name.
    pub uniform: Option<String>,
    /// Changing the value requires recompiling the effect's shader.
    pub shader_dirty: bool,
    /// Changing the value may change which image inputs the effect requires.
    pub update_sources: bool,
    pub validator: Option<Validator>,
}

impl std::fmt::Debug for InputSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSpec")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("default", &self.default)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("step", &self.step)
            .field("options", &self.options)
            .field("dimensions", &self.dimensions)
            .field("uniform", &self.uniform)
            .field("shader_dirty", &self.shader_dirty)
            .field("update_sources", &self.update_sources)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl InputSpec {
    pub fn new(name: impl Into<String>, ty: InputType) -> Self {
        Self {
            name: name.into(),
            ty,
            title: None,
            default: Value::Null,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            step: None,
            modulo: None,
            options: Vec::new(),
            dimensions: 4,
            uniform: None,
            shader_dirty: false,
            update_sources: false,
            validator: None,
        }
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, InputType::Number).default(0.0)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, InputType::Boolean).default(false)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, InputType::String).default("")
    }

    pub fn color(name: impl Into<String>) -> Self {
        Self::new(name, InputType::Color).default([0.0, 0.0, 0.0, 1.0])
    }

    pub fn vector(name: impl Into<String>, dimensions: usize) -> Self {
        let mut s = Self::new(name, InputType::Vector);
        s.dimensions = dimensions;
        s.default = Value::Vector(vec![0.0; dimensions.clamp(2, 4)]);
        s
    }

    pub fn enumeration(name: impl Into<String>, options: &[(&str, &str)]) -> Self {
        let mut s = Self::new(name, InputType::Enum);
        s.options = options
            .iter()
            .map(|(k, l)| (k.to_string(), l.to_string()))
            .collect();
        if let Some((k, _)) = s.options.first() {
            s.default = Value::String(k.clone());
        }
        s
    }

    pub fn image(name: impl Into<String>) -> Self {
        Self::new(name, InputType::Image)
    }

    pub fn default(mut self, v: impl Into<Value>) -> Self {
        self.default = v.into();
        self
    }

    pub fn title(mut self, t: impl Into<String>) -> Self {
        self.title = Some(t.into());
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn modulo(mut self, m: f64) -> Self {
        self.modulo = Some(m);
        self
    }

    pub fn uniform(mut self, name: impl Into<String>) -> Self {
        self.uniform = Some(name.into());
        self
    }

    pub fn shader_dirty(mut self) -> Self {
        self.shader_dirty = true;
        self
    }

    pub fn update_sources(mut self) -> Self {
        self.update_sources = true;
        self
    }

    pub fn validator(
        mut self,
        f: impl Fn(&Value, &InputSpec, &Value, &Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(f));
        self
    }

    /// The uniform this input feeds.
    pub fn uniform_name(&self) -> &str {
        self.uniform.as_deref().unwrap_or(&self.name)
    }

    /// Checks and normalises the declaration itself; run once per effect construction.
    pub fn normalize(&mut self) -> Result<(), EngineError> {
        if RESERVED_INPUT_NAMES.contains(&self.name.as_str()) {
            return Err(EngineError::ReservedName(self.name.clone()));
        }
        if self.min > self.max {
            std::mem::swap(&mut self.min, &mut self.max);
        }
        if matches!(self.step, Some(s) if !(s > 0.0)) {
            self.step = None;
        }
        if matches!(self.modulo, Some(m) if !(m > 0.0)) {
            self.modulo = None;
        }
        self.dimensions = self.dimensions.clamp(2, 4);

        if self.ty == InputType::Enum {
            if self.options.is_empty() {
                return Err(EngineError::invalid_input(&self.name, "enum input has no options"));
            }
            let known = match &self.default {
                Value::String(s) => self.options.iter().any(|(k, _)| k == s),
                _ => false,
            };
            if !known {
                self.default = Value::String(self.options[0].0.clone());
            }
        }
        if self.ty != InputType::Image {
            let declared = self.default.clone();
            self.default = self.validate(&declared, &Value::Null, &Value::Null)?;
        }
        Ok(())
    }

    /// Normalises `value` for this input. Unparseable numbers and unknown colors fall back
    /// to `default`; a custom validator's rejection is an error.
    pub fn validate(&self, value: &Value, default: &Value, previous: &Value) -> Result<Value, EngineError> {
        if let Some(v) = &self.validator {
            return v(value, self, default, previous)
                .map_err(|msg| EngineError::invalid_input(&self.name, msg));
        }
        Ok(match self.ty {
            InputType::Number => Value::Number(self.validate_number(value, default)),
            InputType::Boolean => Value::Boolean(value.truthy()),
            InputType::String => match value {
                Value::String(s) => Value::String(s.clone()),
                Value::Number(n) => Value::String(n.to_string()),
                Value::Boolean(b) => Value::String(b.to_string()),
                _ => default_or(default, Value::String(String::new())),
            },
            InputType::Color => Value::Color(validate_color(value, default)),
            InputType::Vector => Value::Vector(self.validate_vector(value, default)),
            InputType::Enum => {
                let key = match value {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                };
                match key {
                    Some(k) if self.options.iter().any(|(o, _)| *o == k) => Value::String(k),
                    _ => default_or(default, Value::String(self.options[0].0.clone())),
                }
            }
            InputType::Image => value.clone(),
        })
    }

    fn validate_number(&self, value: &Value, default: &Value) -> f64 {
        let Some(mut n) = value.as_f64().filter(|n| !n.is_nan()) else {
            return default.as_f64().unwrap_or(0.0);
        };
        if let Some(m) = self.modulo {
            n -= m * (n / m).floor();
        }
        if n < self.min {
            return self.min;
        }
        if n > self.max {
            return self.max;
        }
        if let Some(step) = self.step {
            return (n / step).round() * step;
        }
        n
    }

    fn validate_vector(&self, value: &Value, default: &Value) -> Vec<f64> {
        let dims = self.dimensions;
        let fallback = default.as_vector().map(<[f64]>::to_vec).unwrap_or_default();
        let mut out: Vec<f64> = match value {
            Value::Vector(v) => v.clone(),
            Value::Number(n) => vec![*n; dims],
            Value::Color(c) => c.iter().map(|x| *x as f64).collect(),
            _ => fallback.clone(),
        };
        for i in out.len()..dims {
            out.push(fallback.get(i).copied().unwrap_or(0.0));
        }
        out.truncate(dims);
        out
    }
}

fn default_or(default: &Value, fallback: Value) -> Value {
    if default.is_null() {
        fallback
    } else {
        default.clone()
    }
}

fn validate_color(value: &Value, default: &Value) -> Rgba {
    let fallback = default.as_color().unwrap_or([0.0, 0.0, 0.0, 0.0]);
    let clamp = |c: Rgba| c.map(|x| x.clamp(0.0, 1.0));
    match value {
        Value::Color(c) => clamp(*c),
        Value::String(s) => parse_color(s).unwrap_or(fallback),
        Value::Vector(v) if v.len() == 3 || v.len() == 4 => clamp([
            v[0] as f32,
            v[1] as f32,
            v[2] as f32,
            v.get(3).copied().unwrap_or(1.0) as f32,
        ]),
        Value::Number(n) => {
            let g = (*n as f32).clamp(0.0, 1.0);
            [g, g, g, 1.0]
        }
        _ => fallback,
    }
}

/// Checks a whole schema: names unique and unreserved, each spec normalised.
pub fn normalize_schema(schema: &mut [InputSpec]) -> Result<(), EngineError> {
    for i in 0..schema.len() {
        schema[i].normalize()?;
        if schema[..i].iter().any(|s| s.name == schema[i].name) {
            return Err(EngineError::invalid_input(
                &schema[i].name,
                "declared more than once",
            ));
        }
    }
    Ok(())
}

/// Overlays `extra` onto `base`: same-name specs replace, new ones append.
pub fn merge_schema(mut base: Vec<InputSpec>, extra: Vec<InputSpec>) -> Vec<InputSpec> {
    for spec in extra {
        match base.iter_mut().find(|s| s.name == spec.name) {
            Some(slot) => *slot = spec,
            None => base.push(spec),
        }
    }
    base
}

#[cfg(feature = "serde")]
impl Value {
    /// JSON form of plain values. Nodes and raw media have none and become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null | Value::Node(_) | Value::Source(_) => J::Null,
            Value::Number(n) => serde_json::Number::from_f64(*n).map(J::Number).unwrap_or(J::Null),
            Value::Boolean(b) => J::Bool(*b),
            Value::String(s) => J::String(s.clone()),
            Value::Color(c) => J::Array(
                c.iter()
                    .filter_map(|x| serde_json::Number::from_f64(*x as f64).map(J::Number))
                    .collect(),
            ),
            Value::Vector(v) => J::Array(
                v.iter()
                    .filter_map(|x| serde_json::Number::from_f64(*x).map(J::Number))
                    .collect(),
            ),
        }
    }

    /// Arrays become vectors; validation later reshapes them for color inputs.
    pub fn from_json(v: &serde_json::Value) -> Value {
        use serde_json::Value as J;
        match v {
            J::Null => Value::Null,
            J::Bool(b) => Value::Boolean(*b),
            J::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            J::String(s) => Value::String(s.clone()),
            J::Array(a) => Value::Vector(a.iter().filter_map(|x| x.as_f64()).collect()),
            J::Object(_) => Value::Null,
        }
    }
}
