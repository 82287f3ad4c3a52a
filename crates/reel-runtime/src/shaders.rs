//! Base shader pair shared by every pass that only needs to place and sample one texture.

/// Vertex stage: scales the unit model to pixel space, applies `transform`, maps back to
/// clip space. Effects usually keep this stage and replace only the fragment.
pub const BASE_VERTEX: &str = r#"#version 330 core
in vec4 position;
in vec2 texCoord;

uniform vec2 resolution;
uniform mat4 transform;

out vec2 vTexCoord;

void main() {
    vec4 screenPosition = vec4(position.xy * resolution / 2.0, position.z, position.w);
    screenPosition = transform * screenPosition;

    gl_Position.xy = screenPosition.xy * 2.0 / resolution;
    gl_Position.z = screenPosition.z * 2.0 / (resolution.x / resolution.y);
    gl_Position.w = screenPosition.w;
    vTexCoord = texCoord;
}
"#;

pub const BASE_FRAGMENT: &str = r#"#version 330 core
in vec2 vTexCoord;
out vec4 fragColor;

uniform sampler2D source;

void main() {
    fragColor = texture(source, vTexCoord);
}
"#;

/// A vertex/fragment source pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub vertex: String,
    pub fragment: String,
}

impl ShaderSource {
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }

    pub fn base() -> Self {
        Self::new(BASE_VERTEX, BASE_FRAGMENT)
    }

    /// Keeps the base vertex stage and swaps in `fragment`.
    pub fn with_fragment(fragment: impl Into<String>) -> Self {
        Self::new(BASE_VERTEX, fragment)
    }
}

impl Default for ShaderSource {
    fn default() -> Self {
        Self::base()
    }
}
