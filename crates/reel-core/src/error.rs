use std::path::PathBuf;

/// Engine-level errors used across reel crates.
///
/// Contract rule: this type lives in `reel-core` and is re-exported by the runtimes.
/// Everything a caller can trigger through the graph API comes back as one of these;
/// failures inside the render daemon are logged instead (see `reel-runtime`).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ---- Graph construction / mutation ----
    #[error("unknown {kind} type: {name}")]
    UnknownType { kind: &'static str, name: String },

    #[error("reserved name: {0}")]
    ReservedName(String),

    #[error("cyclical connection: node {to} already depends on node {from}")]
    CyclicalConnection { from: u32, to: u32 },

    #[error("node {0} does not belong to this engine")]
    ForeignNode(u32),

    #[error("node {0} has been destroyed")]
    Destroyed(u32),

    #[error("engine has been destroyed")]
    EngineDestroyed,

    #[error("unknown input: {0}")]
    UnknownInput(String),

    #[error("invalid value for input '{input}': {msg}")]
    InvalidInput { input: String, msg: String },

    // ---- GPU resources ----
    #[error("framebuffer incomplete: {0}")]
    FramebufferIncomplete(String),

    #[error("vertex shader compile error: {0}")]
    VertexCompile(String),

    #[error("fragment shader compile error: {0}")]
    FragmentCompile(String),

    #[error("program link error: {0}")]
    Link(String),

    #[error("backend object creation failed: {0}")]
    GlCreate(String),

    #[error("no gpu context attached")]
    NoContext,

    #[error("read buffer has {got} bytes, expected {expected}")]
    BadReadBuffer { expected: usize, got: usize },

    // ---- Config ----
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config at {}: {msg}", path.display())]
    Config { path: PathBuf, msg: String },

    // ---- Fallback ----
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn other<T: Into<String>>(s: T) -> Self {
        EngineError::Other(s.into())
    }

    pub fn invalid_input(input: impl Into<String>, msg: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            input: input.into(),
            msg: msg.into(),
        }
    }

    /// True for the error kinds a render pass may recover from on a later frame.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::NoContext | EngineError::GlCreate(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_thing() {
        let e = EngineError::UnknownType {
            kind: "effect",
            name: "nope".into(),
        };
        assert_eq!(e.to_string(), "unknown effect type: nope");

        let e = EngineError::CyclicalConnection { from: 3, to: 1 };
        assert!(e.to_string().contains("cyclical"));
    }
}
