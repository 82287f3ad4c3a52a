use std::fmt;
use std::str::FromStr;

/// Node lifecycle events a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Ready,
    Unready,
    Dirty,
    Resize,
    Render,
    ContextLost,
    ContextRestored,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Ready,
        EventKind::Unready,
        EventKind::Dirty,
        EventKind::Resize,
        EventKind::Render,
        EventKind::ContextLost,
        EventKind::ContextRestored,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Ready => "ready",
            EventKind::Unready => "unready",
            EventKind::Dirty => "dirty",
            EventKind::Resize => "resize",
            EventKind::Render => "render",
            EventKind::ContextLost => "webglcontextlost",
            EventKind::ContextRestored => "webglcontextrestored",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown event '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for k in EventKind::ALL {
            assert_eq!(k.name().parse::<EventKind>().unwrap(), k);
        }
        assert!("bogus".parse::<EventKind>().is_err());
    }
}
