#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

//! Shared vocabulary for the reel compositing engine: errors, configuration, logging,
//! color parsing, matrix math and event names. Nothing in here touches a GPU.

pub mod color;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod math;

pub use color::{parse_color, Rgba};
pub use config::EngineConfig;
pub use error::EngineError;
pub use events::EventKind;
pub use logging::{init_logging, LoggingConfig};
pub use math::Mat4;
