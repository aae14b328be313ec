pub mod composite;
pub mod control;
pub mod engine;
pub mod error;
pub mod input;
pub mod messages;
pub mod model;
pub mod reference;
pub mod render;
pub mod save;
pub mod settings;
pub mod state;
pub mod tools;

pub use composite::{EraserReach, RgbaBuffer};
pub use control::{Canvas, ControlHandle, HostHooks};
pub use engine::DrawingEngine;
pub use error::EngineError;
pub use messages::{DownloadArtifact, LoadOutcome, ReferenceEvent};
pub use model::{Point, Rgba, Tool};
pub use reference::{DefaultFetcher, ImageFetcher};
pub use save::Raster;
pub use settings::EngineConfig;
pub use state::EngineLifecycle;
pub use tools::{HostControls, HostField};
