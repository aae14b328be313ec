use crate::draw::state::EngineLifecycle;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures surfaced by the drawing engine. None of them are fatal; the host
/// can retry the operation or build a new engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("drawing engine is not ready (state: {state:?})")]
    EngineNotReady { state: EngineLifecycle },
    #[error("reference image {url} failed to load: {reason}")]
    ReferenceLoadFailed { url: String, reason: String },
    #[error("invalid tool parameter: {0}")]
    InvalidToolParameter(String),
    #[error("raster export failed: {0}")]
    ExportFailed(String),
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    pub fn reference_load_failed(url: &str, err: &anyhow::Error) -> Self {
        Self::ReferenceLoadFailed {
            url: url.to_owned(),
            reason: format!("{err:#}"),
        }
    }
}
