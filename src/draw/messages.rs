use crate::draw::error::EngineError;
use crate::draw::save::Raster;

/// How a finished reference load was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The decoded image now backs the reference layer.
    Applied,
    /// A newer request superseded this one; the result was dropped.
    Stale,
    /// Fetch or decode failed; the reference layer kept its previous image.
    Failed(EngineError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEvent {
    pub url: String,
    pub generation: u64,
    pub outcome: LoadOutcome,
}

/// Handed to the host's save mechanism by `download`.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadArtifact {
    pub file_name: String,
    pub raster: Raster,
}
