use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by an engine state handle.
///
/// These describe stale or missing engine entities and invalid requests
/// against live state; the control channel turns them into error responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("no editor world available")]
    NoWorld,
    #[error("unknown actor class: {0}")]
    UnknownClass(String),
    #[error("actor not found: {0}")]
    ActorNotFound(String),
    #[error("actor label already in use: {0}")]
    LabelInUse(String),
    #[error("failed to destroy actor: {0}")]
    DestroyFailed(String),
    #[error("failed to import asset from: {}", .0.display())]
    ImportFailed(PathBuf),
    #[error("invalid asset name: {0}")]
    InvalidAssetName(String),
    #[error("texture not found: {0}")]
    TextureNotFound(String),
    #[error("actor {0} has no static mesh component")]
    NoMeshComponent(String),
    #[error("invalid transform: {0}")]
    InvalidTransform(String),
}
