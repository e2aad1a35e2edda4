//! Decide whether a pulled manifest is a plain image or a bundle, and hold the caller to
//! the mode they asked for.

use crate::error::{Result, UsageError};
use crate::registry::Manifest;

/// What the caller said they are pulling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullIntent {
    Image,
    Bundle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Bundle,
}

/// Bundle pulls require the bundle annotation set to `"true"`; image pulls reject it.
pub fn classify(manifest: &Manifest, intent: PullIntent) -> Result<ArtifactKind> {
    match (intent, manifest.is_bundle()) {
        (PullIntent::Image, true) => Err(UsageError::ExpectedBundleFlag.into()),
        (PullIntent::Bundle, false) => Err(UsageError::ExpectedImageFlag.into()),
        (PullIntent::Image, false) => Ok(ArtifactKind::Image),
        (PullIntent::Bundle, true) => Ok(ArtifactKind::Bundle),
    }
}
