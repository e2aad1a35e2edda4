//! Registry capability consumed by pull, push and the lock rewriter.
//!
//! The core never talks to a registry directly. It goes through [`ImagesMetadata`]
//! (read side) and [`ImageWriter`] (push side), so the same flow runs against a real
//! registry ([`oci::RegistryClient`]) or an in-process store ([`memory::MemoryRegistry`]).

pub mod memory;
pub mod oci;

use oci_client::Reference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use thiserror::Error;

use crate::archive::PackagedArtifact;

pub use memory::MemoryRegistry;
pub use oci::{RegistryClient, RegistryOpts};

/// Manifest annotation marking an artifact as a bundle. Only the literal value
/// `"true"` counts.
pub const BUNDLE_ANNOTATION: &str = "io.k14s.imgpkg.bundle";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("Blob {digest} not found in {repository}")]
    BlobNotFound { repository: String, digest: String },

    #[error("Unsupported manifest for {0}: image indexes are not supported")]
    UnsupportedManifest(String),

    #[error("Registry request for {reference} failed: {message}")]
    Request { reference: String, message: String },

    #[error("Starting registry runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("Writing blob {digest}: {source}")]
    Write {
        digest: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub digest: String,
    pub annotations: BTreeMap<String, String>,
    pub layers: Vec<LayerDescriptor>,
}

impl Manifest {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn is_bundle(&self) -> bool {
        self.annotation(BUNDLE_ANNOTATION) == Some("true")
    }
}

/// Read-only view of a registry.
pub trait ImagesMetadata {
    /// Resolves a tag or digest reference to the manifest digest it points at.
    fn resolve(&self, reference: &Reference) -> Result<String, RegistryError>;

    fn manifest(&self, reference: &Reference) -> Result<Manifest, RegistryError>;

    /// `Ok(false)` when the registry has no manifest for `reference`.
    fn exists(&self, reference: &Reference) -> Result<bool, RegistryError>;

    fn fetch_layer(
        &self,
        reference: &Reference,
        layer: &LayerDescriptor,
        out: &mut dyn Write,
    ) -> Result<(), RegistryError>;
}

pub trait ImageWriter {
    /// Uploads `artifact` as a single-layer image and returns the manifest digest.
    fn push(&self, reference: &Reference, artifact: &PackagedArtifact)
        -> Result<String, RegistryError>;
}

/// `registry/repository` without tag or digest.
pub fn repository_name(reference: &Reference) -> String {
    format!("{}/{}", reference.registry(), reference.repository())
}

/// Same repository as `reference`, pinned to `digest`.
pub fn pin_digest(reference: &Reference, digest: &str) -> Reference {
    Reference::with_digest(
        reference.registry().to_string(),
        reference.repository().to_string(),
        digest.to_string(),
    )
}
