//! Content-addressed registry held in memory.
//!
//! Manifests and blobs are keyed by their sha256 digest per repository, so pushing the
//! same content into two repositories yields the same digest in both. That is what
//! bundle relocation relies on, and what the tests use to stage "colocated" images.

use oci_client::Reference;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{
    repository_name, ImageWriter, ImagesMetadata, LayerDescriptor, Manifest, RegistryError,
};
use crate::archive::{self, PackagedArtifact};

#[derive(Default)]
struct Repository {
    tags: HashMap<String, String>,
    manifests: HashMap<String, Manifest>,
    blobs: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct MemoryRegistry {
    repositories: Mutex<HashMap<String, Repository>>,
}

pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn repositories(&self) -> MutexGuard<'_, HashMap<String, Repository>> {
        self.repositories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores an image made of `layers` (media type, bytes) and returns its manifest
    /// digest. A tag on `reference` is pointed at the new manifest.
    pub fn put_image(
        &self,
        reference: &Reference,
        layers: Vec<(String, Vec<u8>)>,
        annotations: BTreeMap<String, String>,
    ) -> String {
        let mut repositories = self.repositories();
        let repository = repositories.entry(repository_name(reference)).or_default();

        let mut descriptors = Vec::with_capacity(layers.len());
        for (media_type, data) in layers {
            let digest = sha256_digest(&data);
            descriptors.push(LayerDescriptor {
                media_type,
                digest: digest.clone(),
                size: data.len() as i64,
            });
            repository.blobs.insert(digest, data);
        }

        let document = serde_json::json!({
            "schemaVersion": 2,
            "layers": descriptors,
            "annotations": annotations,
        });
        let digest = sha256_digest(document.to_string().as_bytes());

        repository.manifests.insert(
            digest.clone(),
            Manifest {
                digest: digest.clone(),
                annotations,
                layers: descriptors,
            },
        );
        if let Some(tag) = reference.tag() {
            repository.tags.insert(tag.to_string(), digest.clone());
        }
        digest
    }

    fn lookup(&self, reference: &Reference) -> Result<Manifest, RegistryError> {
        let not_found = || RegistryError::ManifestNotFound(reference.whole());
        let repositories = self.repositories();
        let repository = repositories
            .get(&repository_name(reference))
            .ok_or_else(not_found)?;

        let digest = match (reference.digest(), reference.tag()) {
            (Some(digest), _) => digest,
            (None, tag) => repository
                .tags
                .get(tag.unwrap_or("latest"))
                .map(String::as_str)
                .ok_or_else(not_found)?,
        };
        repository.manifests.get(digest).cloned().ok_or_else(not_found)
    }
}

impl ImagesMetadata for MemoryRegistry {
    fn resolve(&self, reference: &Reference) -> Result<String, RegistryError> {
        Ok(self.lookup(reference)?.digest)
    }

    fn manifest(&self, reference: &Reference) -> Result<Manifest, RegistryError> {
        self.lookup(reference)
    }

    fn exists(&self, reference: &Reference) -> Result<bool, RegistryError> {
        match self.lookup(reference) {
            Ok(_) => Ok(true),
            Err(RegistryError::ManifestNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn fetch_layer(
        &self,
        reference: &Reference,
        layer: &LayerDescriptor,
        out: &mut dyn Write,
    ) -> Result<(), RegistryError> {
        let repository_key = repository_name(reference);
        let repositories = self.repositories();
        let blob = repositories
            .get(&repository_key)
            .and_then(|repository| repository.blobs.get(&layer.digest))
            .ok_or_else(|| RegistryError::BlobNotFound {
                repository: repository_key.clone(),
                digest: layer.digest.clone(),
            })?;

        out.write_all(blob).map_err(|source| RegistryError::Write {
            digest: layer.digest.clone(),
            source,
        })
    }
}

impl ImageWriter for MemoryRegistry {
    fn push(
        &self,
        reference: &Reference,
        artifact: &PackagedArtifact,
    ) -> Result<String, RegistryError> {
        let data = artifact.read_bytes().map_err(|source| RegistryError::Write {
            digest: artifact.digest().to_string(),
            source,
        })?;
        Ok(self.put_image(
            reference,
            vec![(archive::layer_media_type(), data)],
            artifact.annotations(),
        ))
    }
}
