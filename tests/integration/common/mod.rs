//! Common utilities for integration tests

use anyhow::Result;
use imgbundle::lock::{self, ImageLocation};
use imgbundle::registry::memory::sha256_digest;
use imgbundle::{
    ArtifactKind, ImageLock, MemoryRegistry, Notifier, PushOptions, PushOutcome, Pusher,
};
use oci_client::Reference;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

pub const BUNDLE_REF: &str = "registry.example.com/bundles/app:v1";
pub const BUNDLE_REPO: &str = "registry.example.com/bundles/app";
pub const IMAGE_REF: &str = "registry.example.com/images/app:v1";

/// Writes `(relative path, content)` pairs under `root`, creating parents.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) -> Result<()> {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
    }
    Ok(())
}

/// Every regular file under `root` keyed by its `/`-separated relative path.
pub fn read_tree(root: &Path) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            let rel = entry.path().strip_prefix(root)?;
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(key, fs::read_to_string(entry.path())?);
        }
    }
    Ok(files)
}

pub fn push_dir(
    registry: &MemoryRegistry,
    reference: &str,
    dir: &Path,
    kind: ArtifactKind,
    file_exclusions: &[&str],
) -> Result<PushOutcome> {
    let notifier = Notifier::new(2);
    let opts = PushOptions {
        reference: reference.to_string(),
        kind,
        files: vec![dir.to_path_buf()],
        file_exclusions: file_exclusions.iter().map(|s| s.to_string()).collect(),
        lock_output: None,
    };
    Ok(Pusher::new(registry, &notifier).push(&opts)?)
}

/// Stores a one-layer dependency image and returns its manifest digest.
pub fn put_dependency(registry: &MemoryRegistry, reference: &str, payload: &[u8]) -> Result<String> {
    let reference: Reference = reference.parse()?;
    Ok(registry.put_image(
        &reference,
        vec![("application/octet-stream".to_string(), payload.to_vec())],
        BTreeMap::new(),
    ))
}

/// Writes `.imgpkg/images.yml` naming each `(digest ref, name)` and returns its bytes.
pub fn write_image_lock(bundle_dir: &Path, images: &[(String, &str)]) -> Result<Vec<u8>> {
    let descs = images
        .iter()
        .map(|(digest_ref, name)| lock::ImageDesc {
            location: ImageLocation {
                digest_ref: digest_ref.clone(),
                original_tag: "v1".to_string(),
            },
            name: name.to_string(),
            metadata: serde_yaml::Value::Null,
        })
        .collect();

    let path = lock::image_lock_path(bundle_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    lock::write_image_lock(&path, &ImageLock::new(descs))?;
    Ok(fs::read(path)?)
}

/// A digest that no registry in these tests ever stores.
pub fn unknown_digest() -> String {
    sha256_digest(b"never pushed")
}
