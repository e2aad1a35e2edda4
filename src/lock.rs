//! Lock documents carried by bundles, and digest-reference relocation.
//!
//! An [`ImageLock`] lives at `.imgpkg/images.yml` inside a bundle and lists the images
//! the bundle depends on. A [`BundleLock`] pins a pushed bundle to its digest and is what
//! `pull --lock` reads.

use oci_client::Reference;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const API_VERSION: &str = "imgpkg.k14s.io/v1alpha1";
pub const IMAGE_LOCK_KIND: &str = "ImageLock";
pub const BUNDLE_LOCK_KIND: &str = "BundleLock";

pub const BUNDLE_DIR: &str = ".imgpkg";
pub const IMAGE_LOCK_FILE: &str = "images.yml";

/// Lock files are written owner read/write only.
pub const LOCK_FILE_MODE: u32 = 0o600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLocation {
    pub digest_ref: String,
    #[serde(default)]
    pub original_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDesc {
    #[serde(flatten)]
    pub location: ImageLocation,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "serde_yaml::Value::is_null")]
    pub metadata: serde_yaml::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageLockSpec {
    #[serde(default)]
    pub images: Vec<ImageDesc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLock {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub spec: ImageLockSpec,
}

impl ImageLock {
    pub fn new(images: Vec<ImageDesc>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: IMAGE_LOCK_KIND.to_string(),
            spec: ImageLockSpec { images },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleLockSpec {
    pub image: ImageLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleLock {
    pub api_version: String,
    pub kind: String,
    pub spec: BundleLockSpec,
}

impl BundleLock {
    pub fn new(digest_ref: String, original_tag: String) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: BUNDLE_LOCK_KIND.to_string(),
            spec: BundleLockSpec {
                image: ImageLocation {
                    digest_ref,
                    original_tag,
                },
            },
        }
    }
}

pub fn image_lock_path(bundle_dir: &Path) -> PathBuf {
    bundle_dir.join(BUNDLE_DIR).join(IMAGE_LOCK_FILE)
}

pub fn read_image_lock(path: &Path) -> Result<ImageLock> {
    read_yaml(path)
}

pub fn write_image_lock(path: &Path, lock: &ImageLock) -> Result<()> {
    write_yaml(path, lock)
}

pub fn read_bundle_lock(path: &Path) -> Result<BundleLock> {
    read_yaml(path)
}

pub fn write_bundle_lock(path: &Path, lock: &BundleLock) -> Result<()> {
    write_yaml(path, lock)
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    serde_yaml::from_slice(&bytes).map_err(|source| Error::Lock {
        path: path.to_path_buf(),
        source,
    })
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let encoded = serde_yaml::to_string(value).map_err(|source| Error::Lock {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, encoded).map_err(|e| Error::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(LOCK_FILE_MODE))
            .map_err(|e| Error::io(path, e))?;
    }

    Ok(())
}

/// Moves `digest_ref` into `repository` (`registry/path`), keeping its digest.
pub fn image_with_repository(digest_ref: &str, repository: &str) -> Result<String> {
    let invalid = |reason: String| Error::InvalidLockReference {
        reference: digest_ref.to_string(),
        reason,
    };

    let reference: Reference = digest_ref.parse().map_err(|e| invalid(format!("{}", e)))?;
    let digest = reference
        .digest()
        .ok_or_else(|| invalid("expected a digest reference".to_string()))?;

    Ok(format!("{}@{}", repository, digest))
}

/// Parses `registry/repository@sha256:<hex>`; the registry must be explicit and no tag
/// is allowed.
pub fn parse_digest_ref(digest_ref: &str) -> Result<Reference> {
    let invalid = |reason: &str| Error::InvalidDigestRef {
        reference: digest_ref.to_string(),
        reason: reason.to_string(),
    };

    let (name, digest) = digest_ref
        .split_once('@')
        .ok_or_else(|| invalid("missing digest"))?;
    if !is_sha256_digest(digest) {
        return Err(invalid("digest must be sha256 followed by 64 lowercase hex characters"));
    }

    let host = name.split('/').next().unwrap_or_default();
    let explicit_registry =
        name.contains('/') && (host.contains('.') || host.contains(':') || host == "localhost");
    if !explicit_registry {
        return Err(invalid("registry must be explicitly specified"));
    }

    let reference = digest_ref
        .parse::<Reference>()
        .map_err(|e| invalid(&e.to_string()))?;
    if reference.tag().is_some() {
        return Err(invalid("tag not allowed in a digest reference"));
    }
    Ok(reference)
}

fn is_sha256_digest(digest: &str) -> bool {
    digest
        .strip_prefix("sha256:")
        .is_some_and(|hex| {
            hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        })
}
