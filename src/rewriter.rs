//! Relocate a pulled bundle's image lock into the bundle's own repository.
//!
//! The rewrite is all or nothing. Every entry is relocated into a fresh list in memory
//! and checked against the registry; the file on disk is replaced only once every
//! relocated reference is known to exist. The first missing image ends the rewrite and
//! leaves the original document byte for byte.

use oci_client::Reference;
use std::path::Path;

use crate::error::Result;
use crate::lock::{self, ImageDesc, ImageLocation};
use crate::notifier::Notifier;
use crate::registry::{self, ImagesMetadata};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// The lock lists no images.
    NoImages,
    /// `missing` is not present in the bundle repository; the lock was left as is.
    Skipped { missing: String },
    Rewritten { count: usize },
}

pub struct LockRewriter<'a, R: ImagesMetadata + ?Sized> {
    registry: &'a R,
    notifier: &'a Notifier,
}

impl<'a, R: ImagesMetadata + ?Sized> LockRewriter<'a, R> {
    pub fn new(registry: &'a R, notifier: &'a Notifier) -> Self {
        Self { registry, notifier }
    }

    /// Rewrites `<bundle_dir>/.imgpkg/images.yml` so each image points into the
    /// repository of `bundle_ref`.
    pub fn rewrite(&self, bundle_dir: &Path, bundle_ref: &Reference) -> Result<RewriteOutcome> {
        let lock_path = lock::image_lock_path(bundle_dir);
        let mut image_lock = lock::read_image_lock(&lock_path)?;
        if image_lock.spec.images.is_empty() {
            return Ok(RewriteOutcome::NoImages);
        }

        self.notifier.info("Locating image lock file images...");
        let bundle_repo = registry::repository_name(bundle_ref);

        let mut relocated = Vec::with_capacity(image_lock.spec.images.len());
        for image in &image_lock.spec.images {
            let new_url = lock::image_with_repository(&image.location.digest_ref, &bundle_repo)?;
            let candidate = lock::parse_digest_ref(&new_url)?;

            if !self.registry.exists(&candidate)? {
                self.notifier.info(
                    "One or more images not found in bundle repo. Skipping lock file update",
                );
                return Ok(RewriteOutcome::Skipped { missing: new_url });
            }
            self.notifier
                .debug(&format!("Found {} as {}", image.location.digest_ref, new_url));

            relocated.push(ImageDesc {
                location: ImageLocation {
                    digest_ref: new_url,
                    original_tag: image.location.original_tag.clone(),
                },
                name: image.name.clone(),
                metadata: image.metadata.clone(),
            });
        }

        let count = relocated.len();
        image_lock.spec.images = relocated;
        self.notifier
            .info("All images found in bundle repo. Updating lock file");
        lock::write_image_lock(&lock_path, &image_lock)?;

        Ok(RewriteOutcome::Rewritten { count })
    }
}
