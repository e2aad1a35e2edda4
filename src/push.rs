//! Package local files and upload them as an image or a bundle.

use oci_client::Reference;
use std::path::PathBuf;

use crate::archive::TarImage;
use crate::classifier::ArtifactKind;
use crate::error::{Error, Result, UsageError};
use crate::lock::{self, BundleLock};
use crate::notifier::Notifier;
use crate::registry::{self, ImageWriter};

#[derive(Debug, Clone)]
pub struct PushOptions {
    pub reference: String,
    pub kind: ArtifactKind,
    pub files: Vec<PathBuf>,
    /// `/`-separated paths relative to an input directory.
    pub file_exclusions: Vec<String>,
    /// Where to write a BundleLock for the pushed bundle.
    pub lock_output: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    /// `registry/repository@digest` of the pushed manifest.
    pub digest_ref: String,
}

pub struct Pusher<'a, W: ImageWriter + ?Sized> {
    registry: &'a W,
    notifier: &'a Notifier,
}

impl<'a, W: ImageWriter + ?Sized> Pusher<'a, W> {
    pub fn new(registry: &'a W, notifier: &'a Notifier) -> Self {
        Self { registry, notifier }
    }

    pub fn push(&self, opts: &PushOptions) -> Result<PushOutcome> {
        if opts.files.is_empty() {
            return Err(UsageError::NoFiles.into());
        }
        if opts.lock_output.is_some() && opts.kind != ArtifactKind::Bundle {
            return Err(UsageError::LockOutputRequiresBundle.into());
        }

        let reference = opts
            .reference
            .parse::<Reference>()
            .map_err(|e| Error::InvalidReference {
                reference: opts.reference.clone(),
                reason: e.to_string(),
            })?;

        let tar_image = TarImage::new(
            opts.files.clone(),
            opts.file_exclusions.clone(),
            self.notifier,
        );
        let artifact = match opts.kind {
            ArtifactKind::Bundle => tar_image.as_file_bundle()?,
            ArtifactKind::Image => tar_image.as_file_image()?,
        };

        self.notifier
            .info(&format!("Pushing {} to '{}'", artifact.digest(), reference));
        let digest = self.registry.push(&reference, &artifact)?;
        let digest_ref = format!("{}@{}", registry::repository_name(&reference), digest);

        if let Some(path) = &opts.lock_output {
            let original_tag = reference.tag().unwrap_or_default().to_string();
            lock::write_bundle_lock(path, &BundleLock::new(digest_ref.clone(), original_tag))?;
            self.notifier
                .debug(&format!("Wrote bundle lock to {}", path.display()));
        }

        self.notifier.finish(&format!("Pushed '{}'", digest_ref));

        Ok(PushOutcome { digest_ref })
    }
}
