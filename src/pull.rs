//! Pull an image or bundle into a local directory.
//!
//! [`Puller`] wires the pieces together for one pull:
//! 1. **Validate** the output path and pick the single [`RefSource`].
//! 2. **Resolve** the reference to a digest and fetch the pinned manifest.
//! 3. **Classify** the manifest against the caller's intent.
//! 4. **Replace** the output directory and materialize the layers into it.
//! 5. **Rewrite** the bundle's image lock when pulling a bundle by reference.
//!
//! Usage mistakes (several reference sources, none, or a dangerous output path) are
//! reported before the registry or the filesystem is touched.

use oci_client::Reference;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::classifier::{self, ArtifactKind, PullIntent};
use crate::dir_image::DirImage;
use crate::error::{Error, Result, UsageError};
use crate::lock;
use crate::notifier::Notifier;
use crate::registry::{self, ImagesMetadata};
use crate::rewriter::{LockRewriter, RewriteOutcome};

/// Where the reference to pull comes from. Exactly one per pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefSource {
    Image(String),
    Bundle(String),
    /// Path to a BundleLock naming the bundle's digest reference.
    Lock(PathBuf),
}

impl RefSource {
    /// Builds the source from the three optional CLI inputs. Empty values count as
    /// absent.
    pub fn from_flags(
        image: Option<String>,
        bundle: Option<String>,
        lock: Option<PathBuf>,
    ) -> Result<Self> {
        let mut sources = Vec::new();
        if let Some(path) = lock.filter(|p| !p.as_os_str().is_empty()) {
            sources.push(RefSource::Lock(path));
        }
        if let Some(image) = image.filter(|s| !s.is_empty()) {
            sources.push(RefSource::Image(image));
        }
        if let Some(bundle) = bundle.filter(|s| !s.is_empty()) {
            sources.push(RefSource::Bundle(bundle));
        }

        match sources.len() {
            0 => Err(UsageError::MissingReferenceSource.into()),
            1 => Ok(sources.remove(0)),
            _ => Err(UsageError::MultipleReferenceSources.into()),
        }
    }

    /// A BundleLock always names a bundle.
    pub fn intent(&self) -> PullIntent {
        match self {
            RefSource::Image(_) => PullIntent::Image,
            RefSource::Bundle(_) | RefSource::Lock(_) => PullIntent::Bundle,
        }
    }

    pub fn reference(&self) -> Result<Reference> {
        let raw = match self {
            RefSource::Image(image) => image.clone(),
            RefSource::Bundle(bundle) => bundle.clone(),
            RefSource::Lock(path) => lock::read_bundle_lock(path)?.spec.image.digest_ref,
        };
        raw.parse::<Reference>()
            .map_err(|e| Error::InvalidReference {
                reference: raw.clone(),
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct PullOptions {
    pub source: RefSource,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutcome {
    /// `registry/repository@digest` that was materialized.
    pub digest_ref: String,
    pub kind: ArtifactKind,
    /// Set for bundle pulls by reference (`-b`).
    pub rewrite: Option<RewriteOutcome>,
}

/// Rejects output directories that resolve to `/`, `.` or an ancestor of `.`, since the
/// output directory is deleted before extraction. `..` components are resolved
/// lexically, so `/tmp/..` and `out/..` are rejected too.
pub fn check_output_path(path: &Path) -> Result<()> {
    // Depth below the root or the current directory once `..` is applied.
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => depth = depth.saturating_sub(1),
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
        }
    }

    if depth == 0 {
        return Err(UsageError::DisallowedOutputPath.into());
    }
    Ok(())
}

pub struct Puller<'a, R: ImagesMetadata + ?Sized> {
    registry: &'a R,
    notifier: &'a Notifier,
}

impl<'a, R: ImagesMetadata + ?Sized> Puller<'a, R> {
    pub fn new(registry: &'a R, notifier: &'a Notifier) -> Self {
        Self { registry, notifier }
    }

    pub fn pull(&self, opts: &PullOptions) -> Result<PullOutcome> {
        check_output_path(&opts.output_path)?;
        let reference = opts.source.reference()?;

        let digest = self.registry.resolve(&reference)?;
        let pinned = registry::pin_digest(&reference, &digest);
        let manifest = self.registry.manifest(&pinned)?;
        let kind = classifier::classify(&manifest, opts.source.intent())?;

        let digest_ref = format!("{}@{}", registry::repository_name(&reference), digest);
        self.notifier
            .info(&format!("Pulling image '{}'", digest_ref));

        self.replace_output_dir(&opts.output_path)?;

        DirImage::new(
            &opts.output_path,
            &pinned,
            &manifest,
            self.registry,
            self.notifier,
        )
        .as_directory()?;

        // A BundleLock pins the bundle as pushed; its image lock is kept verbatim.
        let rewrite = match (&opts.source, kind) {
            (RefSource::Bundle(_), ArtifactKind::Bundle) => Some(
                LockRewriter::new(self.registry, self.notifier)
                    .rewrite(&opts.output_path, &reference)?,
            ),
            _ => None,
        };

        self.notifier.finish(&format!(
            "Succeeded pulling '{}' into {}",
            digest_ref,
            opts.output_path.display()
        ));

        Ok(PullOutcome {
            digest_ref,
            kind,
            rewrite,
        })
    }

    fn replace_output_dir(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => self
                .notifier
                .debug(&format!("Removed existing {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(path, e)),
        }

        fs::create_dir_all(path).map_err(|e| Error::io(path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o700))
                .map_err(|e| Error::io(path, e))?;
        }
        Ok(())
    }
}
