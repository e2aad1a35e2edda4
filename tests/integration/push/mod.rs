//! Push integration tests
//!
//! The pushed digest depends only on the logical tree, and packaging refuses anything
//! that is not a regular file or directory.

use crate::integration::common::{self, BUNDLE_REF, IMAGE_REF};
use anyhow::Result;
use imgbundle::registry::pin_digest;
use imgbundle::{
    ArtifactKind, Error, ImagesMetadata, MemoryRegistry, Notifier, PullOptions, Puller,
    PushOptions, Pusher, RefSource,
};
use oci_client::Reference;
use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &[(&str, &str)] = &[
        ("z.txt", "last"),
        ("a/inner.txt", "inner"),
        ("a/b/deep.txt", "deep"),
        ("m.txt", "middle"),
    ];

    fn touch(path: &Path, secs: u64) -> Result<()> {
        File::options()
            .write(true)
            .open(path)?
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))?;
        Ok(())
    }

    #[test]
    fn test_same_tree_same_digest() -> Result<()> {
        let first = TempDir::new()?;
        let second = TempDir::new()?;
        common::write_tree(first.path(), TREE)?;
        // Written in a different order with different timestamps.
        for (rel, content) in TREE.iter().rev() {
            common::write_tree(second.path(), &[(*rel, *content)])?;
        }
        touch(&second.path().join("z.txt"), 1_000_000)?;
        touch(&second.path().join("a/b/deep.txt"), 42)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(
                second.path().join("m.txt"),
                fs::Permissions::from_mode(0o755),
            )?;
        }

        let registry = MemoryRegistry::new();
        let push = |tag: &str, dir: &Path| {
            let reference = format!("registry.example.com/x/app:{}", tag);
            common::push_dir(&registry, &reference, dir, ArtifactKind::Image, &[])
        };
        let a = push("one", first.path())?;
        let b = push("two", second.path())?;
        assert_eq!(a.digest_ref, b.digest_ref);

        // A content change moves the digest.
        common::write_tree(second.path(), &[("m.txt", "changed")])?;
        let c = push("three", second.path())?;
        assert_ne!(a.digest_ref, c.digest_ref);
        Ok(())
    }

    #[test]
    fn test_image_and_bundle_of_same_tree_differ() -> Result<()> {
        let source = TempDir::new()?;
        common::write_tree(source.path(), TREE)?;

        let registry = MemoryRegistry::new();
        let image = common::push_dir(&registry, IMAGE_REF, source.path(), ArtifactKind::Image, &[])?;
        let bundle = common::push_dir(&registry, BUNDLE_REF, source.path(), ArtifactKind::Bundle, &[])?;

        let image_digest = image.digest_ref.rsplit('@').next().unwrap_or_default().to_string();
        let bundle_digest = bundle.digest_ref.rsplit('@').next().unwrap_or_default().to_string();
        assert_ne!(image_digest, bundle_digest);

        let reference: Reference = BUNDLE_REF.parse()?;
        let manifest = registry.manifest(&pin_digest(&reference, &bundle_digest))?;
        assert!(manifest.is_bundle());
        Ok(())
    }

    #[test]
    fn test_file_inputs_use_base_name() -> Result<()> {
        let inputs = TempDir::new()?;
        common::write_tree(
            inputs.path(),
            &[("nested/deploy.yml", "kind: Deployment"), ("extra/README", "docs")],
        )?;

        let registry = MemoryRegistry::new();
        let notifier = Notifier::new(2);
        Pusher::new(&registry, &notifier).push(&PushOptions {
            reference: IMAGE_REF.to_string(),
            kind: ArtifactKind::Image,
            files: vec![
                inputs.path().join("nested/deploy.yml"),
                inputs.path().join("extra"),
            ],
            file_exclusions: Vec::new(),
            lock_output: None,
        })?;

        let out = TempDir::new()?;
        let target = out.path().join("pulled");
        Puller::new(&registry, &notifier).pull(&PullOptions {
            source: RefSource::Image(IMAGE_REF.to_string()),
            output_path: target.clone(),
        })?;

        let tree = common::read_tree(&target)?;
        assert_eq!(tree.get("deploy.yml").map(String::as_str), Some("kind: Deployment"));
        assert_eq!(tree.get("README").map(String::as_str), Some("docs"));
        assert_eq!(tree.len(), 2);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_aborts_push() -> Result<()> {
        let source = TempDir::new()?;
        common::write_tree(source.path(), &[("real.txt", "data")])?;
        std::os::unix::fs::symlink(source.path().join("real.txt"), source.path().join("link"))?;

        let registry = MemoryRegistry::new();
        let err = common::push_dir(&registry, IMAGE_REF, source.path(), ArtifactKind::Image, &[])
            .unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::NotRegularFile(path)) => assert!(path.ends_with("link")),
            other => panic!("expected NotRegularFile, got {:?}", other),
        }

        let reference: Reference = IMAGE_REF.parse()?;
        assert!(!registry.exists(&reference)?);

        // Exclusions only apply to regular files and directories.
        let err = common::push_dir(&registry, IMAGE_REF, source.path(), ArtifactKind::Image, &["link"])
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NotRegularFile(_))));
        Ok(())
    }
}
