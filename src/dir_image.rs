//! Materialize a pulled artifact into a directory.
//!
//! [`DirImage`] is the inverse of [`crate::archive::TarImage`]: each layer of the manifest
//! is downloaded into a temporary file and unpacked, in manifest order, into the target
//! directory. The target is expected to exist already; clearing and creating it is the
//! pull orchestrator's job, together with the output-path guard.

use oci_client::Reference;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::notifier::Notifier;
use crate::registry::{ImagesMetadata, LayerDescriptor, Manifest};
use crate::tar_extractor;

pub struct DirImage<'a, R: ImagesMetadata + ?Sized> {
    dir_path: PathBuf,
    reference: &'a Reference,
    manifest: &'a Manifest,
    registry: &'a R,
    notifier: &'a Notifier,
}

impl<'a, R: ImagesMetadata + ?Sized> DirImage<'a, R> {
    /// `reference` should already be pinned to `manifest.digest`.
    pub fn new(
        dir_path: impl Into<PathBuf>,
        reference: &'a Reference,
        manifest: &'a Manifest,
        registry: &'a R,
        notifier: &'a Notifier,
    ) -> Self {
        Self {
            dir_path: dir_path.into(),
            reference,
            manifest,
            registry,
            notifier,
        }
    }

    pub fn as_directory(&self) -> Result<()> {
        let layers = &self.manifest.layers;
        self.notifier.debug(&format!(
            "Extracting {} layer(s) of {} into {}",
            layers.len(),
            self.reference,
            self.dir_path.display()
        ));

        let progress = self
            .notifier
            .create_progress_bar(layers.len() as u64, "Extracting layers");

        for layer in layers {
            let layer_file = self.download_layer(layer)?;
            tar_extractor::extract_tar(layer_file.path(), &self.dir_path, self.notifier)?;
            if let Some(bar) = &progress {
                bar.inc(1);
            }
        }

        if let Some(bar) = progress {
            bar.finish_and_clear();
        }
        Ok(())
    }

    fn download_layer(&self, layer: &LayerDescriptor) -> Result<NamedTempFile> {
        self.notifier.debug(&format!(
            "Downloading layer {} ({} bytes, {})",
            layer.digest, layer.size, layer.media_type
        ));

        let temp_dir = std::env::temp_dir();
        let layer_file = tempfile::Builder::new()
            .prefix("imgbundle-layer")
            .tempfile()
            .map_err(|e| Error::io(&temp_dir, e))?;

        let mut writer = BufWriter::new(layer_file.as_file());
        self.registry
            .fetch_layer(self.reference, layer, &mut writer)?;
        writer.flush().map_err(|e| Error::io(layer_file.path(), e))?;
        drop(writer);

        Ok(layer_file)
    }
}
