//! Package files and directories into one canonical tar layer.
//!
//! [`TarImage`] walks its inputs in a fixed order and writes every entry with constant
//! metadata, so the resulting stream depends only on the logical tree (relative paths and
//! file contents), never on timestamps, ownership, permissions or inode order.
//!
//! - Inputs are processed in the order given; directory contents are visited sorted by
//!   file name, parents before children.
//! - Entry names are relative to the input directory, or the base name for a file input.
//! - An exclusion matches the `/`-separated relative path exactly. A matching directory
//!   is pruned together with its whole subtree; a matching file is just omitted.
//! - Anything that is not a regular file or directory aborts the walk.
//!
//! The stream lands in a temporary file owned by the returned [`PackagedArtifact`];
//! dropping the artifact (or failing midway) removes it.

use oci_spec::image::MediaType;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar_rs as tar;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::notifier::Notifier;
use crate::registry::BUNDLE_ANNOTATION;

pub const DIR_MODE: u32 = 0o700;
pub const FILE_MODE: u32 = 0o600;

/// Media type recorded for the packaged layer.
pub fn layer_media_type() -> String {
    MediaType::ImageLayer.to_string()
}

/// A packaged layer backed by a temporary file.
#[derive(Debug)]
pub struct PackagedArtifact {
    file: NamedTempFile,
    bundle: bool,
    digest: String,
    size: u64,
}

impl PackagedArtifact {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn is_bundle(&self) -> bool {
        self.bundle
    }

    /// sha256 of the tar stream, `sha256:<hex>`.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Manifest annotations for this artifact; bundles carry the bundle marker.
    pub fn annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        if self.bundle {
            annotations.insert(BUNDLE_ANNOTATION.to_string(), "true".to_string());
        }
        annotations
    }

    pub fn read_bytes(&self) -> io::Result<Vec<u8>> {
        fs::read(self.file.path())
    }
}

pub struct TarImage<'a> {
    files: Vec<PathBuf>,
    exclude_paths: Vec<String>,
    notifier: &'a Notifier,
}

impl<'a> TarImage<'a> {
    pub fn new(files: Vec<PathBuf>, exclude_paths: Vec<String>, notifier: &'a Notifier) -> Self {
        Self {
            files,
            exclude_paths,
            notifier,
        }
    }

    pub fn as_file_bundle(&self) -> Result<PackagedArtifact> {
        self.as_file_image_with(true)
    }

    pub fn as_file_image(&self) -> Result<PackagedArtifact> {
        self.as_file_image_with(false)
    }

    fn as_file_image_with(&self, bundle: bool) -> Result<PackagedArtifact> {
        let tmp_file = tempfile::Builder::new()
            .prefix("imgbundle-tar-image")
            .tempfile()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;

        // On error `tmp_file` is dropped here, which deletes it.
        let writer = BufWriter::new(
            tmp_file
                .reopen()
                .map_err(|e| Error::io(tmp_file.path(), e))?,
        );
        self.create_tarball(writer)
            .and_then(|mut writer| writer.flush().map_err(|e| Error::io(tmp_file.path(), e)))?;

        let (digest, size) =
            digest_file(tmp_file.path()).map_err(|e| Error::io(tmp_file.path(), e))?;
        self.notifier
            .debug(&format!("Packaged {} bytes as {}", size, digest));

        Ok(PackagedArtifact {
            file: tmp_file,
            bundle,
            digest,
            size,
        })
    }

    /// Writes the whole tar stream into `out` and returns the inner writer.
    pub fn create_tarball<W: Write>(&self, out: W) -> Result<W> {
        let mut builder = tar::Builder::new(out);

        for path in &self.files {
            let info = fs::metadata(path).map_err(|e| Error::io(path, e))?;

            if info.is_dir() {
                self.add_dir_tree(path, &mut builder)?;
            } else if info.is_file() {
                let name = path
                    .file_name()
                    .map(PathBuf::from)
                    .ok_or_else(|| Error::NotRegularFile(path.clone()))?;
                self.add_file_to_tar(path, &name, info.len(), &mut builder)?;
            } else {
                return Err(Error::NotRegularFile(path.clone()));
            }
        }

        builder
            .into_inner()
            .map_err(|e| Error::io(self.files.last().cloned().unwrap_or_default(), e))
    }

    fn add_dir_tree<W: Write>(&self, root: &Path, builder: &mut tar::Builder<W>) -> Result<()> {
        let mut walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry?;
            let rel_path = entry
                .path()
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| entry.path().to_path_buf());
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if self.is_excluded(&rel_path) {
                    self.notifier
                        .debug(&format!("Excluding directory: {}", entry.path().display()));
                    walker.skip_current_dir();
                    continue;
                }
                self.add_dir_to_tar(&rel_path, builder)
                    .map_err(|e| Error::io(entry.path(), e))?;
            } else if file_type.is_file() {
                let size = entry.metadata()?.len();
                self.add_file_to_tar(entry.path(), &rel_path, size, builder)?;
            } else {
                return Err(Error::NotRegularFile(entry.path().to_path_buf()));
            }
        }

        Ok(())
    }

    fn add_dir_to_tar<W: Write>(
        &self,
        rel_path: &Path,
        builder: &mut tar::Builder<W>,
    ) -> io::Result<()> {
        self.notifier
            .info(&format!("dir: {}", archive_name(rel_path)));

        let mut header = canonical_header(tar::EntryType::Directory, DIR_MODE, 0);
        builder.append_data(&mut header, rel_path, io::empty())
    }

    fn add_file_to_tar<W: Write>(
        &self,
        full_path: &Path,
        rel_path: &Path,
        size: u64,
        builder: &mut tar::Builder<W>,
    ) -> Result<()> {
        if self.is_excluded(rel_path) {
            self.notifier
                .debug(&format!("Excluding file: {}", full_path.display()));
            return Ok(());
        }

        self.notifier
            .info(&format!("file: {}", archive_name(rel_path)));

        let file = File::open(full_path).map_err(|e| Error::io(full_path, e))?;
        let mut header = canonical_header(tar::EntryType::Regular, FILE_MODE, size);
        builder
            .append_data(&mut header, rel_path, ExactReader::new(file, size))
            .map_err(|e| Error::io(full_path, e))
    }

    fn is_excluded(&self, rel_path: &Path) -> bool {
        let name = archive_name(rel_path);
        self.exclude_paths.iter().any(|excluded| *excluded == name)
    }
}

/// Yields exactly `remaining` bytes of `inner`: extra bytes are cut off, and running
/// dry early is `UnexpectedEof`. The entry body must match its header size even when
/// the file changes while it is being archived.
struct ExactReader<R> {
    inner: io::Take<R>,
    remaining: u64,
}

impl<R: Read> ExactReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner: inner.take(size),
            remaining: size,
        }
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read == 0 && self.remaining > 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file shrank while archiving, {} bytes missing", self.remaining),
            ));
        }
        self.remaining -= read as u64;
        Ok(read)
    }
}

/// Header with every variable field pinned: fixed mode, zero mtime, root ownership.
fn canonical_header(entry_type: tar::EntryType, mode: u32, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

/// `/`-separated form of a relative path; this is both the archive name and the string
/// exclusions are compared against.
pub fn archive_name(rel_path: &Path) -> String {
    rel_path
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn digest_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((format!("sha256:{}", hex::encode(hasher.finalize())), size))
}
