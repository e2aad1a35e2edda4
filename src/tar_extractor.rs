use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek};
use std::path::{Component, Path, PathBuf};
use tar_rs as tar;

use crate::archive::{DIR_MODE, FILE_MODE};
use crate::error::{Error, Result};
use crate::notifier::Notifier;

/// Normalizes a path from a tar archive so it stays under the extraction root.
fn normalize_tar_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for comp in p.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(c) => out.push(c),
            Component::RootDir | Component::Prefix(_) => {}
        }
    }

    out
}

fn open_layer(tar_path: &Path) -> io::Result<Box<dyn Read>> {
    let mut file = File::open(tar_path)?;
    let mut magic_bytes = [0u8; 2];
    let read = file.read(&mut magic_bytes)?;
    file.rewind()?;

    let reader = BufReader::new(file);
    if read == 2 && magic_bytes == [0x1f, 0x8b] {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Extracts a layer tarball (plain or gzipped) into `extract_dir`.
///
/// Directories and regular files are recreated; any other entry type is skipped with a
/// warning. One `notifier` line is emitted per extracted entry.
pub fn extract_tar(tar_path: &Path, extract_dir: &Path, notifier: &Notifier) -> Result<()> {
    let reader = open_layer(tar_path).map_err(|e| Error::io(tar_path, e))?;
    let mut archive = tar::Archive::new(reader);

    let entries = archive.entries().map_err(|e| Error::io(tar_path, e))?;
    for entry_result in entries {
        let mut entry = entry_result.map_err(|e| Error::io(tar_path, e))?;
        let entry_type = entry.header().entry_type();
        let mode = entry.header().mode().ok();

        let rel_path = normalize_tar_path(&entry.path().map_err(|e| Error::io(tar_path, e))?);
        if rel_path.as_os_str().is_empty() {
            // "./" or an entry that normalized away; the root already exists.
            continue;
        }
        let dest = extract_dir.join(&rel_path);

        match entry_type {
            tar::EntryType::Directory => {
                notifier.info(&format!("dir: {}", rel_path.display()));
                fs::create_dir_all(&dest).map_err(|e| Error::io(&dest, e))?;
                set_mode(&dest, mode.unwrap_or(DIR_MODE) | 0o700);
            }
            tar::EntryType::Regular => {
                notifier.info(&format!("file: {}", rel_path.display()));
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
                }

                // Replace whatever an earlier layer left at this path.
                if let Ok(metadata) = fs::symlink_metadata(&dest) {
                    if metadata.is_dir() {
                        fs::remove_dir_all(&dest).map_err(|e| Error::io(&dest, e))?;
                    }
                }

                let mut out_file = File::create(&dest).map_err(|e| Error::io(&dest, e))?;
                io::copy(&mut entry, &mut out_file).map_err(|e| Error::io(&dest, e))?;
                set_mode(&dest, mode.unwrap_or(FILE_MODE) | 0o600);
            }
            other => {
                notifier.warn(&format!(
                    "Skipping unsupported entry type {:?}: {}",
                    other,
                    rel_path.display()
                ));
            }
        }
    }

    Ok(())
}

/// Owner read/write is always kept so the tree can be cleaned up and re-pulled.
fn set_mode(path: &Path, mode: u32) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777)) {
            log::warn!("Failed to set permissions on {}: {}", path.display(), e);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
}
