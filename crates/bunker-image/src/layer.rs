//! Filesystem layer extraction.
//!
//! An image's root filesystem is its layers unpacked bottom to top into one
//! subvolume. Later layers delete files from earlier ones with whiteouts:
//! `.wh.<name>` removes `<name>`, `.wh..wh..opq` empties its directory.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use bunker_common::error::{BunkerError, Result};

const WHITEOUT_PREFIX: &str = ".wh.";
const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

/// Compression of a layer blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Plain tar.
    None,
    /// Gzip-compressed tar.
    Gzip,
}

impl Compression {
    /// Derives the compression from a registry media type.
    #[must_use]
    pub fn from_media_type(media_type: &str) -> Self {
        if media_type.ends_with("gzip") {
            Self::Gzip
        } else {
            Self::None
        }
    }
}

/// Counts of what one layer did to the root filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    /// Entries written.
    pub unpacked: usize,
    /// Paths removed by whiteouts.
    pub whited_out: usize,
}

/// Unpacks one layer read from `reader` on top of `target`.
///
/// Returns the reader once the archive has been consumed so the caller can
/// drain and verify it.
///
/// # Errors
///
/// Returns an error if the archive is corrupt or an entry cannot be written.
pub fn unpack<R: Read>(reader: R, compression: Compression, target: &Path) -> Result<(R, LayerStats)> {
    match compression {
        Compression::Gzip => {
            let (decoder, stats) = unpack_tar(flate2::read::GzDecoder::new(reader), target)?;
            Ok((decoder.into_inner(), stats))
        }
        Compression::None => unpack_tar(reader, target),
    }
}

fn unpack_tar<R: Read>(reader: R, target: &Path) -> Result<(R, LayerStats)> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    let mut stats = LayerStats::default();

    let entries = archive.entries().map_err(|e| BunkerError::io(target, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| BunkerError::io(target, e))?;
        let path: PathBuf = entry.path().map_err(|e| BunkerError::io(target, e))?.into_owned();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent = path.parent().unwrap_or_else(|| Path::new(""));

        if name == WHITEOUT_OPAQUE || name.starts_with(WHITEOUT_PREFIX) {
            let Some(dir) = whiteout_dir(target, parent) else {
                tracing::warn!(path = %path.display(), "skipping whiteout outside the root");
                continue;
            };
            if name == WHITEOUT_OPAQUE {
                stats.whited_out += clear_dir(&dir)?;
            } else if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
                if remove_path(&dir.join(hidden))? {
                    stats.whited_out += 1;
                }
            }
        } else if entry.unpack_in(target).map_err(|e| BunkerError::io(target.join(&path), e))? {
            stats.unpacked += 1;
        } else {
            tracing::warn!(path = %path.display(), "skipping entry outside the root");
        }
    }
    let reader = archive.into_inner();
    tracing::debug!(target = %target.display(), ?stats, "layer unpacked");
    Ok((reader, stats))
}

/// Directory a whiteout under `parent` applies to, if it resolves inside
/// `target`. Symbolic links from earlier layers are followed before the check.
fn whiteout_dir(target: &Path, parent: &Path) -> Option<PathBuf> {
    if !parent
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    let root = target.canonicalize().ok()?;
    let dir = target.join(parent).canonicalize().ok()?;
    dir.starts_with(&root).then_some(dir)
}

fn remove_path(path: &Path) -> Result<bool> {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Ok(false);
    };
    let removed = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    removed.map_err(|e| BunkerError::io(path, e))?;
    Ok(true)
}

fn clear_dir(dir: &Path) -> Result<usize> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Ok(0);
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| BunkerError::io(dir, e))?;
        if remove_path(&entry.path())? {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tar_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, *data)
                .expect("failed to append data");
        }
        builder.into_inner().expect("failed to finish tar")
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).expect("gzip write");
        encoder.finish().expect("gzip finish")
    }

    #[test]
    fn media_types_map_to_compression() {
        assert_eq!(
            Compression::from_media_type("application/vnd.docker.image.rootfs.diff.tar.gzip"),
            Compression::Gzip
        );
        assert_eq!(
            Compression::from_media_type("application/vnd.oci.image.layer.v1.tar+gzip"),
            Compression::Gzip
        );
        assert_eq!(
            Compression::from_media_type("application/vnd.oci.image.layer.v1.tar"),
            Compression::None
        );
    }

    #[test]
    fn gzip_layer_is_unpacked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blob = gzip(&tar_of(&[("etc/hostname", b"box\n"), ("hello.txt", b"hi")]));

        let (_, stats) = unpack(&blob[..], Compression::Gzip, dir.path()).expect("unpack");
        assert_eq!(stats.unpacked, 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("etc/hostname")).expect("read"),
            "box\n"
        );
    }

    #[test]
    fn whiteout_removes_lower_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lower = tar_of(&[("keep.txt", b"keep"), ("drop.txt", b"drop")]);
        let upper = tar_of(&[(".wh.drop.txt", b"")]);

        let _ = unpack(&lower[..], Compression::None, dir.path()).expect("lower");
        let (_, stats) = unpack(&upper[..], Compression::None, dir.path()).expect("upper");

        assert_eq!(stats.whited_out, 1);
        assert!(dir.path().join("keep.txt").exists());
        assert!(!dir.path().join("drop.txt").exists());
        assert!(!dir.path().join(".wh.drop.txt").exists());
    }

    #[test]
    fn opaque_whiteout_empties_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lower = tar_of(&[("data/a", b"a"), ("data/b", b"b")]);
        let upper = tar_of(&[("data/.wh..wh..opq", b""), ("data/c", b"c")]);

        let _ = unpack(&lower[..], Compression::None, dir.path()).expect("lower");
        let _ = unpack(&upper[..], Compression::None, dir.path()).expect("upper");

        assert!(!dir.path().join("data/a").exists());
        assert!(!dir.path().join("data/b").exists());
        assert!(dir.path().join("data/c").exists());
    }

    fn tar_with_raw_name(name: &str) -> Vec<u8> {
        let mut header = tar::Header::new_gnu();
        let field = &mut header.as_gnu_mut().expect("gnu header").name;
        field[..name.len()].copy_from_slice(name.as_bytes());
        header.set_size(0);
        header.set_mode(0o644);
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, &b""[..]).expect("append");
        builder.into_inner().expect("failed to finish tar")
    }

    #[test]
    fn whiteout_cannot_climb_out_of_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("image_x");
        std::fs::create_dir(&root).expect("mkdir");
        let victim = dir.path().join("victim.txt");
        std::fs::write(&victim, "host").expect("write");

        let layer = tar_with_raw_name("../.wh.victim.txt");
        let (_, stats) = unpack(&layer[..], Compression::None, &root).expect("unpack");
        assert_eq!(stats.whited_out, 0);
        assert!(victim.exists());

        let opaque = tar_with_raw_name("../.wh..wh..opq");
        let _ = unpack(&opaque[..], Compression::None, &root).expect("unpack");
        assert!(victim.exists());
    }

    #[test]
    fn whiteout_does_not_follow_links_out_of_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("image_x");
        let outside = dir.path().join("host");
        std::fs::create_dir(&root).expect("mkdir");
        std::fs::create_dir(&outside).expect("mkdir");
        std::fs::write(outside.join("victim.txt"), "host").expect("write");

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        header.set_link_name("../host").expect("link name");
        builder
            .append_data(&mut header, "escape", std::io::empty())
            .expect("append link");
        let lower = builder.into_inner().expect("failed to finish tar");
        let upper = tar_of(&[("escape/.wh.victim.txt", b"")]);

        let _ = unpack(&lower[..], Compression::None, &root).expect("lower");
        let (_, stats) = unpack(&upper[..], Compression::None, &root).expect("upper");
        assert_eq!(stats.whited_out, 0);
        assert!(outside.join("victim.txt").exists());
    }

    #[test]
    fn corrupt_gzip_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(unpack(&b"not gzip at all"[..], Compression::Gzip, dir.path()).is_err());
    }
}
