use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path};
use thiserror::Error;

/// Archive container format, decided purely by content magic. Upstream
/// producers routinely mislabel extensions (`.tar.gz` holding plain tar and
/// the reverse), so filenames are advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    Gzip,
    Bzip2,
    Unknown,
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unknown archive format")]
    UnknownFormat,
    #[error("archive entry {0} escapes the extraction directory")]
    PathTraversal(String),
    #[error("archive read failed: {0}")]
    Io(#[from] io::Error),
}

/// Classify the first bytes of an archive.
///
/// Gzip is `1f 8b`, bzip2 starts with `BZh`, and a ustar header carries its
/// magic at offset 257.
pub fn classify_magic(header: &[u8]) -> ArchiveKind {
    if header.len() >= 2 && header[0] == 0x1f && header[1] == 0x8b {
        return ArchiveKind::Gzip;
    }
    if header.len() >= 3 && &header[..3] == b"BZh" {
        return ArchiveKind::Bzip2;
    }
    if header.len() >= 262 && &header[257..262] == b"ustar" {
        return ArchiveKind::Tar;
    }
    ArchiveKind::Unknown
}

pub fn detect_archive_kind(path: &Path) -> io::Result<ArchiveKind> {
    let mut file = File::open(path)?;
    let mut header = [0u8; 512];
    let read = read_up_to(&mut file, &mut header)?;
    Ok(classify_magic(&header[..read]))
}

fn read_up_to<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Extract an archive into `dest`, selecting the decompression pipeline from
/// content magic. Any entry that would land outside `dest` aborts the whole
/// extraction; a partially-extracted batch is never processed.
pub fn extract_archive(path: &Path, dest: &Path) -> Result<(), ExtractError> {
    match detect_archive_kind(path)? {
        ArchiveKind::Tar => unpack_entries(tar::Archive::new(File::open(path)?), dest),
        ArchiveKind::Gzip => {
            unpack_entries(tar::Archive::new(GzDecoder::new(File::open(path)?)), dest)
        }
        ArchiveKind::Bzip2 => {
            unpack_entries(tar::Archive::new(BzDecoder::new(File::open(path)?)), dest)
        }
        ArchiveKind::Unknown => Err(ExtractError::UnknownFormat),
    }
}

fn unpack_entries<R: Read>(mut archive: tar::Archive<R>, dest: &Path) -> Result<(), ExtractError> {
    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_path = entry.path()?.into_owned();

        if raw_path.is_absolute()
            || raw_path
                .components()
                .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(ExtractError::PathTraversal(
                raw_path.display().to_string(),
            ));
        }

        entry.unpack_in(dest)?;
    }
    Ok(())
}
