use crate::error::{Result, SquashError};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tar::Archive;
use tempfile::TempDir;

/// Gzip's two-byte magic number, checked so a caller can hand this either a
/// plain tar or a `.tar.gz` without having to know which in advance — image
/// archives pulled from a registry mirror or saved with `docker save | gzip`
/// show up in both forms.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Utility for extracting tar archives to temporary directories
pub struct TarExtractor {
    /// Temporary directory that holds extracted files, if the workspace is
    /// auto-cleaned. `None` when the caller supplied its own directory
    /// (`--tmp-dir`) to retain on failure.
    pub temp_dir: Option<TempDir>,
    /// Path to the extracted content
    pub extracted_path: PathBuf,
}

impl TarExtractor {
    /// Extract a tar file to a fresh temporary directory, removed once the
    /// extractor (and everything that borrowed its path) is dropped.
    pub fn extract(tar_path: &Path) -> Result<Self> {
        let temp_dir = TempDir::new().map_err(SquashError::IoError)?;
        let extracted_path = temp_dir.path().to_path_buf();
        Self::extract_into(tar_path, &extracted_path)?;
        Ok(TarExtractor {
            temp_dir: Some(temp_dir),
            extracted_path,
        })
    }

    /// Extract a tar file into a caller-chosen directory, which must not
    /// already exist: matches the `--tmp-dir` contract, where a workspace
    /// collision means a previous failed run was never cleaned up. The
    /// directory survives the extractor (no `TempDir` backs it), so a
    /// caller can inspect it after a failure.
    pub fn extract_to(tar_path: &Path, dest: &Path) -> Result<Self> {
        if dest.exists() {
            return Err(SquashError::WorkspaceExists(dest.to_path_buf()));
        }
        std::fs::create_dir_all(dest)?;
        Self::extract_into(tar_path, dest)?;
        Ok(TarExtractor {
            temp_dir: None,
            extracted_path: dest.to_path_buf(),
        })
    }

    fn extract_into(tar_path: &Path, dest: &Path) -> Result<()> {
        let mut file = BufReader::new(File::open(tar_path)?);
        let is_gzip = file.fill_buf()?.starts_with(&GZIP_MAGIC);

        if is_gzip {
            let archive = Archive::new(GzDecoder::new(file));
            Self::unpack_archive(archive, dest)
        } else {
            let archive = Archive::new(file);
            Self::unpack_archive(archive, dest)
        }
    }

    /// Common extraction logic for both regular and gzipped tar files
    fn unpack_archive<R: std::io::Read>(mut archive: Archive<R>, dest: &Path) -> Result<()> {
        archive.unpack(dest).map_err(classify_unpack_error)?;
        Ok(())
    }
}

/// Map an `io::Error` surfaced by `tar::Archive::unpack` to the taxonomy's
/// `ArchiveCorrupt`/`ArchiveTruncated` variants: a stream that ends mid-entry
/// is distinct from one with a malformed header, per spec.md §4.A.
fn classify_unpack_error(err: std::io::Error) -> SquashError {
    match err.kind() {
        std::io::ErrorKind::UnexpectedEof => SquashError::ArchiveTruncated(err.to_string()),
        _ => SquashError::ArchiveCorrupt(err.to_string()),
    }
}

/// Pack an existing directory's contents into a tar at `output_path`, rooted
/// at the archive root (no leading `./`, matching Docker's own layout).
/// Writes to a sibling temp file first and renames into place, so a failure
/// partway through never leaves a truncated archive at the destination.
pub fn pack_dir(dir: &Path, output_path: &Path) -> Result<()> {
    let parent = output_path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = output_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output");
    let tmp_path = parent.join(format!(".{}.tmp", file_name));

    {
        let file = File::create(&tmp_path)?;
        let mut archive = tar::Builder::new(file);
        archive.append_dir_all("", dir)?;
        archive.finish()?;
    }

    std::fs::rename(&tmp_path, output_path)?;
    Ok(())
}
