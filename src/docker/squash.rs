//! The squash engine (component D): merges an ordered run of layer tars into
//! a single layer tar, applying Docker's union-filesystem semantics.
//!
//! Grounded on `docker_squash.image.Image._squash_layers` / `_marker_files` /
//! `_file_should_be_skipped` / `_files_in_layers`, reproduced field-for-field
//! including the `# https://github.com/goldmann/docker-squash/issues/253`
//! type-confusion guard. Streaming shape (two file opens per layer instead of
//! materializing file contents in a `HashMap`) is grounded on
//! `peimage::squash::squash`'s two-pass-per-layer approach; the teacher's own
//! `VirtualFilesystem`/`FileData::OnDisk` attempt at this is replaced
//! entirely, it never got past a documented stub.

use crate::docker::layer::LayerInfo;
use crate::docker::path::{self, Whiteout};
use crate::error::{Result, SquashError};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};

/// Outcome of a successful squash, used for verbose logging by the
/// orchestrator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SquashStats {
    pub files_written: usize,
    pub markers_written: usize,
}

/// Merge `layers_to_squash` (oldest→newest) into one new layer tar at
/// `output_path`, treating `layers_to_move` (the layers being kept
/// untouched, oldest→newest, i.e. everything *below* the squashed run) as
/// the filesystem state whiteout markers must still be able to reach.
pub fn squash_layers(
    layers_to_squash: &[LayerInfo],
    layers_to_move: &[LayerInfo],
    output_path: &Path,
) -> Result<SquashStats> {
    let files_in_layers_to_move = files_in_layers(layers_to_move)?;

    // Process newest to oldest so that a file created by a later instruction
    // always wins over one created earlier, and so whiteouts in newer layers
    // are known before we reach the older layer they hide.
    let mut newest_first: Vec<&LayerInfo> = layers_to_squash.iter().collect();
    newest_first.reverse();

    let output_file = File::create(output_path)?;
    let mut squashed_tar = tar::Builder::new(output_file);

    let mut files_to_skip: HashSet<PathBuf> = HashSet::new();
    let mut squashed_files: HashSet<PathBuf> = HashSet::new();
    let mut directories_to_skip: HashSet<PathBuf> = HashSet::new();
    let mut marker_staging: Vec<StagedMarker> = Vec::new();
    let mut staged_targets: HashSet<PathBuf> = HashSet::new();
    let mut stats = SquashStats::default();

    for layer in newest_first {
        let Some(tar_path) = layer.tar_path.as_deref() else {
            // Empty layer: no tar, nothing to merge.
            continue;
        };

        let opaque_dirs = scan_markers(
            tar_path,
            &files_in_layers_to_move,
            &squashed_files,
            &mut files_to_skip,
        )?;

        let mut reader = Archive::new(File::open(tar_path)?);
        let entries = reader
            .entries()
            .map_err(|e| SquashError::ArchiveCorrupt(format!("{}: {}", tar_path.display(), e)))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| SquashError::ArchiveCorrupt(format!("{}: {}", tar_path.display(), e)))?;
            let raw_path = entry
                .path()
                .map_err(|e| SquashError::ArchiveCorrupt(e.to_string()))?
                .into_owned();
            let normalized = path::normalize(&raw_path);

            // Opaque markers fall through to plain emission below (their
            // effect on older layers is recorded via `directories_to_skip`
            // once the whole layer is done). Plain whiteout markers that
            // weren't absorbed into `files_to_skip` are held back: whether
            // they ultimately get written depends on marker reduction,
            // which can only run once every layer's markers are known.
            if let Some(Whiteout::File(target)) = path::parse_whiteout(&normalized) {
                if files_to_skip.contains(&normalized) {
                    continue;
                }
                if staged_targets.insert(target.clone()) {
                    let mut content = Vec::new();
                    entry.read_to_end(&mut content)?;
                    marker_staging.push(StagedMarker {
                        target,
                        marker_path: raw_path.clone(),
                        header: entry.header().clone(),
                        content,
                    });
                }
                continue;
            }

            if should_skip(&normalized, &files_to_skip, &directories_to_skip) {
                continue;
            }

            if squashed_files.contains(&normalized) {
                // A newer layer already wrote this path; this copy is stale.
                continue;
            }

            let entry_type = entry.header().entry_type();

            if entry_type != EntryType::Directory {
                // https://github.com/goldmann/docker-squash/issues/253 —
                // a file here must shadow a same-named directory from an
                // older layer, and that directory's children too.
                directories_to_skip.insert(normalized.clone());
            }

            let mut header = entry.header().clone();

            if entry_type == EntryType::Link {
                // Hard links are rewritten to regular files: leaving them as
                // links into an older, now-possibly-deleted layer's target
                // breaks the merged archive.
                let link_name = entry
                    .link_name()
                    .map_err(|e| SquashError::ArchiveCorrupt(e.to_string()))?
                    .ok_or_else(|| {
                        SquashError::BrokenHardLink(format!(
                            "{} has no link target",
                            raw_path.display()
                        ))
                    })?
                    .into_owned();

                let (target_header, content) = resolve_hardlink_target(tar_path, &link_name)?;
                let mut rewritten = header.clone();
                rewritten.set_entry_type(target_header.entry_type());
                rewritten.set_size(target_header.size().unwrap_or(0));
                squashed_tar
                    .append_data(&mut rewritten, &raw_path, content.as_slice())?;
            } else if entry_type == EntryType::Regular {
                squashed_tar.append(&header, &mut entry)?;
            } else {
                let mut empty: &[u8] = &[];
                squashed_tar.append_data(&mut header, &raw_path, &mut empty)?;
            }

            if path::is_whiteout(file_name(&normalized)) || path::is_opaque(file_name(&normalized)) {
                stats.markers_written += 1;
            } else {
                stats.files_written += 1;
            }

            squashed_files.insert(normalized);
        }

        directories_to_skip.extend(opaque_dirs);
    }

    // Every staged marker already cleared the "target lives in a moved
    // layer, not yet shadowed" test; what's left is dropping markers whose
    // target sits inside a directory some other surviving marker already
    // whites out wholesale (https://github.com/goldmann/docker-squash,
    // runtimes reject an image carrying both).
    let targets: Vec<PathBuf> = marker_staging.iter().map(|m| m.target.clone()).collect();
    let kept_targets: HashSet<PathBuf> = path::reduce_markers(&targets).into_iter().collect();

    for marker in &marker_staging {
        if !kept_targets.contains(&marker.target) {
            continue;
        }
        let mut header = marker.header.clone();
        squashed_tar.append_data(&mut header, &marker.marker_path, marker.content.as_slice())?;
        stats.markers_written += 1;
    }

    squashed_tar.finish()?;
    Ok(stats)
}

/// A plain whiteout marker (never an opaque-directory marker) held back
/// from immediate emission until the full set of surviving markers is
/// known, so redundant nested markers can be reduced away.
struct StagedMarker {
    /// The normalized path the marker hides, used for reduction.
    target: PathBuf,
    /// The marker's own path as it appeared in the source layer, used to
    /// write it back out unchanged.
    marker_path: PathBuf,
    header: tar::Header,
    content: Vec<u8>,
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

/// Collect the set of normalized paths present (as headers, no content read)
/// across every non-empty layer in `layers`.
fn files_in_layers(layers: &[LayerInfo]) -> Result<HashSet<PathBuf>> {
    let mut files = HashSet::new();

    for layer in layers {
        let Some(tar_path) = layer.tar_path.as_deref() else {
            continue;
        };

        let mut archive = Archive::new(File::open(tar_path)?);
        let entries = archive
            .entries()
            .map_err(|e| SquashError::ArchiveCorrupt(format!("{}: {}", tar_path.display(), e)))?;

        for entry in entries {
            let entry =
                entry.map_err(|e| SquashError::ArchiveCorrupt(format!("{}: {}", tar_path.display(), e)))?;
            let raw_path = entry
                .path()
                .map_err(|e| SquashError::ArchiveCorrupt(e.to_string()))?
                .into_owned();
            files.insert(path::normalize(&raw_path));
        }
    }

    Ok(files)
}

/// Header-only pass over one layer's tar: classify whiteout markers,
/// populate `files_to_skip` with the files they hide, and decide whether
/// each marker itself needs to survive into the squashed output (only if
/// the file it hides lives in a layer being kept, not one being squashed
/// away). Returns this layer's opaque-directory targets, left for the
/// caller to fold into `directories_to_skip` only *after* this layer's own
/// entries have been copied — an opaque marker never hides siblings
/// created in the very same layer.
fn scan_markers(
    tar_path: &Path,
    files_in_layers_to_move: &HashSet<PathBuf>,
    squashed_files: &HashSet<PathBuf>,
    files_to_skip: &mut HashSet<PathBuf>,
) -> Result<Vec<PathBuf>> {
    let mut opaque_dirs = Vec::new();

    let mut archive = Archive::new(File::open(tar_path)?);
    let entries = archive
        .entries()
        .map_err(|e| SquashError::ArchiveCorrupt(format!("{}: {}", tar_path.display(), e)))?;

    for entry in entries {
        let entry =
            entry.map_err(|e| SquashError::ArchiveCorrupt(format!("{}: {}", tar_path.display(), e)))?;
        let raw_path = entry
            .path()
            .map_err(|e| SquashError::ArchiveCorrupt(e.to_string()))?
            .into_owned();
        let normalized = path::normalize(&raw_path);

        match path::parse_whiteout(&normalized) {
            Some(Whiteout::Opaque(dir)) => opaque_dirs.push(dir),
            Some(Whiteout::File(actual_file)) => {
                files_to_skip.insert(actual_file.clone());

                if squashed_files.contains(&actual_file)
                    || !files_in_layers_to_move.contains(&actual_file)
                {
                    files_to_skip.insert(normalized);
                }
            }
            None => {}
        }
    }

    Ok(opaque_dirs)
}

fn should_skip(
    normalized: &Path,
    files_to_skip: &HashSet<PathBuf>,
    directories_to_skip: &HashSet<PathBuf>,
) -> bool {
    if files_to_skip.contains(normalized) {
        return true;
    }

    for ancestor in path::ancestors(normalized) {
        if files_to_skip.contains(&ancestor) || directories_to_skip.contains(&ancestor) {
            return true;
        }
    }

    false
}

/// Re-open `tar_path` to find the header and content of a hard link's
/// target member. Hard link targets are expected to be small (ordinary
/// files), so unlike the rest of this engine it is fine to buffer the
/// target's bytes.
fn resolve_hardlink_target(tar_path: &Path, link_name: &Path) -> Result<(tar::Header, Vec<u8>)> {
    let target_normalized = path::normalize(link_name);
    let mut archive = Archive::new(File::open(tar_path)?);
    let entries = archive
        .entries()
        .map_err(|e| SquashError::ArchiveCorrupt(format!("{}: {}", tar_path.display(), e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| SquashError::ArchiveCorrupt(format!("{}: {}", tar_path.display(), e)))?;
        let raw_path = entry
            .path()
            .map_err(|e| SquashError::ArchiveCorrupt(e.to_string()))?
            .into_owned();

        if path::normalize(&raw_path) == target_normalized {
            let header = entry.header().clone();
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok((header, content));
        }
    }

    Err(SquashError::BrokenHardLink(format!(
        "link target '{}' not found in '{}'",
        link_name.display(),
        tar_path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_layer_tar(dir: &Path, name: &str, entries: &[(&str, EntryType, &[u8])]) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(file);

        for (entry_path, entry_type, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(entry_path).unwrap();
            header.set_entry_type(*entry_type);
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, *content).unwrap();
        }

        builder.finish().unwrap();
        path
    }

    fn layer(tar_path: PathBuf, digest: &str) -> LayerInfo {
        LayerInfo {
            digest: digest.to_string(),
            size: std::fs::metadata(&tar_path).unwrap().len(),
            tar_path: Some(tar_path),
        }
    }

    fn read_output_paths(path: &Path) -> Vec<String> {
        let mut archive = Archive::new(File::open(path).unwrap());
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn newer_file_shadows_older_file() {
        let dir = TempDir::new().unwrap();
        let older = write_layer_tar(
            dir.path(),
            "older.tar",
            &[("file.txt", EntryType::Regular, b"old content")],
        );
        let newer = write_layer_tar(
            dir.path(),
            "newer.tar",
            &[("file.txt", EntryType::Regular, b"new content")],
        );

        let to_squash = vec![layer(older, "sha256:older"), layer(newer, "sha256:newer")];
        let output_path = dir.path().join("squashed.tar");

        let stats = squash_layers(&to_squash, &[], &output_path).unwrap();
        assert_eq!(stats.files_written, 1);

        let mut archive = Archive::new(File::open(&output_path).unwrap());
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"new content");
    }

    #[test]
    fn whiteout_of_file_fully_inside_squash_set_is_dropped() {
        let dir = TempDir::new().unwrap();
        let base = write_layer_tar(
            dir.path(),
            "base.tar",
            &[("deleted.txt", EntryType::Regular, b"gone soon")],
        );
        let deleter = write_layer_tar(
            dir.path(),
            "deleter.tar",
            &[(".wh.deleted.txt", EntryType::Regular, b"")],
        );

        let to_squash = vec![layer(base, "sha256:base"), layer(deleter, "sha256:deleter")];
        let output_path = dir.path().join("squashed.tar");

        let stats = squash_layers(&to_squash, &[], &output_path).unwrap();
        assert_eq!(stats.files_written, 0);
        assert_eq!(stats.markers_written, 0);
        assert!(read_output_paths(&output_path).is_empty());
    }

    #[test]
    fn whiteout_of_file_in_kept_layer_survives_as_marker() {
        let dir = TempDir::new().unwrap();
        let kept = write_layer_tar(
            dir.path(),
            "kept.tar",
            &[("config.txt", EntryType::Regular, b"from base image")],
        );
        let deleter = write_layer_tar(
            dir.path(),
            "deleter.tar",
            &[(".wh.config.txt", EntryType::Regular, b"")],
        );

        let layers_to_move = vec![layer(kept, "sha256:kept")];
        let to_squash = vec![layer(deleter, "sha256:deleter")];
        let output_path = dir.path().join("squashed.tar");

        // A single-layer squash set is normally rejected by the selector,
        // but the engine itself has no minimum-length requirement.
        let stats = squash_layers(&to_squash, &layers_to_move, &output_path).unwrap();
        assert_eq!(stats.markers_written, 1);

        let paths = read_output_paths(&output_path);
        assert_eq!(paths, vec![".wh.config.txt".to_string()]);
    }

    #[test]
    fn opaque_directory_hides_older_directory_contents_but_not_own_new_file() {
        let dir = TempDir::new().unwrap();
        let base = write_layer_tar(
            dir.path(),
            "base.tar",
            &[
                ("data/old1.txt", EntryType::Regular, b"one"),
                ("data/old2.txt", EntryType::Regular, b"two"),
            ],
        );
        let opaque_layer = write_layer_tar(
            dir.path(),
            "opaque.tar",
            &[
                ("data/.wh..wh..opq", EntryType::Regular, b""),
                ("data/new.txt", EntryType::Regular, b"fresh"),
            ],
        );

        let to_squash = vec![
            layer(base, "sha256:base"),
            layer(opaque_layer, "sha256:opaque"),
        ];
        let output_path = dir.path().join("squashed.tar");

        squash_layers(&to_squash, &[], &output_path).unwrap();
        let mut paths = read_output_paths(&output_path);
        paths.sort();
        assert_eq!(paths, vec!["data/.wh..wh..opq", "data/new.txt"]);
    }

    #[test]
    fn hard_link_is_rewritten_to_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("layer.tar");
        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(file);

        let mut target_header = tar::Header::new_gnu();
        target_header.set_path("real.txt").unwrap();
        target_header.set_entry_type(EntryType::Regular);
        target_header.set_size(5);
        target_header.set_mode(0o644);
        target_header.set_cksum();
        builder.append(&target_header, &b"hello"[..]).unwrap();

        let mut link_header = tar::Header::new_gnu();
        link_header.set_path("linked.txt").unwrap();
        link_header.set_entry_type(EntryType::Link);
        link_header.set_link_name("real.txt").unwrap();
        link_header.set_size(0);
        link_header.set_mode(0o644);
        link_header.set_cksum();
        builder.append(&link_header, &mut std::io::empty()).unwrap();

        builder.finish().unwrap();

        let to_squash = vec![layer(path, "sha256:onlylayer")];
        let output_path = dir.path().join("squashed.tar");
        squash_layers(&to_squash, &[], &output_path).unwrap();

        let mut archive = Archive::new(File::open(&output_path).unwrap());
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().to_string_lossy() == "linked.txt" {
                assert_eq!(entry.header().entry_type(), EntryType::Regular);
                let mut content = Vec::new();
                entry.read_to_end(&mut content).unwrap();
                assert_eq!(content, b"hello");
                return;
            }
        }
        panic!("linked.txt not found in squashed output");
    }

    #[test]
    fn empty_layer_contributes_nothing() {
        let dir = TempDir::new().unwrap();
        let real = write_layer_tar(
            dir.path(),
            "real.tar",
            &[("file.txt", EntryType::Regular, b"content")],
        );
        let empty = LayerInfo {
            digest: "sha256:empty".to_string(),
            size: 0,
            tar_path: None,
        };

        let to_squash = vec![layer(real, "sha256:real"), empty];
        let output_path = dir.path().join("squashed.tar");

        let stats = squash_layers(&to_squash, &[], &output_path).unwrap();
        assert_eq!(stats.files_written, 1);
    }

    #[test]
    fn nested_whiteout_markers_are_reduced_to_the_outer_one() {
        let dir = TempDir::new().unwrap();
        let kept = write_layer_tar(
            dir.path(),
            "kept.tar",
            &[
                ("opt/testing", EntryType::Directory, b""),
                ("opt/testing/something/file", EntryType::Regular, b"a"),
                ("opt/testing/something/other_file", EntryType::Regular, b"b"),
            ],
        );
        let deleter = write_layer_tar(
            dir.path(),
            "deleter.tar",
            &[
                ("opt/testing/something/.wh.file", EntryType::Regular, b""),
                (
                    "opt/testing/something/.wh.other_file",
                    EntryType::Regular,
                    b"",
                ),
                ("opt/.wh.testing", EntryType::Regular, b""),
            ],
        );

        let layers_to_move = vec![layer(kept, "sha256:kept")];
        let to_squash = vec![layer(deleter, "sha256:deleter")];
        let output_path = dir.path().join("squashed.tar");

        let stats = squash_layers(&to_squash, &layers_to_move, &output_path).unwrap();
        assert_eq!(stats.markers_written, 1);

        let paths = read_output_paths(&output_path);
        assert_eq!(paths, vec!["opt/.wh.testing".to_string()]);
    }
}
