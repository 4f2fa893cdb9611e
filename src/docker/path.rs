//! Path normalization and whiteout/opaque-directory detection.
//!
//! Mirrors the handful of helpers `docker_squash.image.Image` keeps as plain
//! methods (`_normalize_path`, `_marker_files`, `_path_hierarchy`) but gives
//! them names and types of their own since the squash engine and the
//! metadata assembler both need them.

use std::path::{Component, Path, PathBuf};

/// Normalize a tar member path the way Docker does: join it onto `/` and run
/// it through `normpath`, so `foo/../bar`, `./foo`, and `foo` all become
/// `/bar` / `/foo` respectively.
pub fn normalize(path: &Path) -> PathBuf {
    let joined: PathBuf = Path::new("/").join(path);
    let mut out = PathBuf::from("/");

    for component in joined.components() {
        match component {
            Component::RootDir => {}
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
            Component::Prefix(_) => {}
        }
    }

    out
}

/// A whiteout marker found while scanning a layer's tar members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Whiteout {
    /// `.wh.<name>` — deletes the sibling `<name>` from lower layers.
    File(PathBuf),
    /// `.wh..wh..opq` — hides every sibling in its parent directory.
    Opaque(PathBuf),
}

/// Classify a (already-normalized) tar member path as a whiteout marker, if
/// it is one.
pub fn parse_whiteout(normalized_path: &Path) -> Option<Whiteout> {
    let name = normalized_path.file_name()?.to_str()?;

    if name == ".wh..wh..opq" {
        let parent = normalized_path.parent().unwrap_or_else(|| Path::new("/"));
        return Some(Whiteout::Opaque(parent.to_path_buf()));
    }

    let target_name = name.strip_prefix(".wh.")?;
    let parent = normalized_path.parent().unwrap_or_else(|| Path::new("/"));
    Some(Whiteout::File(parent.join(target_name)))
}

/// `true` iff `name` is a whiteout marker basename (`.wh.` prefixed, but not
/// the opaque-directory marker itself).
pub fn is_whiteout(name: &str) -> bool {
    name.starts_with(".wh.") && name != ".wh..wh..opq"
}

/// `true` iff `name` is the opaque-directory marker basename.
pub fn is_opaque(name: &str) -> bool {
    name == ".wh..wh..opq"
}

/// The ordered set of proper ancestors of `path`, from `/` down to (and
/// including) `path`'s parent directory.
///
/// `/opt/testing/some/file` yields `["/", "/opt", "/opt/testing",
/// "/opt/testing/some"]`.
pub fn ancestors(path: &Path) -> Vec<PathBuf> {
    let normalized = normalize(path);
    let mut result = Vec::new();
    let mut current = PathBuf::from("/");
    result.push(current.clone());

    let parts: Vec<_> = normalized.components().collect();
    // Drop the last component (the file/dir itself); walk the rest.
    if parts.len() > 1 {
        for component in &parts[..parts.len() - 1] {
            if let Component::Normal(part) = component {
                current.push(part);
                result.push(current.clone());
            }
        }
    }

    result
}

/// Reduce a set of about-to-be-emitted whiteout targets: drop any target
/// that lies strictly inside another target also present in the set, since
/// the outer marker already hides everything underneath it.
///
/// `/opt/testing`, `/opt/testing/something/file`, `/opt/testing/something/other`
/// reduces to just `/opt/testing` — emitting the inner two alongside the
/// outer one causes some runtimes to reject the image.
pub fn reduce_markers(targets: &[PathBuf]) -> Vec<PathBuf> {
    let mut sorted: Vec<&PathBuf> = targets.iter().collect();
    // Shortest (shallowest) paths first so outer markers are seen before
    // any path they would shadow.
    sorted.sort_by_key(|p| p.components().count());

    let mut kept: Vec<PathBuf> = Vec::new();

    'outer: for candidate in sorted {
        for already_kept in &kept {
            if candidate != already_kept && candidate.starts_with(already_kept) {
                continue 'outer;
            }
        }
        kept.push(candidate.clone());
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_joins_and_cleans() {
        assert_eq!(normalize(Path::new("foo/bar")), PathBuf::from("/foo/bar"));
        assert_eq!(normalize(Path::new("./foo")), PathBuf::from("/foo"));
        assert_eq!(
            normalize(Path::new("foo/../bar")),
            PathBuf::from("/bar")
        );
        assert_eq!(normalize(Path::new("/a/b/")), PathBuf::from("/a/b"));
    }

    #[test]
    fn parse_whiteout_file_marker() {
        let parsed = parse_whiteout(Path::new("/opt/.wh.testing"));
        assert_eq!(parsed, Some(Whiteout::File(PathBuf::from("/opt/testing"))));
    }

    #[test]
    fn parse_whiteout_opaque_marker() {
        let parsed = parse_whiteout(Path::new("/d1/.wh..wh..opq"));
        assert_eq!(parsed, Some(Whiteout::Opaque(PathBuf::from("/d1"))));
    }

    #[test]
    fn parse_whiteout_ignores_regular_files() {
        assert_eq!(parse_whiteout(Path::new("/opt/testing")), None);
    }

    #[test]
    fn is_whiteout_excludes_opaque_marker() {
        assert!(is_whiteout(".wh.testing"));
        assert!(!is_whiteout(".wh..wh..opq"));
        assert!(!is_whiteout("testing"));
    }

    #[test]
    fn ancestors_root_to_parent() {
        let result = ancestors(Path::new("/opt/testing/some/dir/structure/file"));
        assert_eq!(
            result,
            vec![
                PathBuf::from("/"),
                PathBuf::from("/opt"),
                PathBuf::from("/opt/testing"),
                PathBuf::from("/opt/testing/some"),
                PathBuf::from("/opt/testing/some/dir"),
                PathBuf::from("/opt/testing/some/dir/structure"),
            ]
        );
    }

    #[test]
    fn ancestors_of_top_level_path() {
        assert_eq!(ancestors(Path::new("/file")), vec![PathBuf::from("/")]);
    }

    #[test]
    fn reduce_markers_drops_nested_targets() {
        let targets = vec![
            PathBuf::from("/opt/testing"),
            PathBuf::from("/opt/testing/something/file"),
            PathBuf::from("/opt/testing/something/other_file"),
        ];

        let reduced = reduce_markers(&targets);
        assert_eq!(reduced, vec![PathBuf::from("/opt/testing")]);
    }

    #[test]
    fn reduce_markers_keeps_unrelated_targets() {
        let targets = vec![PathBuf::from("/a/one"), PathBuf::from("/b/two")];
        let mut reduced = reduce_markers(&targets);
        reduced.sort();
        assert_eq!(reduced, vec![PathBuf::from("/a/one"), PathBuf::from("/b/two")]);
    }

    #[test]
    fn reduce_markers_does_not_confuse_prefix_strings_with_path_ancestry() {
        // "/opt/testing2" must NOT be considered shadowed by "/opt/testing"
        let targets = vec![PathBuf::from("/opt/testing"), PathBuf::from("/opt/testing2")];
        let mut reduced = reduce_markers(&targets);
        reduced.sort();
        assert_eq!(
            reduced,
            vec![PathBuf::from("/opt/testing"), PathBuf::from("/opt/testing2")]
        );
    }
}
