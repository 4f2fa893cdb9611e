//! Orchestrator (component G): loads an image archive (or exports one from
//! the daemon first), partitions its layers, runs the squash engine,
//! reassembles the new image's metadata, and writes or loads the result.
//!
//! Grounded on `docker_squash.image.Image.squash`/`_before_squashing`/
//! `_squash`/`_after_squashing` and `v2_image.V2Image._squash`: the
//! workspace layout (`old/`, `new/`, `new/squashed/`) and step ordering are
//! carried over directly, with the actual merge delegated to
//! `docker::squash`/`docker::selector`/`docker::digest`/`docker::metadata`
//! instead of being inlined the way this crate's first pass at it was.

use crate::docker::daemon;
use crate::docker::digest;
use crate::docker::layer::{ImageLayout, LayerInfo, LayerRef};
use crate::docker::manifest::{self, DockerConfig, DockerManifest};
use crate::docker::metadata;
use crate::docker::selector::{self, FromLayer, Partition};
use crate::docker::squash;
use crate::docker::tar::{self, TarExtractor};
use crate::error::{Result, SquashError};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Where a squash run currently is. Exists purely so `--verbose` can narrate
/// progress the way the teacher's CLI does at each major step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquashState {
    Init,
    Unpacked,
    Partitioned,
    Squashed,
    Digested,
    Assembled,
    Packed,
    Done,
}

/// An image unpacked from an archive (already-exported, or freshly exported
/// from the daemon), ready to be squashed.
pub struct DockerImage {
    pub manifest: DockerManifest,
    pub config: DockerConfig,
    pub layout: ImageLayout,
    pub layers: Vec<LayerInfo>,
    old_root: PathBuf,
    _old_workspace: Option<TempDir>,
    pub state: SquashState,
    verbose: bool,
    squashed: Option<SquashedImage>,
}

/// The assembled new-image workspace, populated once `squash_layers` runs.
struct SquashedImage {
    new_root: PathBuf,
    image_id: String,
    empty: bool,
}

impl DockerImage {
    /// Export `image_name` from the daemon with `docker save`, then unpack
    /// it the same way [`Self::from_archive`] would.
    pub fn from_image(image_name: &str, temp_dir: Option<&Path>, verbose: bool) -> Result<Self> {
        let export_workspace = TempDir::new()?;
        let tar_path = export_workspace.path().join("image.tar");
        Self::export_image(image_name, &tar_path)?;
        Self::from_archive(&tar_path, temp_dir, verbose)
    }

    /// `docker save -o <output_path> <image_name>`, kept as its own entry
    /// point so it can be exercised (and retried, see `docker::daemon`)
    /// independently of unpacking.
    pub fn export_image(image_name: &str, output_path: &Path) -> Result<()> {
        daemon::save_image(image_name, output_path)
    }

    /// Load directly from an already-exported archive (`--input-tar`).
    pub fn from_archive(archive_path: &Path, temp_dir: Option<&Path>, verbose: bool) -> Result<Self> {
        let extracted = match temp_dir {
            Some(dir) => TarExtractor::extract_to(archive_path, &dir.join("old"))?,
            None => TarExtractor::extract(archive_path)?,
        };

        let root = extracted.extracted_path.clone();
        let layout = detect_layout(&root);
        let (manifest, layout) = read_manifest(&root, layout)?;
        let config = read_config(&root, &manifest)?;
        let layers = build_layers(&root, layout, &manifest, &config)?;

        Ok(DockerImage {
            manifest,
            config,
            layout,
            layers,
            old_root: root,
            _old_workspace: extracted.temp_dir,
            state: SquashState::Unpacked,
            verbose,
            squashed: None,
        })
    }

    fn log(&self, message: &str) {
        if self.verbose {
            println!("{}", message);
        }
    }

    /// The squashed image's id (`sha256:<hex>` of its new `config.json`),
    /// once `squash_layers` has run.
    pub fn image_id(&self) -> Option<&str> {
        self.squashed.as_ref().map(|s| s.image_id.as_str())
    }

    /// `true` if the squash produced no actual file changes: the squashed
    /// run of layers collectively contributed nothing to the filesystem.
    pub fn is_empty_squash(&self) -> bool {
        self.squashed.as_ref().map(|s| s.empty).unwrap_or(false)
    }

    /// Run the full squash: partition the layers per `from`, merge the
    /// squashed run, recompute digests, and assemble a new Docker-legacy
    /// image workspace under `temp_dir` (or a fresh temp directory).
    ///
    /// `tag` is `(name, tag)` to bake into the new image's `RepoTags`/
    /// `repositories` file; `comment` becomes the squashed layer's history
    /// comment, defaulting to [`metadata::describe_squash`] when absent.
    pub fn squash_layers(
        &mut self,
        from: &FromLayer,
        tag: Option<(&str, &str)>,
        comment: Option<&str>,
        temp_dir: Option<&Path>,
    ) -> Result<()> {
        let partition = selector::partition(&self.layers, from)?;
        self.state = SquashState::Partitioned;
        self.log(&format!(
            "Layers to squash: {}, layers to move: {}",
            partition.to_squash.len(),
            partition.to_move.len()
        ));

        let new_root = self.prepare_new_root(temp_dir)?;
        let squashed_staging = new_root.join("squashed");
        let created = metadata::docker_timestamp();

        let (squashed_diff_id, stats) = self.run_squash(&partition, &squashed_staging)?;
        self.state = SquashState::Squashed;

        let chain_id_top = self.chain_id_top(&partition, squashed_diff_id.as_deref());
        self.state = SquashState::Digested;

        let comment = comment.map(str::to_string).unwrap_or_else(|| {
            metadata::describe_squash(&self.squashed_history_entries(&partition))
        });
        let moved_non_empty = metadata::non_empty_history_before(&self.config, partition.to_move.len());

        let new_config_raw = metadata::generate_image_metadata(
            &self.config,
            partition.to_move.len(),
            moved_non_empty,
            squashed_diff_id.as_deref(),
            &comment,
            &created,
            partition.squash_id.as_deref(),
        );
        let (config_json, image_id) = metadata::dump_json(&Value::Object(new_config_raw), true)?;
        self.state = SquashState::Assembled;

        let last_move_hex = partition
            .squash_id
            .as_deref()
            .map(|s| s.trim_start_matches("sha256:").to_string());

        let layer_path_id = if squashed_diff_id.is_some() {
            Some(self.place_squashed_layer(
                &partition,
                &created,
                &chain_id_top,
                last_move_hex.as_deref(),
                &new_root,
                &squashed_staging,
            )?)
        } else {
            // Nothing survived the merge (either every squashed layer was
            // already empty, or real content canceled out to nothing): no
            // layer.tar was written, so no squashed-layer directory, no
            // manifest entry, and no extra diff-id either.
            if squashed_staging.exists() {
                fs::remove_dir_all(&squashed_staging)?;
            }
            None
        };

        let (image_name, image_tag) = match tag {
            Some((name, t)) => (Some(name), Some(t)),
            None => (None, None),
        };

        let new_manifest = metadata::generate_manifest(
            &image_id,
            image_name,
            image_tag,
            &self.manifest.layers,
            moved_non_empty,
            layer_path_id.as_deref(),
        );

        fs::write(new_root.join(format!("{}.json", image_id)), &config_json)?;
        let (manifest_json, _) =
            metadata::dump_json(&Value::Array(vec![serde_json::to_value(&new_manifest)?]), true)?;
        fs::write(new_root.join("manifest.json"), manifest_json)?;

        move_layers(&partition.to_move, &self.old_root, &new_root)?;

        if let Some(repositories) = metadata::generate_repositories_json(&image_id, image_name, image_tag) {
            fs::write(new_root.join("repositories"), repositories)?;
        }
        self.state = SquashState::Packed;

        self.squashed = Some(SquashedImage {
            new_root,
            image_id,
            empty: !partition.to_squash.is_empty()
                && stats.files_written == 0
                && stats.markers_written == 0,
        });
        self.state = SquashState::Done;
        self.log("Squashing done");

        Ok(())
    }

    fn prepare_new_root(&self, temp_dir: Option<&Path>) -> Result<PathBuf> {
        let new_root = match temp_dir {
            Some(dir) => dir.join("new"),
            None => {
                let parent = self.old_root.parent().ok_or_else(|| {
                    SquashError::Internal("extracted image has no parent directory".to_string())
                })?;
                parent.join("new")
            }
        };
        fs::create_dir_all(&new_root)?;
        Ok(new_root)
    }

    fn run_squash(
        &self,
        partition: &Partition,
        squashed_staging: &Path,
    ) -> Result<(Option<String>, squash::SquashStats)> {
        if partition.to_squash.is_empty() {
            return Ok((None, squash::SquashStats::default()));
        }

        fs::create_dir_all(squashed_staging)?;
        let squashed_tar_path = squashed_staging.join("layer.tar");
        let stats = squash::squash_layers(&partition.to_squash, &partition.to_move, &squashed_tar_path)?;
        self.log(&format!(
            "Squash produced {} files, {} markers",
            stats.files_written, stats.markers_written
        ));

        if stats.files_written == 0 && stats.markers_written == 0 {
            // Nothing survived the merge. Drop the tar we just wrote rather
            // than ship an empty layer with no diff-id contribution.
            fs::remove_file(&squashed_tar_path).ok();
            return Ok((None, stats));
        }

        let diff_id = digest::diff_id(&squashed_tar_path)?;
        Ok((Some(diff_id), stats))
    }

    fn chain_id_top(&self, partition: &Partition, squashed_diff_id: Option<&str>) -> String {
        let moved_non_empty = metadata::non_empty_history_before(&self.config, partition.to_move.len());
        let old_diff_ids = self.config.diff_ids();

        let mut chain_input: Vec<String> = old_diff_ids
            .iter()
            .take(moved_non_empty)
            .map(|d| d.trim_start_matches("sha256:").to_string())
            .collect();
        if let Some(diff_id) = squashed_diff_id {
            chain_input.push(diff_id.to_string());
        }

        digest::chain_ids(&chain_input).last().cloned().unwrap_or_default()
    }

    /// History entries (oldest→newest) corresponding to `to_squash`, used
    /// only to synthesize a default comment when the caller supplies none.
    fn squashed_history_entries(&self, partition: &Partition) -> Vec<manifest::JsonObject> {
        self.config
            .history()
            .into_iter()
            .skip(partition.to_move.len())
            .collect()
    }

    /// Seed JSON for the squashed layer's own per-layer metadata: the
    /// oldest squashed layer's legacy `json` file if one exists, or the old
    /// image config itself for an OCI-format source with no such file.
    fn seed_layer_json(&self, partition: &Partition) -> Result<String> {
        if self.layout == ImageLayout::Legacy {
            if let Some(first) = partition.to_squash.first() {
                if let Some(tar_path) = &first.tar_path {
                    if let Some(dir) = tar_path.parent() {
                        let json_path = dir.join("json");
                        if json_path.exists() {
                            return Ok(fs::read_to_string(json_path)?);
                        }
                    }
                }
            }
        }

        let (json_text, _) = metadata::dump_json(&Value::Object(self.config.raw.clone()), false)?;
        Ok(json_text)
    }

    #[allow(clippy::too_many_arguments)]
    fn place_squashed_layer(
        &self,
        partition: &Partition,
        created: &str,
        chain_id_top: &str,
        last_move_hex: Option<&str>,
        new_root: &Path,
        squashed_staging: &Path,
    ) -> Result<String> {
        let layer_path_id = metadata::generate_squashed_layer_path_id(
            &self.config,
            created,
            chain_id_top,
            last_move_hex,
            partition.squash_id.as_deref(),
        )?;

        let seed_json = self.seed_layer_json(partition)?;
        let layer_metadata = metadata::generate_squashed_layer_metadata(
            &seed_json,
            &layer_path_id,
            created,
            partition.squash_id.as_deref(),
            partition.squash_id.as_deref(),
        )?;
        let (layer_json, _) = metadata::dump_json(&Value::Object(layer_metadata), false)?;

        let squashed_dest = new_root.join(&layer_path_id);
        fs::rename(squashed_staging, &squashed_dest)?;
        fs::write(squashed_dest.join("json"), layer_json)?;
        fs::write(squashed_dest.join("VERSION"), metadata::LAYER_VERSION_CONTENTS)?;

        Ok(layer_path_id)
    }

    /// Pack the assembled new-image workspace into a tar at `output_path`.
    pub fn save_to_file(&self, output_path: &Path) -> Result<()> {
        let squashed = self.squashed_or_err()?;
        tar::pack_dir(&squashed.new_root, output_path)
    }

    /// Pack the assembled workspace into a temporary archive and
    /// `docker load` it. `RepoTags` baked into `manifest.json` (see `tag`
    /// in [`Self::squash_layers`]) are what the daemon will tag it under;
    /// `image_name`, if given, additionally re-tags the freshly loaded
    /// image under that name.
    pub fn load_into_docker(&self, image_name: Option<&str>) -> Result<()> {
        let squashed = self.squashed_or_err()?;

        let workspace = TempDir::new()?;
        let tar_path = workspace.path().join("image.tar");
        tar::pack_dir(&squashed.new_root, &tar_path)?;
        daemon::load_image(&tar_path)?;

        if let Some(name) = image_name {
            daemon::tag_image(&squashed.image_id, name)?;
        }

        Ok(())
    }

    fn squashed_or_err(&self) -> Result<&SquashedImage> {
        self.squashed
            .as_ref()
            .ok_or_else(|| SquashError::Internal("squash_layers has not run yet".to_string()))
    }
}

fn detect_layout(root: &Path) -> ImageLayout {
    if root.join("manifest.json").exists() {
        ImageLayout::Legacy
    } else {
        ImageLayout::Oci
    }
}

/// Read `manifest.json` if the archive ships one (the common case, and the
/// only one this crate writes), falling back to `index.json` for an
/// archive that is exclusively OCI-shaped.
fn read_manifest(root: &Path, layout: ImageLayout) -> Result<(DockerManifest, ImageLayout)> {
    let manifest_path = root.join("manifest.json");
    if manifest_path.exists() {
        let text = fs::read_to_string(&manifest_path)?;
        return Ok((manifest::parse_manifest(&text)?, ImageLayout::Legacy));
    }

    if layout == ImageLayout::Oci {
        return read_oci_manifest(root);
    }

    Err(SquashError::ArchiveCorrupt(
        "manifest.json not found in image archive".to_string(),
    ))
}

/// Build a [`DockerManifest`] out of an OCI `index.json` + its referenced
/// manifest blob, for an archive with no Docker-legacy compatibility file.
fn read_oci_manifest(root: &Path) -> Result<(DockerManifest, ImageLayout)> {
    let index_text = fs::read_to_string(root.join("index.json")).map_err(|_| {
        SquashError::ArchiveCorrupt("neither manifest.json nor index.json found".to_string())
    })?;
    let index: Value = serde_json::from_str(&index_text)?;

    let descriptor = index
        .get("manifests")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .ok_or_else(|| SquashError::ArchiveCorrupt("index.json has no manifests".to_string()))?;
    let digest = descriptor
        .get("digest")
        .and_then(Value::as_str)
        .ok_or_else(|| SquashError::ArchiveCorrupt("manifest descriptor has no digest".to_string()))?;

    let manifest_text = fs::read_to_string(
        root.join("blobs")
            .join("sha256")
            .join(digest.trim_start_matches("sha256:")),
    )?;
    let manifest_doc: Value = serde_json::from_str(&manifest_text)?;

    let config_digest = manifest_doc
        .get("config")
        .and_then(|c| c.get("digest"))
        .and_then(Value::as_str)
        .ok_or_else(|| SquashError::ArchiveCorrupt("OCI manifest has no config digest".to_string()))?;
    let config = format!(
        "blobs/sha256/{}",
        config_digest.trim_start_matches("sha256:")
    );

    let layers = manifest_doc
        .get("layers")
        .and_then(Value::as_array)
        .ok_or_else(|| SquashError::ArchiveCorrupt("OCI manifest has no layers".to_string()))?
        .iter()
        .filter_map(|l| l.get("digest").and_then(Value::as_str))
        .map(|d| format!("blobs/sha256/{}", d.trim_start_matches("sha256:")))
        .collect();

    Ok((
        DockerManifest {
            config,
            repo_tags: None,
            layers,
        },
        ImageLayout::Oci,
    ))
}

fn read_config(root: &Path, manifest: &DockerManifest) -> Result<DockerConfig> {
    let text = fs::read_to_string(root.join(&manifest.config))
        .map_err(|_| SquashError::InvalidInput(format!("config file not found: {}", manifest.config)))?;
    DockerConfig::parse(&text)
}

/// Build the oldest→newest [`LayerInfo`] list, one entry per history
/// record: an empty-layer history entry becomes a virtual `<missing-N>`
/// layer with no tar, everything else consumes the next `manifest.layers`
/// slot. Falls back to treating every manifest layer as non-empty when the
/// config carries no `history` at all.
fn build_layers(
    root: &Path,
    layout: ImageLayout,
    manifest: &DockerManifest,
    config: &DockerConfig,
) -> Result<Vec<LayerInfo>> {
    let history = config.history();

    if history.is_empty() {
        return manifest
            .layers
            .iter()
            .map(|path| layer_info_from_path(root, layout, path))
            .collect();
    }

    let mut layers = Vec::with_capacity(history.len());
    let mut manifest_idx = 0;

    for (i, entry) in history.iter().enumerate() {
        if manifest::is_empty_layer(entry) {
            layers.push(LayerInfo {
                digest: format!("<missing-{}>", i),
                size: 0,
                tar_path: None,
            });
            continue;
        }

        let path = manifest.layers.get(manifest_idx).ok_or_else(|| {
            SquashError::ArchiveCorrupt(
                "manifest.json has fewer layers than non-empty history entries".to_string(),
            )
        })?;
        layers.push(layer_info_from_path(root, layout, path)?);
        manifest_idx += 1;
    }

    Ok(layers)
}

fn layer_info_from_path(root: &Path, layout: ImageLayout, path: &str) -> Result<LayerInfo> {
    let layer_ref = LayerRef::parse(path);
    let tar_path = layout.resolve_layer_path(root, &layer_ref);
    if !tar_path.exists() {
        return Err(SquashError::InvalidInput(format!(
            "layer file not found: {}",
            tar_path.display()
        )));
    }
    let size = fs::metadata(&tar_path)?.len();
    Ok(LayerInfo {
        digest: format!("sha256:{}", layer_ref.hex()),
        size,
        tar_path: Some(tar_path),
    })
}

/// Move every untouched layer's directory (or, for a flat OCI blob with no
/// directory of its own, synthesize one) from the old workspace into the
/// new one, matching `Image._move_layers`.
fn move_layers(to_move: &[LayerInfo], old_root: &Path, new_root: &Path) -> Result<()> {
    for layer in to_move {
        if layer.is_empty() {
            continue;
        }
        let hex = layer.digest.trim_start_matches("sha256:");
        let legacy_src = old_root.join(hex);

        if legacy_src.is_dir() {
            fs::rename(&legacy_src, new_root.join(hex))?;
            continue;
        }

        // Flat OCI blob with no per-layer directory of its own: synthesize
        // a minimal legacy-shaped one so the output archive stays
        // Docker-legacy throughout, per spec.md's "output always legacy".
        if let Some(blob_path) = &layer.tar_path {
            let dest_dir = new_root.join(hex);
            fs::create_dir_all(&dest_dir)?;
            fs::copy(blob_path, dest_dir.join("layer.tar"))?;
            fs::write(dest_dir.join("VERSION"), metadata::LAYER_VERSION_CONTENTS)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer_with_digest(digest: &str) -> LayerInfo {
        LayerInfo {
            digest: digest.to_string(),
            size: 1,
            tar_path: Some(PathBuf::from("unused")),
        }
    }

    #[test]
    fn detect_layout_prefers_manifest_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("manifest.json"), "[]").unwrap();
        assert_eq!(detect_layout(dir.path()), ImageLayout::Legacy);
    }

    #[test]
    fn detect_layout_falls_back_to_oci() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_layout(dir.path()), ImageLayout::Oci);
    }

    #[test]
    fn build_layers_without_history_treats_every_manifest_layer_as_present() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("abc")).unwrap();
        fs::write(dir.path().join("abc").join("layer.tar"), b"data").unwrap();

        let manifest = DockerManifest {
            config: "config.json".to_string(),
            repo_tags: None,
            layers: vec!["abc/layer.tar".to_string()],
        };
        let config = DockerConfig::parse("{}").unwrap();

        let layers = build_layers(dir.path(), ImageLayout::Legacy, &manifest, &config).unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].digest, "sha256:abc");
        assert!(!layers[0].is_empty());
    }

    #[test]
    fn build_layers_synthesizes_missing_entries_for_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("abc")).unwrap();
        fs::write(dir.path().join("abc").join("layer.tar"), b"data").unwrap();

        let manifest = DockerManifest {
            config: "config.json".to_string(),
            repo_tags: None,
            layers: vec!["abc/layer.tar".to_string()],
        };
        let config = DockerConfig::parse(
            r#"{"history":[{"created_by":"run a","empty_layer":true},{"created_by":"copy b"}]}"#,
        )
        .unwrap();

        let layers = build_layers(dir.path(), ImageLayout::Legacy, &manifest, &config).unwrap();
        assert_eq!(layers.len(), 2);
        assert!(layers[0].is_empty());
        assert_eq!(layers[0].digest, "<missing-0>");
        assert_eq!(layers[1].digest, "sha256:abc");
    }

    #[test]
    fn move_layers_renames_legacy_directories() {
        let old_root = tempfile::tempdir().unwrap();
        let new_root = tempfile::tempdir().unwrap();
        fs::create_dir_all(old_root.path().join("abc")).unwrap();
        fs::write(old_root.path().join("abc").join("layer.tar"), b"data").unwrap();
        fs::write(old_root.path().join("abc").join("json"), "{}").unwrap();

        let layers = vec![layer_with_digest("sha256:abc")];
        move_layers(&layers, old_root.path(), new_root.path()).unwrap();

        assert!(new_root.path().join("abc").join("layer.tar").exists());
        assert!(!old_root.path().join("abc").exists());
    }

    #[test]
    fn move_layers_skips_empty_layers() {
        let old_root = tempfile::tempdir().unwrap();
        let new_root = tempfile::tempdir().unwrap();
        let layers = vec![LayerInfo {
            digest: "<missing-0>".to_string(),
            size: 0,
            tar_path: None,
        }];
        move_layers(&layers, old_root.path(), new_root.path()).unwrap();
        assert!(fs::read_dir(new_root.path()).unwrap().next().is_none());
    }
}
