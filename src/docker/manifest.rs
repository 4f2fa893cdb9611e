//! Data model for the two JSON documents every Docker/OCI archive carries:
//! the top-level `manifest.json` and an image's `config.json`.
//!
//! `manifest.json` has a small, stable shape and is modeled as a normal
//! `serde` struct. The config document does not — it carries whatever
//! fields the image's builder put there, and this tool must round-trip
//! fields it doesn't understand untouched. So, like
//! `docker_squash.v2_image.V2Image._read_json_file` (`json.load(...,
//! object_pairs_hook=OrderedDict)`), it's read and held as an
//! order-preserving JSON object and mutated key-by-key rather than
//! deserialized into a fixed struct.

use crate::error::{Result, SquashError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A `serde_json::Map` with insertion order preserved (requires the
/// `preserve_order` `serde_json` feature) — the only way to reproduce
/// Docker's byte-for-byte config JSON, which never sorts its keys.
pub type JsonObject = Map<String, Value>;

/// `manifest.json` entry: one per image in the archive. Docker only ever
/// writes a single-element array here; OCI-compat archives shipping a
/// `manifest.json` do the same.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DockerManifest {
    #[serde(rename = "Config")]
    pub config: String,
    #[serde(rename = "RepoTags", skip_serializing_if = "Option::is_none")]
    pub repo_tags: Option<Vec<String>>,
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
}

/// An image's `config.json`, held as an ordered JSON object so that fields
/// this tool never needs to understand (labels, healthcheck, entrypoint,
/// arbitrary OCI/Docker extensions) survive untouched.
#[derive(Debug, Clone)]
pub struct DockerConfig {
    pub raw: JsonObject,
}

impl DockerConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let raw: JsonObject = serde_json::from_str(text)?;
        Ok(DockerConfig { raw })
    }

    /// `rootfs.diff_ids`, oldest→newest, each already `sha256:`-prefixed.
    pub fn diff_ids(&self) -> Vec<String> {
        self.raw
            .get("rootfs")
            .and_then(|v| v.get("diff_ids"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `history[]`, oldest→newest, preserved as raw JSON objects so unknown
    /// history fields (e.g. `author`, `comment`) aren't lost.
    pub fn history(&self) -> Vec<JsonObject> {
        self.raw
            .get("history")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_object().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn history_count(&self) -> usize {
        self.history().len()
    }

    /// `true` iff the image has no `container` diagnostics and no
    /// non-empty history (used for the `SquashUnnecessary` fast-exit on a
    /// single-layer image, mirroring `Image._before_squashing`'s
    /// implicit single-layer check).
    pub fn layer_count(&self) -> usize {
        self.history()
            .iter()
            .filter(|h| !is_empty_layer(h))
            .count()
    }
}

/// `true` iff a history entry's `empty_layer` flag is set.
pub fn is_empty_layer(entry: &JsonObject) -> bool {
    entry
        .get("empty_layer")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// `created_by` command string of a history entry, if present.
pub fn created_by(entry: &JsonObject) -> &str {
    entry.get("created_by").and_then(Value::as_str).unwrap_or("")
}

/// Read and parse `manifest.json`'s top-level array, returning the first
/// (and normally only) entry, matching
/// `V2Image._get_manifest`/`_read_json_file` -> `[0]`.
pub fn parse_manifest(text: &str) -> Result<DockerManifest> {
    let manifests: Vec<DockerManifest> = serde_json::from_str(text)?;
    manifests.into_iter().next().ok_or_else(|| {
        SquashError::ArchiveCorrupt("manifest.json contains no image entries".to_string())
    })
}
