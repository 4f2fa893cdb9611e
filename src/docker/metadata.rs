//! Metadata Assembler (component F): canonical JSON encoding, and
//! generation of the new image config, the squashed layer's v1-compat
//! directory id and per-layer `json`/`VERSION` files, the new
//! `manifest.json`, and the `repositories` file.
//!
//! Every function here is a direct port of one `docker_squash.v2_image`
//! method, kept close enough to read side-by-side: `generate_image_metadata`
//! <- `_generate_image_metadata`, `generate_squashed_layer_path_id` <-
//! `_generate_squashed_layer_path_id`, `generate_squashed_layer_metadata` <-
//! `_generate_last_layer_metadata`, `generate_manifest` <-
//! `_generate_manifest_metadata`, `generate_repositories_json` <-
//! `_generate_repositories_json`. The nested-dict mutations they perform only
//! produce Docker's exact byte layout because `serde_json`'s map here
//! preserves insertion order (`preserve_order` feature) the same way
//! Python's `dict` does — inserting an existing key updates it in place,
//! inserting a new key appends it, so replaying the same insert/remove
//! sequence reproduces the same key order.

use crate::docker::manifest::{created_by, is_empty_layer, DockerConfig, DockerManifest, JsonObject};
use crate::error::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Current UTC timestamp in Docker's metadata format. Go's JSON marshaling
/// doesn't zero-pad a truncated fractional-seconds component the way
/// Python's `strftime("%f")` always does, so trailing zeros before the `Z`
/// are stripped to match what a Go-produced `created` field actually looks
/// like, mirroring `Image.__init__`'s `re.sub(r"0*Z$", "Z", ...)`.
pub fn docker_timestamp() -> String {
    let formatted = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string();
    strip_trailing_zeros_before_z(&formatted)
}

fn strip_trailing_zeros_before_z(timestamp: &str) -> String {
    match timestamp.strip_suffix('Z') {
        Some(rest) => format!("{}Z", rest.trim_end_matches('0')),
        None => timestamp.to_string(),
    }
}

/// Serialize `value` with no whitespace and without reordering keys, then
/// hash it. `trailing_newline` controls whether both the returned JSON text
/// *and* the hash it returns cover a trailing `"\n"` — Docker appends one to
/// the top-level image metadata and the manifest, but not to a layer's own
/// `json` file.
pub fn dump_json(value: &Value, trailing_newline: bool) -> Result<(String, String)> {
    let mut json_data = serde_json::to_string(value)?;
    if trailing_newline {
        json_data.push('\n');
    }
    let sha = sha256_hex(json_data.as_bytes());
    Ok((json_data, sha))
}

/// Build the new image's `config.json` contents (component F step 1):
/// starts from the old config, truncates `history`/`rootfs.diff_ids` to the
/// layers being kept, and appends one new entry for the squashed layer (or
/// marks it `empty_layer` if nothing was squashed).
///
/// `history_count` and `diff_ids_count` are deliberately separate: a moved
/// layer is a history entry, but only a *non-empty* moved layer also
/// consumes a `rootfs.diff_ids` slot, so the two truncation points diverge
/// whenever an empty-layer history entry sits inside the kept range.
pub fn generate_image_metadata(
    old_config: &DockerConfig,
    history_count: usize,
    diff_ids_count: usize,
    squashed_diff_id: Option<&str>,
    comment: &str,
    created: &str,
    squash_id: Option<&str>,
) -> JsonObject {
    let mut metadata = old_config.raw.clone();
    metadata.insert("created".to_string(), Value::String(created.to_string()));
    metadata.remove("container");

    let history = old_config.history();
    let mut new_history: Vec<Value> = history
        .into_iter()
        .take(history_count)
        .map(Value::Object)
        .collect();

    let mut new_entry = JsonObject::new();
    new_entry.insert("comment".to_string(), Value::String(comment.to_string()));
    new_entry.insert("created".to_string(), Value::String(created.to_string()));
    if squashed_diff_id.is_none() {
        new_entry.insert("empty_layer".to_string(), Value::Bool(true));
    }
    new_history.push(Value::Object(new_entry));
    metadata.insert("history".to_string(), Value::Array(new_history));

    let diff_ids = old_config.diff_ids();
    let mut new_diff_ids: Vec<Value> = diff_ids
        .into_iter()
        .take(diff_ids_count)
        .map(Value::String)
        .collect();
    if let Some(diff_id) = squashed_diff_id {
        new_diff_ids.push(Value::String(format!("sha256:{}", diff_id)));
    }
    if let Some(rootfs) = metadata.get_mut("rootfs").and_then(Value::as_object_mut) {
        rootfs.insert("diff_ids".to_string(), Value::Array(new_diff_ids));
    }

    if let Some(config) = metadata.get_mut("config").and_then(Value::as_object_mut) {
        config.insert(
            "Image".to_string(),
            Value::String(squash_id.unwrap_or("").to_string()),
        );
    }

    metadata
}

/// Compute the squashed layer's v1-compat directory id (component F step
/// 2), mimicking Docker's `imagev1.go` derivation: take the old image
/// config, drop `history`/`rootfs`/`container`, move `os` to just after the
/// newly-added `layer_id`, set `parent` and `config.Image`, then hash the
/// result. Returns a bare hex digest (no `sha256:` prefix) — this becomes
/// the name of the directory holding the squashed layer inside the archive.
pub fn generate_squashed_layer_path_id(
    old_config: &DockerConfig,
    created: &str,
    chain_id_top: &str,
    parent: Option<&str>,
    squash_id: Option<&str>,
) -> Result<String> {
    let mut v1 = old_config.raw.clone();
    v1.insert("created".to_string(), Value::String(created.to_string()));

    for key in ["history", "rootfs", "container"] {
        v1.remove(key);
    }

    let operating_system = v1.remove("os");

    v1.insert(
        "layer_id".to_string(),
        Value::String(format!("sha256:{}", chain_id_top)),
    );

    if let Some(os) = operating_system {
        v1.insert("os".to_string(), os);
    }

    if let Some(parent) = parent {
        v1.insert("parent".to_string(), Value::String(format!("sha256:{}", parent)));
    }

    if let Some(config) = v1.get_mut("config").and_then(Value::as_object_mut) {
        config.insert(
            "Image".to_string(),
            Value::String(squash_id.unwrap_or("").to_string()),
        );
    }

    let (_, sha) = dump_json(&Value::Object(v1), false)?;
    Ok(sha)
}

/// Build the squashed layer's own per-layer `json` file (component F step
/// 3), seeded from the oldest squashed layer's legacy per-layer metadata
/// (or, for an OCI-format source with no such file, the old image's own
/// config — matching `V2Image._squash`'s OCI fallback).
pub fn generate_squashed_layer_metadata(
    seed_config_json: &str,
    layer_path_id: &str,
    created: &str,
    parent: Option<&str>,
    squash_id: Option<&str>,
) -> Result<JsonObject> {
    let mut config: JsonObject = serde_json::from_str(seed_config_json)?;

    config.insert("created".to_string(), Value::String(created.to_string()));

    if let Some(inner) = config.get_mut("config").and_then(Value::as_object_mut) {
        inner.insert(
            "Image".to_string(),
            Value::String(squash_id.unwrap_or("").to_string()),
        );
    }

    match parent {
        Some(parent) => {
            config.insert("parent".to_string(), Value::String(parent.to_string()));
        }
        None => {
            config.remove("parent");
        }
    }

    config.insert("id".to_string(), Value::String(layer_path_id.to_string()));
    config.remove("container");

    Ok(config)
}

/// Literal contents of the squashed layer's `VERSION` file.
pub const LAYER_VERSION_CONTENTS: &str = "1.0";

/// Build the new `manifest.json` entry (component F step 4): keeps the
/// moved layers' original paths and, if anything was squashed, appends the
/// squashed layer's `<id>/layer.tar` path.
///
/// `old_manifest_layers` has one entry per *non-empty* layer (manifest
/// `Layers[]` never lists empty/virtual layers), so `moved_non_empty_count`
/// must be the count of non-empty layers among `to_move`, not
/// `to_move.len()` itself — passing the latter pulls squashed-away layers'
/// paths into the new manifest whenever a kept layer is empty.
pub fn generate_manifest(
    image_id: &str,
    image_name: Option<&str>,
    image_tag: Option<&str>,
    old_manifest_layers: &[String],
    moved_non_empty_count: usize,
    layer_path_id: Option<&str>,
) -> DockerManifest {
    let mut layers: Vec<String> = old_manifest_layers
        .iter()
        .take(moved_non_empty_count)
        .cloned()
        .collect();

    if let Some(id) = layer_path_id {
        layers.push(format!("{}/layer.tar", id));
    }

    let repo_tags = match (image_name, image_tag) {
        (Some(name), Some(tag)) => Some(vec![format!("{}:{}", name, tag)]),
        _ => None,
    };

    DockerManifest {
        config: format!("{}.json", image_id),
        repo_tags,
        layers,
    }
}

/// Build the legacy `repositories` file contents, or `None` if the image
/// has no name/tag to record (matching `_generate_repositories_json`'s
/// silent no-op when both are absent).
pub fn generate_repositories_json(
    image_id: &str,
    name: Option<&str>,
    tag: Option<&str>,
) -> Option<String> {
    let (name, tag) = match (name, tag) {
        (Some(name), Some(tag)) => (name, tag),
        _ => return None,
    };

    let mut inner = JsonObject::new();
    inner.insert(tag.to_string(), Value::String(image_id.to_string()));
    let mut outer = JsonObject::new();
    outer.insert(name.to_string(), Value::Object(inner));

    let json_data = serde_json::to_string(&Value::Object(outer)).ok()?;
    Some(format!("{}\n", json_data))
}

/// Which history entries (oldest→newest) correspond to layers that will be
/// kept untouched, by manifest position. Non-empty history entries consume
/// one manifest `Layers[]` slot each (component F precondition, grounded on
/// `V2Image._read_layer_paths`).
pub fn non_empty_history_before(config: &DockerConfig, layer_count: usize) -> usize {
    config
        .history()
        .iter()
        .take(layer_count)
        .filter(|h| !is_empty_layer(h))
        .count()
}

/// Comment recorded for the squashed layer's synthetic history entry, used
/// by the orchestrator to decide what to pass to [`generate_image_metadata`].
pub fn describe_squash(history_entries_squashed: &[JsonObject]) -> String {
    let commands: Vec<&str> = history_entries_squashed.iter().map(|h| created_by(h)).collect();
    format!("squash: merged {} layers", commands.len())
}
