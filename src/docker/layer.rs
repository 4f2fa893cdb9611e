//! Layer identity and the legacy-vs-OCI naming split.
//!
//! `LayerInfo` used to carry the teacher's in-memory union-merge state
//! directly; that merge now lives in [`crate::docker::squash`]. This module
//! is left with the data model: what a layer *is* and where its tar bytes
//! live in either archive layout.

use std::path::{Path, PathBuf};

/// A single layer: its digest, size, and the tar on disk that holds its
/// contents. `tar_path: None` models an *empty* layer — a history entry
/// with no corresponding tar, e.g. a `RUN` instruction that produced no
/// filesystem changes.
#[derive(Debug, Clone)]
pub struct LayerInfo {
    /// `sha256:<hex>` digest of the layer, as recorded in
    /// `rootfs.diff_ids` (or a synthesized placeholder for empty layers).
    pub digest: String,
    /// Size of the layer's tar in bytes, or 0 for an empty layer.
    pub size: u64,
    /// Path to the extracted layer tar, or `None` if this layer is empty.
    pub tar_path: Option<PathBuf>,
}

impl LayerInfo {
    pub fn is_empty(&self) -> bool {
        self.tar_path.is_none()
    }
}

/// The on-disk/in-archive name used to locate a layer's tar, in either of
/// the two formats this engine must read transparently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerRef {
    /// Docker legacy: `<hex>/layer.tar`.
    Legacy(String),
    /// OCI / content-addressed: `blobs/sha256/<hex>`.
    Oci(String),
}

impl LayerRef {
    /// Parse a manifest `Layers[]` entry into its ref flavor.
    pub fn parse(entry: &str) -> Self {
        if let Some(rest) = entry.strip_prefix("blobs/sha256/") {
            LayerRef::Oci(rest.to_string())
        } else {
            // "<hex>/layer.tar" — keep just the hex id.
            let hex = entry.split('/').next().unwrap_or(entry);
            LayerRef::Legacy(hex.to_string())
        }
    }

    pub fn hex(&self) -> &str {
        match self {
            LayerRef::Legacy(hex) => hex,
            LayerRef::Oci(hex) => hex,
        }
    }
}

/// Tags which archive shape we're reading/writing, so the rest of the
/// engine can stay layout-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    Legacy,
    Oci,
}

impl ImageLayout {
    /// Resolve a [`LayerRef`] to the path of its tar/blob inside an
    /// extracted image directory.
    pub fn resolve_layer_path(&self, root: &Path, layer_ref: &LayerRef) -> PathBuf {
        match (self, layer_ref) {
            (ImageLayout::Legacy, LayerRef::Legacy(hex)) => root.join(hex).join("layer.tar"),
            (ImageLayout::Oci, LayerRef::Oci(hex)) => root.join("blobs").join("sha256").join(hex),
            // Tolerate a mismatched ref flavor by resolving it as whichever
            // shape it actually describes - useful when an OCI archive
            // ships a Docker-legacy-shaped manifest.json compatibility file.
            (_, LayerRef::Legacy(hex)) => root.join(hex).join("layer.tar"),
            (_, LayerRef::Oci(hex)) => root.join("blobs").join("sha256").join(hex),
        }
    }

    /// Path to the manifest this layout prefers. Per spec, an OCI archive
    /// that also ships a Docker-legacy `manifest.json` compatibility file is
    /// read via that file preferentially.
    pub fn manifest_path(&self, root: &Path) -> PathBuf {
        root.join("manifest.json")
    }
}
