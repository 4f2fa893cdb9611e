//! Docker/OCI image manipulation: parsing, layer squashing, and archive I/O.
//!
//! Module layout mirrors the component table in the design doc: each of the
//! engine pieces (archive I/O, path/whiteout rules, layer selection, the
//! squash merge itself, digest/chain-id computation, and metadata assembly)
//! gets its own file, with [`image::DockerImage`] as the orchestrator that
//! drives them in sequence.

/// Docker image loading, squashing orchestration, and output.
pub mod image;
/// Tar archive extraction and building utilities.
pub mod tar;
/// Layer identity and the legacy-vs-OCI naming split.
pub mod layer;
/// Path normalization and whiteout/opaque-directory detection.
pub mod path;
/// Partitions an image's layers into kept vs. squashed.
pub mod selector;
/// The union-filesystem merge over a run of layer tars.
pub mod squash;
/// Diff-id and chain-id computation.
pub mod digest;
/// `manifest.json` / `config.json` data model.
pub mod manifest;
/// Rewrites image config, manifest, and per-layer metadata for the
/// squashed image.
pub mod metadata;
/// `docker save`/`load`/`rmi` round-trip with the container runtime.
pub mod daemon;

pub use image::DockerImage;
pub use layer::{ImageLayout, LayerInfo, LayerRef};
pub use manifest::{DockerConfig, DockerManifest};
pub use selector::FromLayer;
pub use tar::TarExtractor;
