//! Layer Selector (component C): partitions the ordered layer list into
//! layers to keep untouched ("to move") and layers to squash.
//!
//! Grounded on `docker_squash.image.Image._before_squashing`'s
//! `number_of_layers` / `marker` arithmetic, generalized into a standalone,
//! testable unit instead of being inlined into the orchestrator the way the
//! teacher's `DockerImage::squash_layers` currently does it.

use crate::docker::layer::LayerInfo;
use crate::error::{Result, SquashError};

/// How the caller identified where squashing should start from.
#[derive(Debug, Clone)]
pub enum FromLayer {
    /// Squash the last `N` layers.
    Count(usize),
    /// Squash everything from the layer whose digest starts with this id
    /// onward.
    Id(String),
}

impl FromLayer {
    /// Parse a `--from-layer` argument: an integer count, or a layer id.
    pub fn parse(spec: &str) -> Self {
        match spec.parse::<usize>() {
            Ok(count) => FromLayer::Count(count),
            Err(_) => FromLayer::Id(spec.to_string()),
        }
    }
}

/// The result of partitioning: layers kept as-is, and layers to be merged.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Oldest layers, left untouched, base→top order.
    pub to_move: Vec<LayerInfo>,
    /// Newest layers, to be merged into one, base→top order.
    pub to_squash: Vec<LayerInfo>,
    /// Identifier of the last non-empty layer in `to_move`, or `None` if
    /// `to_move` has no non-empty layer. Becomes the new image's
    /// `config.Image` and the squashed layer's `parent`.
    pub squash_id: Option<String>,
}

/// Partition `layers` (oldest→newest) according to `from`.
pub fn partition(layers: &[LayerInfo], from: &FromLayer) -> Result<Partition> {
    if layers.is_empty() {
        return Err(SquashError::InvalidInput("No layers to merge".to_string()));
    }

    let number_of_layers = match from {
        FromLayer::Count(count) => {
            if *count == 0 || *count > layers.len() {
                return Err(SquashError::InvalidInput(format!(
                    "Number of layers to squash cannot be less or equal 0 or greater than the image's layer count ({}), provided: {}",
                    layers.len(),
                    count
                )));
            }
            *count
        }
        FromLayer::Id(id) => {
            if id.len() < 8 {
                return Err(SquashError::InvalidInput(format!(
                    "Layer ID must be at least 8 characters long, got: {}",
                    id.len()
                )));
            }

            if id == "<missing>" {
                return Err(SquashError::InvalidInput(
                    "Cannot squash from a layer with no identifier (<missing>)".to_string(),
                ));
            }

            let position = layers
                .iter()
                .position(|layer| layer.digest.starts_with(id.as_str()))
                .ok_or_else(|| SquashError::LayerNotFound(id.clone()))?;

            layers.len() - position - 1
        }
    };

    let marker = layers.len() - number_of_layers;
    let to_move = layers[..marker].to_vec();
    let to_squash = layers[marker..].to_vec();

    if to_squash.len() < 2 {
        return Err(SquashError::SquashUnnecessary(
            "Single layer marked to squash, no squashing is required".to_string(),
        ));
    }

    // The last *non-empty* moved layer, not simply the last entry: a moved
    // range can end on an empty-layer history entry, and that virtual layer
    // has no identifier of its own to become `config.Image`.
    let squash_id = to_move.iter().rev().find(|l| !l.is_empty()).map(|l| l.digest.clone());

    Ok(Partition {
        to_move,
        to_squash,
        squash_id,
    })
}
