//! Shape and channel bookkeeping of a wide residual network, computed without any tensor.

use serde::{Deserialize, Serialize};

use crate::{
    block::WideStageConfig,
    error::{ConfigError, Result},
};

/// Channels produced by the stem convolution, whatever the width multiplier.
pub const STEM_CHANNELS: usize = 16;

/// Stride of the first block of each stage.
pub const STAGE_STRIDES: [usize; 3] = [1, 2, 2];

/// Channel counts of the stem and of the three stages: `[16, 16k, 32k, 64k]`.
pub fn stage_widths(width_multiplier: usize) -> [usize; 4] {
    [
        STEM_CHANNELS,
        16 * width_multiplier,
        32 * width_multiplier,
        64 * width_multiplier,
    ]
}

/// Number of residual blocks per stage for a network of the given depth.
///
/// The depth must satisfy `(depth - 4) % 6 == 0`. A stage always keeps its first block,
/// so a depth of 4 gives one block per stage.
pub fn blocks_per_stage(depth: usize) -> Result<usize> {
    match depth.checked_sub(4) {
        Some(rest) if rest % 6 == 0 => Ok(usize::max(rest / 6, 1)),
        _ => Err(ConfigError::InvalidDepth(depth)),
    }
}

/// Output side of a "same" padded layer with the given stride.
pub fn same_output_side(side: usize, stride: usize) -> usize {
    side.div_ceil(stride)
}

/// Resolved structure of a [wide residual network](crate::WideResNet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkLayout {
    pub image_side: usize,
    pub stage_widths: [usize; 4],
    pub blocks_per_stage: usize,
    pub stages: [WideStageConfig; 3],
    /// Side of the feature map leaving the last stage.
    pub feature_side: usize,
    /// Side of the feature map after classifier pooling.
    pub pooled_side: usize,
    /// Width of the flattened vector feeding both heads.
    pub flattened_features: usize,
}

impl NetworkLayout {
    pub fn stage_out_channels(&self) -> [usize; 3] {
        [
            self.stages[0].out_channels(),
            self.stages[1].out_channels(),
            self.stages[2].out_channels(),
        ]
    }

    pub fn num_blocks(&self) -> usize {
        self.stages.iter().map(|stage| stage.blocks().len()).sum()
    }

    /// Number of blocks whose skip connection is a 1x1 convolution.
    pub fn num_projection_shortcuts(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|stage| stage.blocks())
            .filter(|block| block.projects_shortcut())
            .count()
    }
}
