use alloc::vec::Vec;
use core::iter;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Device, Tensor},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    error::{self, ConfigError},
    layout::same_output_side,
};

/// Conv config with "same" padding and no bias.
///
/// Symmetric padding of `(kernel - 1) / 2` keeps the output side at `ceil(side / stride)`
/// for odd kernels, whatever the stride.
pub(crate) fn conv_config(
    channels: [usize; 2],
    kernel_size: usize,
    stride: usize,
    initializer: &Initializer,
) -> Conv2dConfig {
    let pad = (kernel_size - 1) / 2;

    Conv2dConfig::new(channels, [kernel_size, kernel_size])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(pad, pad))
        .with_bias(false)
        .with_initializer(initializer.clone())
}

/// Batch norm config matching the Keras defaults (eps 1e-3, running average momentum 0.99).
pub(crate) fn batch_norm_config(num_features: usize) -> BatchNormConfig {
    BatchNormConfig::new(num_features)
        .with_epsilon(1e-3)
        .with_momentum(0.01)
}

/// Sum of the squared entries of a convolution kernel.
pub(crate) fn squared_norm<B: Backend>(conv: &Conv2d<B>) -> Tensor<B, 1> {
    conv.weight.val().powf_scalar(2.0).sum()
}

/// Wide residual network basic block.
///
/// Pre-activation variant: `BN -> ReLU -> conv3x3 -> BN -> ReLU -> [dropout] -> conv3x3`,
/// summed with either the raw input or a 1x1 projection of the pre-activated input.
#[derive(Module, Debug)]
pub struct WideBasicBlock<B: Backend> {
    bn1: BatchNorm<B, 2>,
    conv1: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    dropout: Option<Dropout>,
    conv2: Conv2d<B>,
    shortcut: Option<Conv2d<B>>,
    relu: Relu,
}

impl<B: Backend> WideBasicBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let preact = self.bn1.forward(input.clone());
        let preact = self.relu.forward(preact);

        // The projection sees the pre-activated input, the identity sees the raw input
        let identity = match &self.shortcut {
            Some(conv) => conv.forward(preact.clone()),
            None => input,
        };

        let out = self.conv1.forward(preact);
        let out = self.bn2.forward(out);
        let out = self.relu.forward(out);
        let out = match &self.dropout {
            Some(dropout) => dropout.forward(out),
            None => out,
        };
        let out = self.conv2.forward(out);

        out + identity
    }

    /// Whether the skip connection goes through a 1x1 convolution.
    pub fn has_projection_shortcut(&self) -> bool {
        self.shortcut.is_some()
    }

    pub fn out_channels(&self) -> usize {
        let [out_channels, _, _, _] = self.conv2.weight.dims();
        out_channels
    }

    pub(crate) fn squared_weights(&self) -> Tensor<B, 1> {
        let sum = squared_norm(&self.conv1) + squared_norm(&self.conv2);
        match &self.shortcut {
            Some(conv) => sum + squared_norm(conv),
            None => sum,
        }
    }
}

/// [Wide basic block](WideBasicBlock) configuration.
#[derive(Config, Debug, PartialEq)]
pub struct WideBasicBlockConfig {
    pub in_channels: usize,
    pub out_channels: usize,

    /// Stride of the first 3x3 convolution and of the projection shortcut.
    #[config(default = "1")]
    pub stride: usize,

    /// Dropout probability between the two convolutions, disabled when zero.
    #[config(default = "0.0")]
    pub dropout: f64,

    #[config(default = "Initializer::Normal { mean: 0.0, std: 0.05 }")]
    pub initializer: Initializer,
}

impl WideBasicBlockConfig {
    /// Whether the block changes the tensor identity (channel count or spatial resolution).
    ///
    /// Such a block shares its first pre-activation with a 1x1 projection shortcut,
    /// any other block adds its raw input back.
    pub fn projects_shortcut(&self) -> bool {
        self.in_channels != self.out_channels || self.stride != 1
    }

    /// Config of the blocks following this one in a stage: same width, stride 1.
    pub fn repeated(&self) -> Self {
        Self {
            in_channels: self.out_channels,
            stride: 1,
            ..self.clone()
        }
    }

    /// Spatial side of the block output for an input of side `side`.
    pub fn output_side(&self, side: usize) -> usize {
        same_output_side(side, self.stride)
    }

    /// Check that channel counts and stride are positive.
    pub fn validate(&self) -> error::Result<()> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(ConfigError::InvalidChannels {
                in_channels: self.in_channels,
                out_channels: self.out_channels,
            });
        }
        if self.stride == 0 {
            return Err(ConfigError::ZeroStride);
        }

        Ok(())
    }

    /// Initialize a new [wide basic block](WideBasicBlock) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> error::Result<WideBasicBlock<B>> {
        self.validate()?;

        trace!(
            in_channels = self.in_channels,
            out_channels = self.out_channels,
            stride = self.stride,
            projection = self.projects_shortcut(),
            "Creating wide basic block"
        );

        let channels = [self.in_channels, self.out_channels];
        let shortcut = if self.projects_shortcut() {
            Some(conv_config(channels, 1, self.stride, &self.initializer).init(device))
        } else {
            None
        };
        let dropout = if self.dropout > 0.0 {
            Some(DropoutConfig::new(self.dropout).init())
        } else {
            None
        };

        Ok(WideBasicBlock {
            bn1: batch_norm_config(self.in_channels).init(device),
            conv1: conv_config(channels, 3, self.stride, &self.initializer).init(device),
            bn2: batch_norm_config(self.out_channels).init(device),
            dropout,
            conv2: conv_config([self.out_channels, self.out_channels], 3, 1, &self.initializer)
                .init(device),
            shortcut,
            relu: Relu::new(),
        })
    }
}

/// Collection of sequential wide basic blocks sharing the same output width.
#[derive(Module, Debug)]
pub struct WideStage<B: Backend> {
    blocks: Vec<WideBasicBlock<B>>,
}

impl<B: Backend> WideStage<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = input;
        for block in &self.blocks {
            out = block.forward(out);
        }
        out
    }

    pub fn blocks(&self) -> &[WideBasicBlock<B>] {
        &self.blocks
    }

    pub fn out_channels(&self) -> usize {
        // A stage always holds at least one block
        self.blocks[0].out_channels()
    }

    pub(crate) fn squared_weights(&self) -> Tensor<B, 1> {
        self.blocks[1..]
            .iter()
            .fold(self.blocks[0].squared_weights(), |acc, block| {
                acc + block.squared_weights()
            })
    }
}

/// [Wide stage](WideStage) configuration.
///
/// Holds at least one valid block, deserialization included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedStageConfig")]
pub struct WideStageConfig {
    blocks: Vec<WideBasicBlockConfig>,
}

#[derive(Deserialize)]
struct UncheckedStageConfig {
    blocks: Vec<WideBasicBlockConfig>,
}

impl TryFrom<UncheckedStageConfig> for WideStageConfig {
    type Error = ConfigError;

    fn try_from(stage: UncheckedStageConfig) -> error::Result<Self> {
        Self::from_blocks(stage.blocks)
    }
}

impl WideStageConfig {
    /// Create a stage of `num_blocks` blocks.
    ///
    /// Only the `first` block may change the channel count or the resolution,
    /// the others use [`WideBasicBlockConfig::repeated`].
    pub fn new(first: WideBasicBlockConfig, num_blocks: usize) -> error::Result<Self> {
        if num_blocks == 0 {
            return Err(ConfigError::EmptyStage);
        }

        let next = first.repeated();
        let blocks = iter::once(first)
            .chain(iter::repeat(next).take(num_blocks - 1))
            .collect();

        Self::from_blocks(blocks)
    }

    fn from_blocks(blocks: Vec<WideBasicBlockConfig>) -> error::Result<Self> {
        if blocks.is_empty() {
            return Err(ConfigError::EmptyStage);
        }
        for block in &blocks {
            block.validate()?;
        }

        Ok(Self { blocks })
    }

    pub fn blocks(&self) -> &[WideBasicBlockConfig] {
        &self.blocks
    }

    pub fn in_channels(&self) -> usize {
        self.blocks[0].in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.blocks[0].out_channels
    }

    /// Spatial side of the stage output for an input of side `side`.
    pub fn output_side(&self, side: usize) -> usize {
        self.blocks
            .iter()
            .fold(side, |side, block| block.output_side(side))
    }

    /// Initialize a new [wide stage](WideStage) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> error::Result<WideStage<B>> {
        debug!(
            in_channels = self.in_channels(),
            out_channels = self.out_channels(),
            num_blocks = self.blocks.len(),
            "Creating wide stage"
        );

        let blocks = self
            .blocks
            .iter()
            .map(|block| block.init(device))
            .collect::<error::Result<_>>()?;

        Ok(WideStage { blocks })
    }
}
