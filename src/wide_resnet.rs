use core::array;

use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::{conv::Conv2d, BatchNorm, Initializer, Linear, LinearConfig, Relu},
    tensor::{activation::softmax, backend::Backend, Device, Tensor},
};
use tracing::debug;

use crate::{
    block::{batch_norm_config, conv_config, squared_norm},
    block::{WideBasicBlockConfig, WideStage, WideStageConfig},
    error::{self, ConfigError},
    layout::{self, NetworkLayout, STAGE_STRIDES, STEM_CHANNELS},
    pooling::{ClassifierPool, ClassifierPooling},
};

/// Output width of the gender head.
pub const GENDER_CLASSES: usize = 2;
/// Output width of the age head (ages 0 to 100).
pub const AGE_CLASSES: usize = 101;
/// Color channels of the input images.
pub const INPUT_CHANNELS: usize = 3;

/// Position of the channel axis in the image tensors fed to the model.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    /// `[batch, channels, height, width]`
    ChannelsFirst,
    /// `[batch, height, width, channels]`
    ChannelsLast,
}

impl ChannelOrder {
    /// Shape of a batch of `batch` square images of side `side`.
    pub fn input_shape(&self, batch: usize, side: usize) -> [usize; 4] {
        match self {
            Self::ChannelsFirst => [batch, INPUT_CHANNELS, side, side],
            Self::ChannelsLast => [batch, side, side, INPUT_CHANNELS],
        }
    }

    fn to_channels_first<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::ChannelsFirst => x,
            // [B, H, W, C] -> [B, C, W, H] -> [B, C, H, W]
            Self::ChannelsLast => x.swap_dims(1, 3).swap_dims(2, 3),
        }
    }

    fn from_channels_first<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::ChannelsFirst => x,
            // [B, C, H, W] -> [B, H, C, W] -> [B, H, W, C]
            Self::ChannelsLast => x.swap_dims(1, 2).swap_dims(2, 3),
        }
    }
}

/// Outputs of the two classification heads, `[batch, classes]` each.
#[derive(Debug, Clone)]
pub struct WideResNetOutput<B: Backend> {
    pub gender: Tensor<B, 2>,
    pub age: Tensor<B, 2>,
}

/// Wide residual network with a gender head and an age head.
/// From [`Wide Residual Networks`](https://arxiv.org/abs/1605.07146).
#[derive(Module, Debug)]
pub struct WideResNet<B: Backend> {
    conv1: Conv2d<B>,
    stage1: WideStage<B>,
    stage2: WideStage<B>,
    stage3: WideStage<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    pool: ClassifierPool,
    gender: Linear<B>,
    age: Linear<B>,
    channel_order: Ignored<ChannelOrder>,
    image_side: usize,
    weight_decay: f64,
}

impl<B: Backend> WideResNet<B> {
    /// Class probabilities of both heads. Each row sums to one.
    pub fn forward(&self, images: Tensor<B, 4>) -> WideResNetOutput<B> {
        let logits = self.forward_logits(images);

        WideResNetOutput {
            gender: softmax(logits.gender, 1),
            age: softmax(logits.age, 1),
        }
    }

    /// Pre-softmax scores of both heads.
    pub fn forward_logits(&self, images: Tensor<B, 4>) -> WideResNetOutput<B> {
        let features = self.forward_features(images);

        WideResNetOutput {
            gender: self.gender.forward(features.clone()),
            age: self.age.forward(features),
        }
    }

    /// Flattened feature vector shared by both heads.
    pub fn forward_features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let out = self.channel_order.to_channels_first(images);

        // Stem
        let out = self.conv1.forward(out);

        // Residual stages
        let out = self.stage1.forward(out);
        let out = self.stage2.forward(out);
        let out = self.stage3.forward(out);

        let out = self.bn.forward(out);
        let out = self.relu.forward(out);
        let out = self.pool.forward(out);

        // Flatten in the order of the input convention
        let out = self.channel_order.from_channels_first(out);
        out.flatten(1, 3)
    }

    /// L2 weight penalty over every convolution kernel and both heads,
    /// `weight_decay * sum(w^2)`. Meant to be added to the training loss.
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        let sum = squared_norm(&self.conv1)
            + self.stage1.squared_weights()
            + self.stage2.squared_weights()
            + self.stage3.squared_weights()
            + self.gender.weight.val().powf_scalar(2.0).sum()
            + self.age.weight.val().powf_scalar(2.0).sum();

        sum.mul_scalar(self.weight_decay)
    }

    pub fn stages(&self) -> [&WideStage<B>; 3] {
        [&self.stage1, &self.stage2, &self.stage3]
    }

    pub fn channel_order(&self) -> &ChannelOrder {
        &self.channel_order
    }

    /// Expected shape of an input batch.
    pub fn input_shape(&self, batch: usize) -> [usize; 4] {
        self.channel_order.input_shape(batch, self.image_side)
    }
}

/// [Wide residual network](WideResNet) configuration.
#[derive(Config, Debug)]
pub struct WideResNetConfig {
    /// Side of the square input images.
    pub image_side: usize,

    /// Network depth, `(depth - 4) / 6` blocks per stage.
    #[config(default = "16")]
    pub depth: usize,

    /// Width multiplier `k` of the stage widths `[16k, 32k, 64k]`.
    #[config(default = "8")]
    pub width_multiplier: usize,

    #[config(default = "0.0")]
    pub dropout: f64,

    /// L2 regularization factor of [`WideResNet::l2_penalty`].
    #[config(default = "0.0005")]
    pub weight_decay: f64,

    #[config(default = "ChannelOrder::ChannelsLast")]
    pub channel_order: ChannelOrder,

    #[config(default = "Initializer::Normal { mean: 0.0, std: 0.05 }")]
    pub initializer: Initializer,

    #[config(default = "ClassifierPooling::SameWindow { window: 8 }")]
    pub pooling: ClassifierPooling,

    /// Backend seed set right before parameters are created.
    #[config(default = "None")]
    pub seed: Option<u64>,
}

impl WideResNetConfig {
    /// Resolve the network structure without allocating any parameter.
    pub fn layout(&self) -> error::Result<NetworkLayout> {
        let blocks_per_stage = layout::blocks_per_stage(self.depth)?;
        if self.width_multiplier == 0 {
            return Err(ConfigError::ZeroWidthMultiplier);
        }
        if self.image_side == 0 {
            return Err(ConfigError::ZeroImageSide);
        }

        let stage_widths = layout::stage_widths(self.width_multiplier);
        let [stage1, stage2, stage3] = array::from_fn(|i| {
            let first = WideBasicBlockConfig::new(stage_widths[i], stage_widths[i + 1])
                .with_stride(STAGE_STRIDES[i])
                .with_dropout(self.dropout)
                .with_initializer(self.initializer.clone());
            WideStageConfig::new(first, blocks_per_stage)
        });
        let stages = [stage1?, stage2?, stage3?];
        let side = stages
            .iter()
            .fold(self.image_side, |side, stage| stage.output_side(side));
        let pooled_side = self.pooling.output_side(side)?;

        Ok(NetworkLayout {
            image_side: self.image_side,
            stage_widths,
            blocks_per_stage,
            stages,
            feature_side: side,
            pooled_side,
            flattened_features: stage_widths[3] * pooled_side * pooled_side,
        })
    }

    /// Initialize a new [wide residual network](WideResNet).
    ///
    /// # Arguments
    ///
    /// * `device` - Device to create the module on.
    ///
    /// # Returns
    ///
    /// The network, or the configuration error found before any parameter was created.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> error::Result<WideResNet<B>> {
        let layout = self.layout()?;

        debug!(
            image_side = self.image_side,
            depth = self.depth,
            width_multiplier = self.width_multiplier,
            channel_order = ?self.channel_order,
            "Creating wide residual network"
        );

        if let Some(seed) = self.seed {
            B::seed(seed);
        }

        let [stage1, stage2, stage3] = &layout.stages;
        let head = |num_classes: usize| {
            LinearConfig::new(layout.flattened_features, num_classes)
                .with_bias(false)
                .with_initializer(self.initializer.clone())
                .init(device)
        };

        Ok(WideResNet {
            conv1: conv_config([INPUT_CHANNELS, STEM_CHANNELS], 3, 1, &self.initializer).init(device),
            stage1: stage1.init(device)?,
            stage2: stage2.init(device)?,
            stage3: stage3.init(device)?,
            bn: batch_norm_config(layout.stage_widths[3]).init(device),
            relu: Relu::new(),
            pool: self.pooling.init(layout.feature_side),
            gender: head(GENDER_CLASSES),
            age: head(AGE_CLASSES),
            channel_order: Ignored(self.channel_order.clone()),
            image_side: self.image_side,
            weight_decay: self.weight_decay,
        })
    }
}
