use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{AvgPool2d, AvgPool2dConfig},
        PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::error::{self, ConfigError};

/// Pooling applied to the last feature map before flattening.
#[derive(Config, Debug, PartialEq)]
pub enum ClassifierPooling {
    /// Average over a `window x window` neighbourhood with stride 1 and "same" padding.
    ///
    /// The feature map keeps its spatial size, so the heads see `C x H x W` features.
    /// Padded cells do not count in the average.
    SameWindow { window: usize },
    /// Average over the whole feature map, the heads see `C` features.
    Global,
}

impl ClassifierPooling {
    /// Spatial side of the pooled map for a feature map of side `feature_side`.
    pub fn output_side(&self, feature_side: usize) -> error::Result<usize> {
        match self {
            Self::SameWindow { window: 0 } => Err(ConfigError::InvalidPoolingWindow),
            Self::SameWindow { .. } => Ok(feature_side),
            Self::Global => Ok(1),
        }
    }

    /// Initialize the pooling layer for a feature map of side `feature_side`.
    pub(crate) fn init(&self, feature_side: usize) -> ClassifierPool {
        match self {
            Self::SameWindow { window } => {
                // Odd padding goes to the trailing side
                let pad_before = (window - 1) / 2;
                let pad_after = window - 1 - pad_before;
                ClassifierPool::new(*window, pad_before, pad_after)
            }
            Self::Global => ClassifierPool::new(feature_side, 0, 0),
        }
    }
}

/// Stride 1 average pooling with optional asymmetric zero padding.
#[derive(Module, Clone, Debug)]
pub struct ClassifierPool {
    pool: AvgPool2d,
    pad_before: usize,
    pad_after: usize,
}

impl ClassifierPool {
    fn new(window: usize, pad_before: usize, pad_after: usize) -> Self {
        let pool = AvgPool2dConfig::new([window, window])
            .with_strides([1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .with_count_include_pad(true)
            .init();

        Self {
            pool,
            pad_before,
            pad_after,
        }
    }

    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        if self.pad_before + self.pad_after == 0 {
            return self.pool.forward(input);
        }

        // Average only over real cells: pool the padded map and the padded mask, then divide
        let mask = self.zero_pad(input.ones_like());
        let sums = self.pool.forward(self.zero_pad(input));
        let counts = self.pool.forward(mask);

        sums / counts
    }

    fn zero_pad<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, channels, height, width] = input.dims();
        let pad = self.pad_before + self.pad_after;
        let (top, left) = (self.pad_before, self.pad_before);

        Tensor::zeros([batch, channels, height + pad, width + pad], &input.device())
            .slice_assign(
                [0..batch, 0..channels, top..top + height, left..left + width],
                input,
            )
    }
}
