use burn::{
    nn::loss::CrossEntropyLossConfig,
    prelude::*,
    tensor::backend::AutodiffBackend,
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};

use crate::WideResNet;

/// A batch of images with their gender and age labels.
#[derive(Clone, Debug)]
pub struct AgeGenderBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    /// Gender class per image, in `0..GENDER_CLASSES`.
    pub genders: Tensor<B, 1, Int>,
    /// Age class per image, in `0..AGE_CLASSES`.
    pub ages: Tensor<B, 1, Int>,
}

/// Result of a training or validation step.
pub struct AgeGenderOutput<B: Backend> {
    /// Sum of both head losses and the L2 weight penalty.
    pub loss: Tensor<B, 1>,
    pub gender: ClassificationOutput<B>,
    pub age: ClassificationOutput<B>,
}

impl<B: Backend> WideResNet<B> {
    pub fn forward_classification(&self, batch: AgeGenderBatch<B>) -> AgeGenderOutput<B> {
        let logits = self.forward_logits(batch.images);
        let loss_fn = CrossEntropyLossConfig::new().init(&logits.gender.device());

        let gender_loss = loss_fn.forward(logits.gender.clone(), batch.genders.clone());
        let age_loss = loss_fn.forward(logits.age.clone(), batch.ages.clone());
        let loss = gender_loss.clone() + age_loss.clone() + self.l2_penalty();

        AgeGenderOutput {
            loss,
            gender: ClassificationOutput::new(gender_loss, logits.gender, batch.genders),
            age: ClassificationOutput::new(age_loss, logits.age, batch.ages),
        }
    }
}

impl<B: AutodiffBackend> TrainStep<AgeGenderBatch<B>, AgeGenderOutput<B>> for WideResNet<B> {
    fn step(&self, batch: AgeGenderBatch<B>) -> TrainOutput<AgeGenderOutput<B>> {
        let item = self.forward_classification(batch);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<AgeGenderBatch<B>, AgeGenderOutput<B>> for WideResNet<B> {
    fn step(&self, batch: AgeGenderBatch<B>) -> AgeGenderOutput<B> {
        self.forward_classification(batch)
    }
}
