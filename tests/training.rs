#![cfg(feature = "train")]

use burn::{
    backend::{Autodiff, NdArray},
    tensor::{Distribution, Int, Tensor},
    train::{TrainStep, ValidStep},
};
use wide_resnet_burn::{
    training::{AgeGenderBatch, AgeGenderOutput},
    WideResNet, WideResNetConfig, AGE_CLASSES, GENDER_CLASSES,
};

type B = Autodiff<NdArray<f32>>;

fn model() -> WideResNet<B> {
    WideResNetConfig::new(8)
        .with_depth(10)
        .with_width_multiplier(1)
        .with_dropout(0.3)
        .init(&Default::default())
        .unwrap()
}

fn batch(model: &WideResNet<B>) -> AgeGenderBatch<B> {
    let device = Default::default();

    AgeGenderBatch {
        images: Tensor::random(model.input_shape(2), Distribution::Default, &device),
        genders: Tensor::<B, 1, Int>::from_ints([0, 1], &device),
        ages: Tensor::<B, 1, Int>::from_ints([23, 100], &device),
    }
}

#[test]
fn loss_includes_both_heads_and_penalty() {
    let model = model();

    let output: AgeGenderOutput<B> =
        <WideResNet<B> as ValidStep<_, _>>::step(&model, batch(&model));

    let loss = output.loss.into_scalar();
    let heads = output.gender.loss.into_scalar() + output.age.loss.into_scalar();
    let penalty = model.l2_penalty().into_scalar();

    assert!(loss.is_finite());
    assert!((loss - heads - penalty).abs() < 1e-3);
    assert_eq!(output.gender.output.dims(), [2, GENDER_CLASSES]);
    assert_eq!(output.age.output.dims(), [2, AGE_CLASSES]);
}

#[test]
fn train_step_produces_gradients() {
    let model = model();

    let output = <WideResNet<B> as TrainStep<_, _>>::step(&model, batch(&model));

    assert!(output.item.loss.into_scalar().is_finite());
    assert!(!output.grads.is_empty());
}
