use burn::{
    backend::NdArray,
    module::Module,
    tensor::{Distribution, Tensor},
};
use wide_resnet_burn::{
    ChannelOrder, ClassifierPooling, WideResNet, WideResNetConfig, AGE_CLASSES, GENDER_CLASSES,
};

type B = NdArray<f32>;

fn small_config(image_side: usize) -> WideResNetConfig {
    WideResNetConfig::new(image_side)
        .with_depth(10)
        .with_width_multiplier(1)
}

fn random_images(model: &WideResNet<B>, batch: usize) -> Tensor<B, 4> {
    Tensor::random(model.input_shape(batch), Distribution::Default, &Default::default())
}

fn max_abs_diff(a: Tensor<B, 2>, b: Tensor<B, 2>) -> f32 {
    (a - b).abs().max().into_scalar()
}

fn assert_probabilities(probs: Tensor<B, 2>) {
    let [batch, _] = probs.dims();
    let ones = Tensor::ones([batch, 1], &probs.device());

    assert!(probs.clone().min().into_scalar() >= 0.0);
    assert!(probs.clone().max().into_scalar() <= 1.0 + 1e-6);
    assert!(max_abs_diff(probs.sum_dim(1), ones) < 1e-5);
}

#[test]
fn heads_have_fixed_widths() {
    let device = Default::default();

    for (side, depth, k) in [(8, 4, 1), (12, 10, 2), (16, 16, 1)] {
        let model = small_config(side)
            .with_depth(depth)
            .with_width_multiplier(k)
            .init::<B>(&device)
            .unwrap();

        let output = model.forward(random_images(&model, 3));

        assert_eq!(output.gender.dims(), [3, GENDER_CLASSES]);
        assert_eq!(output.age.dims(), [3, AGE_CLASSES]);
    }
}

#[test]
fn heads_output_probabilities() {
    let device = Default::default();
    let model = small_config(16).init::<B>(&device).unwrap();

    let output = model.forward(random_images(&model, 4));

    assert_probabilities(output.gender);
    assert_probabilities(output.age);
}

#[test]
fn input_shape_follows_channel_order() {
    let device = Default::default();
    let last = small_config(16).init::<B>(&device).unwrap();
    let first = small_config(16)
        .with_channel_order(ChannelOrder::ChannelsFirst)
        .init::<B>(&device)
        .unwrap();

    assert_eq!(last.channel_order(), &ChannelOrder::ChannelsLast);
    assert_eq!(last.input_shape(2), [2, 16, 16, 3]);
    assert_eq!(first.input_shape(2), [2, 3, 16, 16]);

    assert_eq!(first.forward(random_images(&first, 2)).age.dims(), [2, AGE_CLASSES]);
}

#[test]
fn flattened_features_match_layout() {
    let device = Default::default();

    for pooling in [
        ClassifierPooling::SameWindow { window: 8 },
        ClassifierPooling::SameWindow { window: 3 },
        ClassifierPooling::Global,
    ] {
        let config = small_config(15).with_pooling(pooling);
        let layout = config.layout().unwrap();
        let model = config.init::<B>(&device).unwrap();

        let features = model.forward_features(random_images(&model, 2));

        // 15 -> 15 -> 8 -> 4
        assert_eq!(layout.feature_side, 4);
        assert_eq!(features.dims(), [2, layout.flattened_features]);
    }
}

#[test]
fn global_pooling_sees_one_value_per_channel() {
    let device = Default::default();
    let config = small_config(16)
        .with_width_multiplier(2)
        .with_pooling(ClassifierPooling::Global);
    let model = config.init::<B>(&device).unwrap();

    let features = model.forward_features(random_images(&model, 2));

    assert_eq!(features.dims(), [2, 128]);
}

#[test]
fn channel_orders_agree_on_permuted_input() {
    let device = Default::default();
    let config = small_config(8).with_pooling(ClassifierPooling::Global);
    let first = config
        .clone()
        .with_channel_order(ChannelOrder::ChannelsFirst)
        .init::<B>(&device)
        .unwrap();
    let last = config
        .with_channel_order(ChannelOrder::ChannelsLast)
        .init::<B>(&device)
        .unwrap()
        .load_record(first.clone().into_record());

    let images = random_images(&first, 2);
    // [B, C, H, W] -> [B, H, W, C]
    let images_last = images.clone().swap_dims(1, 2).swap_dims(2, 3);

    let expected = first.forward(images);
    let output = last.forward(images_last);

    assert!(max_abs_diff(output.gender, expected.gender) < 1e-4);
    assert!(max_abs_diff(output.age, expected.age) < 1e-4);
}

#[test]
fn logits_and_probabilities_agree() {
    let device = Default::default();
    let model = small_config(8).with_dropout(0.3).init::<B>(&device).unwrap();
    let images = random_images(&model, 2);

    let logits = model.forward_logits(images.clone());
    let probs = model.forward(images);

    let expected = burn::tensor::activation::softmax(logits.age, 1);
    assert!(max_abs_diff(probs.age, expected) < 1e-6);
}

#[test]
fn l2_penalty_scales_with_weight_decay() {
    let device = Default::default();
    let model = small_config(8).init::<B>(&device).unwrap();
    let doubled = small_config(8)
        .with_weight_decay(0.001)
        .init::<B>(&device)
        .unwrap()
        .load_record(model.clone().into_record());
    let disabled = small_config(8)
        .with_weight_decay(0.0)
        .init::<B>(&device)
        .unwrap();

    let penalty = model.l2_penalty().into_scalar();
    let doubled_penalty = doubled.l2_penalty().into_scalar();

    assert!(penalty > 0.0);
    assert!((doubled_penalty / penalty - 2.0).abs() < 1e-4);
    assert_eq!(disabled.l2_penalty().into_scalar(), 0.0);
}
