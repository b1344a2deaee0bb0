use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, InstanceNorm, InstanceNormConfig, LeakyRelu,
        LeakyReluConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::model::noise::{Mode, NoiseInjection, NoiseInjectionConfig};

/// conv3x3 -> batch norm -> relu, optionally followed by a 2x2 max pool.
#[derive(Module, Debug)]
pub struct DownBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    pool: Option<MaxPool2d>,
}
impl<B: Backend> DownBlock<B> {
    pub fn new(channels: [usize; 2], pool: bool, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let bn = BatchNormConfig::new(channels[1]).init(device);
        let relu = Relu::new();
        let pool = pool.then(|| MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init());

        Self {
            conv,
            bn,
            relu,
            pool,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        let output = self.bn.forward(output);
        let output = self.relu.forward(output);

        match &self.pool {
            Some(pool) => pool.forward(output),
            None => output,
        }
    }
}

/// Transposed conv (x2 upsample) -> instance norm -> noise -> relu.
#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    deconv: ConvTranspose2d<B>,
    norm: InstanceNorm<B>,
    noise: NoiseInjection<B>,
    relu: Relu,
}
impl<B: Backend> UpBlock<B> {
    pub fn new(channels: [usize; 2], device: &B::Device) -> Self {
        let deconv = upsample_conv(channels, device);
        let norm = InstanceNormConfig::new(channels[1])
            .with_affine(false)
            .init(device);
        let noise = NoiseInjectionConfig::new(channels[1]).init(device);
        let relu = Relu::new();

        Self {
            deconv,
            norm,
            noise,
            relu,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>, mode: Mode) -> Tensor<B, 4> {
        let output = self.deconv.forward(input);
        let output = self.norm.forward(output);
        let output = self.noise.forward(output, mode);
        self.relu.forward(output)
    }
}

/// 4x4 stride-2 transposed convolution; doubles height and width exactly.
pub fn upsample_conv<B: Backend>(channels: [usize; 2], device: &B::Device) -> ConvTranspose2d<B> {
    ConvTranspose2dConfig::new(channels, [4, 4])
        .with_stride([2, 2])
        .with_padding([1, 1])
        .init(device)
}

/// conv4x4 stride 2 -> leaky relu(0.2). Halves height and width.
#[derive(Module, Debug)]
pub struct DiscBlock<B: Backend> {
    conv: Conv2d<B>,
    lrelu: LeakyRelu,
}
impl<B: Backend> DiscBlock<B> {
    pub fn new(channels: [usize; 2], device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, [4, 4])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_stride([2, 2])
            .init(device);
        let lrelu = LeakyReluConfig::new().with_negative_slope(0.2).init();

        Self { conv, lrelu }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        self.lrelu.forward(output)
    }
}

/// conv3x3 stride 2 -> batch norm -> leaky relu(0.2).
#[derive(Module, Debug)]
pub struct ClassifierBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    lrelu: LeakyRelu,
}
impl<B: Backend> ClassifierBlock<B> {
    pub fn new(channels: [usize; 2], device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_stride([2, 2])
            .init(device);
        let bn = BatchNormConfig::new(channels[1])
            .with_momentum(0.8)
            .init(device);
        let lrelu = LeakyReluConfig::new().with_negative_slope(0.2).init();

        Self { conv, bn, lrelu }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        let output = self.bn.forward(output);
        self.lrelu.forward(output)
    }
}

/// Bilinear resize with half-pixel sampling (corners not aligned).
///
/// Source coordinate of output pixel `d` is `(d + 0.5) * in / out - 0.5`,
/// clamped at the low edge; the two neighbours are blended linearly. Applied
/// separably as `rows x input x cols`.
pub fn resize_bilinear<B: Backend>(input: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [batch, channels, height, width] = input.dims();
    let [out_height, out_width] = size;
    let device = input.device();

    let rows = interpolation_matrix::<B>(height, out_height, &device)
        .unsqueeze::<4>()
        .expand([batch, channels, out_height, height]);
    let cols = interpolation_matrix::<B>(width, out_width, &device)
        .transpose()
        .unsqueeze::<4>()
        .expand([batch, channels, width, out_width]);

    rows.matmul(input).matmul(cols)
}

/// `[output, input]` matrix whose rows hold the two lerp weights of each output pixel.
fn interpolation_matrix<B: Backend>(
    input: usize,
    output: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let scale = input as f32 / output as f32;
    let mut weights = vec![0.0f32; output * input];
    for dst in 0..output {
        let src = ((dst as f32 + 0.5) * scale - 0.5).max(0.0);
        let lower = (src.floor() as usize).min(input - 1);
        let upper = (lower + 1).min(input - 1);
        let frac = src - lower as f32;

        weights[dst * input + lower] += 1.0 - frac;
        weights[dst * input + upper] += frac;
    }

    Tensor::<B, 1>::from_floats(weights.as_slice(), device).reshape([output, input])
}
