use burn::{module::Module, nn::conv::ConvTranspose2d, prelude::*};
use tracing::debug;

use crate::{
    error::{ensure_channels, Error},
    model::{
        attention::{AttentionKind, SpatialAttention, SpatialAttentionConfig},
        layers::{upsample_conv, UpBlock},
        noise::Mode,
    },
};

#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    up_layer_1: UpBlock<B>,
    up_layer_2: UpBlock<B>,
    attention: Vec<SpatialAttention<B>>,
    out_layer: ConvTranspose2d<B>,
    in_channels: usize,
}
impl<B: Backend> Generator<B> {
    /// Upsamples a `[B, in_channels, h, w]` latent to a `[B, out_channels, 8h, 8w]`
    /// image in `[-1, 1]`.
    pub fn forward(&self, input: Tensor<B, 4>, mode: Mode) -> crate::Result<Tensor<B, 4>> {
        ensure_channels("generator", input.dims(), self.in_channels)?;

        let up_output = self.up_layer_1.forward(input, mode);
        let up_output = self.up_layer_2.forward(up_output, mode);

        let mut attn_output = up_output;
        for block in &self.attention {
            attn_output = block.forward(attn_output)?;
        }

        let out = self.out_layer.forward(attn_output);

        Ok(burn::tensor::activation::tanh(out))
    }
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    #[config(default = 257)]
    pub in_channels: usize,
    /// Width after the first upsampling; the attention stage runs at half of it.
    #[config(default = 256)]
    pub hidden_channels: usize,
    #[config(default = 3)]
    pub out_channels: usize,
    #[config(default = 2)]
    pub attention_blocks: usize,
    #[config(default = "AttentionKind::MultiHead")]
    pub attention_kind: AttentionKind,
    #[config(default = 4)]
    pub num_heads: usize,
}
impl GeneratorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<Generator<B>> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(Error::config("generator", "channel counts must be positive"));
        }
        if self.hidden_channels < 2 || self.hidden_channels % 2 != 0 {
            return Err(Error::config(
                "generator",
                format!("hidden_channels must be even, got {}", self.hidden_channels),
            ));
        }
        let attention_channels = self.hidden_channels / 2;

        let up_layer_1 = UpBlock::new([self.in_channels, self.hidden_channels], device);
        let up_layer_2 = UpBlock::new([self.hidden_channels, attention_channels], device);

        let attention_config = SpatialAttentionConfig::new(attention_channels)
            .with_kind(self.attention_kind.clone())
            .with_num_heads(self.num_heads);
        let attention = (0..self.attention_blocks)
            .map(|_| attention_config.init(device))
            .collect::<crate::Result<Vec<_>>>()?;

        let out_layer = upsample_conv([attention_channels, self.out_channels], device);

        debug!(
            in_channels = self.in_channels,
            attention_channels,
            attention_blocks = self.attention_blocks,
            kind = ?self.attention_kind,
            "generator initialised"
        );

        Ok(Generator {
            up_layer_1,
            up_layer_2,
            attention,
            out_layer,
            in_channels: self.in_channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{random_normal, to_vec};
    use crate::TestBackend;

    #[test]
    fn upsamples_latent_eightfold() {
        let device = Default::default();
        let generator = GeneratorConfig::new().init::<TestBackend>(&device).unwrap();

        let output = generator
            .forward(random_normal([2, 257, 8, 8], &device), Mode::Eval)
            .unwrap();
        assert_eq!(output.dims(), [2, 3, 64, 64]);
        assert!(to_vec(output).iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn dense_attention_variant_builds_and_runs() {
        let device = Default::default();
        let generator = GeneratorConfig::new()
            .with_in_channels(9)
            .with_hidden_channels(32)
            .with_attention_kind(AttentionKind::Dense)
            .init::<TestBackend>(&device)
            .unwrap();

        let output = generator
            .forward(random_normal([1, 9, 4, 4], &device), Mode::Train)
            .unwrap();
        assert_eq!(output.dims(), [1, 3, 32, 32]);
    }

    #[test]
    fn attention_head_mismatch_fails_at_init() {
        let device = Default::default();
        let err = GeneratorConfig::new()
            .with_hidden_channels(20)
            .with_num_heads(3)
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn rejects_wrong_latent_width() {
        let device = Default::default();
        let generator = GeneratorConfig::new()
            .with_in_channels(5)
            .with_hidden_channels(16)
            .init::<TestBackend>(&device)
            .unwrap();

        let err = generator
            .forward(random_normal([1, 4, 4, 4], &device), Mode::Eval)
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn eval_forward_is_deterministic() {
        let device = Default::default();
        let generator = GeneratorConfig::new()
            .with_in_channels(5)
            .with_hidden_channels(16)
            .init::<TestBackend>(&device)
            .unwrap();
        let input = random_normal([1, 5, 4, 4], &device);

        let first = generator.forward(input.clone(), Mode::Eval).unwrap();
        let second = generator.forward(input, Mode::Eval).unwrap();
        assert_eq!(to_vec(first), to_vec(second));
    }
}
