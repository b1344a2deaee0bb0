pub mod attention;
pub mod classifier;
pub mod discriminator;
pub mod encoder;
pub mod generator;
mod layers;
pub mod noise;
pub mod vgg19;

use burn::{module::Module, prelude::*};
use tracing::debug;

use crate::{
    error::Error,
    model::{
        classifier::{Classifier, ClassifierConfig},
        discriminator::{Discriminator, DiscriminatorConfig},
        encoder::{Encoder, EncoderConfig},
        generator::{Generator, GeneratorConfig},
        noise::Mode,
    },
};

/// Trainable networks of the translation GAN.
///
/// The perceptual [`vgg19::FeatureExtractor`] is frozen and loaded separately.
#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    pub encoder: Encoder<B>,
    pub generator: Generator<B>,
    pub discriminator: Discriminator<B>,
    pub classifier: Classifier<B>,
    condition_channels: usize,
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Channels of the conditioning map placed in front of the encoder output.
    #[config(default = 256)]
    pub condition_channels: usize,
    #[config(default = "EncoderConfig::new()")]
    pub encoder_config: EncoderConfig,
    #[config(default = "GeneratorConfig::new()")]
    pub generator_config: GeneratorConfig,
    #[config(default = "DiscriminatorConfig::new()")]
    pub discriminator_config: DiscriminatorConfig,
    #[config(default = "ClassifierConfig::new()")]
    pub classifier_config: ClassifierConfig,
}
impl ModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<Model<B>> {
        let latent_channels = self.condition_channels + self.encoder_config.out_channels;
        if self.generator_config.in_channels != latent_channels {
            return Err(Error::shape(
                "model",
                format!(
                    "generator expects {} input channels but condition ({}) + encoder ({}) give {}",
                    self.generator_config.in_channels,
                    self.condition_channels,
                    self.encoder_config.out_channels,
                    latent_channels
                ),
            ));
        }
        if self.discriminator_config.in_channels != self.generator_config.out_channels
            || self.classifier_config.in_channels != self.generator_config.out_channels
        {
            return Err(Error::shape(
                "model",
                format!(
                    "discriminator and classifier must accept the generator's {} output channels",
                    self.generator_config.out_channels
                ),
            ));
        }

        let encoder = self.encoder_config.init(device)?;
        let generator = self.generator_config.init(device)?;
        let discriminator = self.discriminator_config.init(device)?;
        let classifier = self.classifier_config.init(device)?;

        debug!(latent_channels, "model initialised");

        Ok(Model {
            encoder,
            generator,
            discriminator,
            classifier,
            condition_channels: self.condition_channels,
        })
    }
}

impl<B: Backend> Model<B> {
    /// Encodes `source`, stacks it behind `condition` on the channel axis and
    /// decodes the result into an image.
    ///
    /// `condition` must be `[B, condition_channels, h, w]` where `h, w` is the
    /// encoder's output size.
    pub fn translate(
        &self,
        source: Tensor<B, 4>,
        condition: Tensor<B, 4>,
        mode: Mode,
    ) -> crate::Result<Tensor<B, 4>> {
        let encoded = self.encoder.forward(source)?;
        let [batch, _, height, width] = encoded.dims();

        let expected = [batch, self.condition_channels, height, width];
        if condition.dims() != expected {
            return Err(Error::shape(
                "model",
                format!(
                    "condition must be {expected:?} to match the encoded source, got {:?}",
                    condition.dims()
                ),
            ));
        }

        let latent = Tensor::cat(vec![condition, encoded], 1);
        self.generator.forward(latent, mode)
    }

    /// Patch realism scores for a batch of images.
    pub fn discriminate(&self, images: Tensor<B, 4>) -> crate::Result<Tensor<B, 4>> {
        self.discriminator.forward(images)
    }

    /// Class logits for a batch of images.
    pub fn classify(&self, images: Tensor<B, 4>) -> crate::Result<Tensor<B, 2>> {
        self.classifier.forward(images)
    }

    pub fn condition_channels(&self) -> usize {
        self.condition_channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attention::AttentionKind;
    use crate::testing::random_normal;
    use crate::TestBackend;

    fn small_config() -> ModelConfig {
        ModelConfig::new()
            .with_condition_channels(7)
            .with_encoder_config(EncoderConfig::new().with_widths(vec![4, 8]).with_output_size([4, 4]))
            .with_generator_config(
                GeneratorConfig::new()
                    .with_in_channels(8)
                    .with_hidden_channels(16)
                    .with_attention_kind(AttentionKind::Dense),
            )
            .with_discriminator_config(DiscriminatorConfig::new().with_widths(vec![8, 16]))
            .with_classifier_config(ClassifierConfig::new().with_widths(vec![8]).with_num_classes(3))
    }

    #[test]
    fn default_pipeline_translates_to_64px() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TestBackend>(&device).unwrap();

        let images = model
            .translate(
                random_normal([1, 1, 64, 64], &device),
                random_normal([1, 256, 8, 8], &device),
                Mode::Eval,
            )
            .unwrap();
        assert_eq!(images.dims(), [1, 3, 64, 64]);

        let scores = model.discriminate(images.clone()).unwrap();
        assert_eq!(scores.dims(), [1, 256, 4, 4]);
        let logits = model.classify(images).unwrap();
        assert_eq!(logits.dims(), [1, 10]);
    }

    #[test]
    fn small_pipeline_runs_in_training_mode() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();

        let images = model
            .translate(
                random_normal([2, 1, 16, 16], &device),
                random_normal([2, 7, 4, 4], &device),
                Mode::Train,
            )
            .unwrap();
        assert_eq!(images.dims(), [2, 3, 32, 32]);
        assert_eq!(model.discriminate(images.clone()).unwrap().dims(), [2, 16, 8, 8]);
        assert_eq!(model.classify(images).unwrap().dims(), [2, 3]);
    }

    #[test]
    fn mismatched_latent_width_fails_at_init() {
        let device = Default::default();
        let err = small_config()
            .with_condition_channels(6)
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn mismatched_condition_fails_at_forward() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();

        let err = model
            .translate(
                random_normal([2, 1, 16, 16], &device),
                random_normal([2, 7, 8, 8], &device),
                Mode::Eval,
            )
            .unwrap_err();
        assert!(err.to_string().contains("condition must be [2, 7, 4, 4]"));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = small_config();
        let json = config.to_string();

        let restored = ModelConfig::load_binary(json.as_bytes()).unwrap();
        assert_eq!(restored.condition_channels, 7);
        assert_eq!(restored.encoder_config.widths, vec![4, 8]);
        assert_eq!(
            restored.generator_config.attention_kind,
            AttentionKind::Dense
        );
    }
}
