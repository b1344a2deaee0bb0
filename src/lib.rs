//! Network definitions for attention-based image-to-image GAN translation.
//!
//! Every network is a burn [`Module`](burn::module::Module) built from a
//! serializable [`Config`](burn::config::Config). See [`ModelConfig`] for the
//! assembled pipeline.

pub mod error;
pub mod model;
pub mod utils;

pub use error::{Error, Result};
pub use model::{
    attention::{AttentionKind, SpatialAttention, SpatialAttentionConfig},
    classifier::{Classifier, ClassifierConfig},
    discriminator::{Discriminator, DiscriminatorConfig},
    encoder::{Encoder, EncoderConfig},
    generator::{Generator, GeneratorConfig},
    noise::Mode,
    vgg19::{FeatureExtractor, FeatureExtractorConfig, FeatureLayer},
    Model, ModelConfig,
};

#[cfg(test)]
pub(crate) type TestBackend = burn::backend::NdArray<f32>;
