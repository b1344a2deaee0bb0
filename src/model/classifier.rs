use burn::{
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Linear, LinearConfig,
    },
    prelude::*,
};
use tracing::debug;

use crate::{
    error::{ensure_channels, Error},
    model::layers::ClassifierBlock,
};

/// Auxiliary classification branch: strided conv blocks, global average
/// pooling and a linear head producing unnormalised class logits.
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    blocks: Vec<ClassifierBlock<B>>,
    pool: AdaptiveAvgPool2d,
    head: Linear<B>,
    in_channels: usize,
}
impl<B: Backend> Classifier<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> crate::Result<Tensor<B, 2>> {
        ensure_channels("classifier", input.dims(), self.in_channels)?;

        let output = self
            .blocks
            .iter()
            .fold(input, |output, block| block.forward(output));
        let output = self.pool.forward(output);
        let output = output.flatten(1, 3);

        Ok(self.head.forward(output))
    }
}

#[derive(Config, Debug)]
pub struct ClassifierConfig {
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = 3)]
    pub in_channels: usize,
    #[config(default = "vec![64, 128, 256]")]
    pub widths: Vec<usize>,
}
impl ClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<Classifier<B>> {
        let Some(&features) = self.widths.last() else {
            return Err(Error::config("classifier", "at least one block width is required"));
        };
        if self.num_classes == 0 {
            return Err(Error::config("classifier", "num_classes must be positive"));
        }
        if self.in_channels == 0 || self.widths.contains(&0) {
            return Err(Error::config("classifier", "channel counts must be positive"));
        }

        let mut blocks = Vec::with_capacity(self.widths.len());
        let mut channels = self.in_channels;
        for &width in &self.widths {
            blocks.push(ClassifierBlock::new([channels, width], device));
            channels = width;
        }
        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let head = LinearConfig::new(features, self.num_classes).init(device);

        debug!(num_classes = self.num_classes, features, "classifier initialised");

        Ok(Classifier {
            blocks,
            pool,
            head,
            in_channels: self.in_channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::random_normal;
    use crate::TestBackend;

    #[test]
    fn emits_one_logit_per_class() {
        let device = Default::default();
        let classifier = ClassifierConfig::new()
            .with_num_classes(7)
            .init::<TestBackend>(&device)
            .unwrap();

        let logits = classifier
            .forward(random_normal([2, 3, 64, 64], &device))
            .unwrap();
        assert_eq!(logits.dims(), [2, 7]);
    }

    #[test]
    fn accepts_any_resolution() {
        let device = Default::default();
        let classifier = ClassifierConfig::new().init::<TestBackend>(&device).unwrap();

        for size in [5, 17, 32] {
            let logits = classifier
                .forward(random_normal([1, 3, size, size], &device))
                .unwrap();
            assert_eq!(logits.dims(), [1, 10]);
        }
    }

    #[test]
    fn rejects_zero_classes() {
        let device = Default::default();
        let err = ClassifierConfig::new()
            .with_num_classes(0)
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }
}
