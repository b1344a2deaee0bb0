use burn::{module::Module, prelude::*};
use tracing::debug;

use crate::{
    error::{ensure_channels, ensure_min_spatial, Error},
    model::layers::DiscBlock,
};

/// Patch discriminator: every block halves the resolution, the last feature
/// map is returned as the per-patch score map.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    disc_layers: Vec<DiscBlock<B>>,
    in_channels: usize,
}
impl<B: Backend> Discriminator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> crate::Result<Tensor<B, 4>> {
        ensure_channels("discriminator", input.dims(), self.in_channels)?;
        ensure_min_spatial("discriminator", input.dims(), self.min_input_size())?;

        Ok(self
            .disc_layers
            .iter()
            .fold(input, |output, layer| layer.forward(output)))
    }

    pub fn min_input_size(&self) -> usize {
        1 << self.disc_layers.len()
    }
}

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    #[config(default = 3)]
    pub in_channels: usize,
    #[config(default = "vec![64, 128, 256, 256]")]
    pub widths: Vec<usize>,
}
impl DiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<Discriminator<B>> {
        if self.widths.is_empty() {
            return Err(Error::config("discriminator", "at least one layer width is required"));
        }
        if self.in_channels == 0 || self.widths.contains(&0) {
            return Err(Error::config("discriminator", "channel counts must be positive"));
        }

        let mut disc_layers = Vec::with_capacity(self.widths.len());
        let mut channels = self.in_channels;
        for &width in &self.widths {
            disc_layers.push(DiscBlock::new([channels, width], device));
            channels = width;
        }

        debug!(layers = disc_layers.len(), "discriminator initialised");

        Ok(Discriminator {
            disc_layers,
            in_channels: self.in_channels,
        })
    }
}
