use burn::{
    module::Module,
    nn::conv::{Conv2d, Conv2dConfig},
    prelude::*,
};
use tracing::debug;

use crate::{
    error::{ensure_channels, ensure_min_spatial, Error},
    model::layers::{resize_bilinear, DownBlock},
};

/// Downsamples a single-channel source image into a small spatial code.
///
/// Each stage halves the resolution; the result is projected to
/// `out_channels` and resized bilinearly to `output_size`.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    stages: Vec<DownBlock<B>>,
    bottleneck: DownBlock<B>,
    projection: Conv2d<B>,
    output_height: usize,
    output_width: usize,
    in_channels: usize,
}
impl<B: Backend> Encoder<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> crate::Result<Tensor<B, 4>> {
        ensure_channels("encoder", input.dims(), self.in_channels)?;
        ensure_min_spatial("encoder", input.dims(), self.min_input_size())?;

        let output = self
            .stages
            .iter()
            .fold(input, |output, stage| stage.forward(output));
        let output = self.bottleneck.forward(output);
        let output = self.projection.forward(output);

        Ok(resize_bilinear(output, [self.output_height, self.output_width]))
    }

    /// Smallest height and width that survive every pooling stage.
    pub fn min_input_size(&self) -> usize {
        1 << self.stages.len()
    }
}

#[derive(Config, Debug)]
pub struct EncoderConfig {
    #[config(default = 1)]
    pub in_channels: usize,
    /// Output width of each pooling stage.
    #[config(default = "vec![32, 64, 128, 256]")]
    pub widths: Vec<usize>,
    #[config(default = 1)]
    pub out_channels: usize,
    #[config(default = "[8, 8]")]
    pub output_size: [usize; 2],
}
impl EncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<Encoder<B>> {
        let Some(&last) = self.widths.last() else {
            return Err(Error::config("encoder", "at least one stage width is required"));
        };
        if self.in_channels == 0 || self.out_channels == 0 || self.widths.contains(&0) {
            return Err(Error::config("encoder", "channel counts must be positive"));
        }
        if self.output_size.contains(&0) {
            return Err(Error::config("encoder", "output size must be positive"));
        }

        let mut stages = Vec::with_capacity(self.widths.len());
        let mut channels = self.in_channels;
        for &width in &self.widths {
            stages.push(DownBlock::new([channels, width], true, device));
            channels = width;
        }

        let bottleneck = DownBlock::new([last, last], false, device);
        let projection = Conv2dConfig::new([last, self.out_channels], [1, 1]).init(device);

        debug!(
            stages = self.widths.len(),
            out_channels = self.out_channels,
            output_size = ?self.output_size,
            "encoder initialised"
        );

        Ok(Encoder {
            stages,
            bottleneck,
            projection,
            output_height: self.output_size[0],
            output_width: self.output_size[1],
            in_channels: self.in_channels,
        })
    }
}
