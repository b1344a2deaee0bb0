//! Frozen VGG19 prefix used as a fixed perceptual feature transform.
//!
//! Only the convolutional trunk up to the selected activation is built. The
//! weights are expected in a burn named-msgpack record produced from this
//! module's own layout (see [`FeatureExtractor::save`]).

use std::path::Path;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder, RecorderError},
    tensor::activation::relu,
};
use tracing::{debug, info};

use crate::error::{ensure_channels, ensure_min_spatial, Error};

/// (output channels, convolutions) of each VGG19 stage.
const VGG19_STAGES: [(usize, usize); 5] = [(64, 2), (128, 2), (256, 4), (512, 4), (512, 4)];

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Activation at which the trunk is cut.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum FeatureLayer {
    /// `relu1_2`: 64 channels, full resolution.
    Block1,
    /// `relu2_2`: 128 channels, 1/2 resolution.
    Block2,
    /// `relu3_4`: 256 channels, 1/4 resolution.
    Block3,
    /// `relu4_4`: 512 channels, 1/8 resolution.
    Block4,
    /// `relu5_4`: 512 channels, 1/16 resolution.
    Block5,
}

impl FeatureLayer {
    pub fn stages(&self) -> usize {
        match self {
            Self::Block1 => 1,
            Self::Block2 => 2,
            Self::Block3 => 3,
            Self::Block4 => 4,
            Self::Block5 => 5,
        }
    }

    pub fn channels(&self) -> usize {
        VGG19_STAGES[self.stages() - 1].0
    }

    /// Factor by which height and width shrink.
    pub fn downsampling(&self) -> usize {
        1 << (self.stages() - 1)
    }
}

#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    stages: usize,
    normalize: bool,
}

#[derive(Config, Debug)]
pub struct FeatureExtractorConfig {
    #[config(default = "FeatureLayer::Block3")]
    pub layer: FeatureLayer,
    /// Map `[-1, 1]` inputs to ImageNet statistics before the first conv.
    #[config(default = true)]
    pub normalize: bool,
}

impl FeatureExtractorConfig {
    /// Randomly initialised and frozen. Use [`Self::init_pretrained`] for real features.
    pub fn init<B: Backend>(&self, device: &B::Device) -> FeatureExtractor<B> {
        let stages = self.layer.stages();
        let mut convs = Vec::new();
        let mut channels = 3;
        for &(width, count) in VGG19_STAGES.iter().take(stages) {
            for _ in 0..count {
                convs.push(
                    Conv2dConfig::new([channels, width], [3, 3])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .init(device),
                );
                channels = width;
            }
        }
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        debug!(layer = ?self.layer, convs = convs.len(), "feature extractor initialised");

        FeatureExtractor {
            convs,
            pool,
            stages,
            normalize: self.normalize,
        }
        .no_grad()
    }

    pub fn init_pretrained<B: Backend, P: AsRef<Path>>(
        &self,
        path: P,
        device: &B::Device,
    ) -> crate::Result<FeatureExtractor<B>> {
        self.init(device).load(path, device)
    }
}

impl<B: Backend> FeatureExtractor<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> crate::Result<Tensor<B, 4>> {
        ensure_channels("feature extractor", input.dims(), 3)?;
        ensure_min_spatial("feature extractor", input.dims(), 1 << (self.stages - 1))?;

        let mut output = if self.normalize {
            imagenet_norm(input)
        } else {
            input
        };

        let mut convs = self.convs.iter();
        for (stage, &(_, count)) in VGG19_STAGES.iter().take(self.stages).enumerate() {
            if stage > 0 {
                output = self.pool.forward(output);
            }
            for conv in convs.by_ref().take(count) {
                output = relu(conv.forward(output));
            }
        }

        Ok(output)
    }

    /// Loads pretrained weights and freezes them.
    pub fn load<P: AsRef<Path>>(self, path: P, device: &B::Device) -> crate::Result<Self> {
        let path = path.as_ref();
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let record: FeatureExtractorRecord<B> =
            Recorder::<B>::load(&recorder, path.to_path_buf(), device)
                .map_err(|err| record_error(path, err))?;
        info!(path = %path.display(), "loaded feature extractor weights");

        Ok(self.load_record(record).no_grad())
    }

    /// Writes the weights in the layout [`Self::load`] reads.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let path = path.as_ref();
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        Recorder::<B>::record(&recorder, self.clone().into_record(), path.to_path_buf())
            .map_err(|err| record_error(path, err))
    }
}

fn record_error(path: &Path, err: RecorderError) -> Error {
    Error::Record {
        path: path.display().to_string(),
        reason: format!("{err:?}"),
    }
}

/// `[-1, 1]` -> ImageNet-normalised input.
fn imagenet_norm<B: Backend>(input: Tensor<B, 4>) -> Tensor<B, 4> {
    let device = &input.device();
    let scaled = (input + 1.0) / 2.0;
    let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN, device).reshape([1, 3, 1, 1]);
    let std = Tensor::<B, 1>::from_floats(IMAGENET_STD, device).reshape([1, 3, 1, 1]);

    (scaled - mean) / std
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_close, random_normal, to_vec};
    use crate::TestBackend;

    #[test]
    fn block3_matches_relu3_4_shape() {
        let device = Default::default();
        let extractor = FeatureExtractorConfig::new().init::<TestBackend>(&device);

        let features = extractor
            .forward(random_normal([1, 3, 32, 32], &device))
            .unwrap();
        assert_eq!(features.dims(), [1, 256, 8, 8]);
        assert!(to_vec(features).iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn layer_selection_controls_depth() {
        let device = Default::default();
        for layer in [FeatureLayer::Block1, FeatureLayer::Block2, FeatureLayer::Block4] {
            let channels = layer.channels();
            let factor = layer.downsampling();
            let extractor = FeatureExtractorConfig::new()
                .with_layer(layer)
                .init::<TestBackend>(&device);

            let features = extractor
                .forward(random_normal([1, 3, 16, 16], &device))
                .unwrap();
            assert_eq!(features.dims(), [1, channels, 16 / factor, 16 / factor]);
        }
    }

    #[test]
    fn parameters_are_frozen() {
        let device = Default::default();
        let extractor = FeatureExtractorConfig::new().init::<TestBackend>(&device);

        assert_eq!(extractor.convs.len(), 8);
        assert!(extractor
            .convs
            .iter()
            .all(|conv| !conv.weight.is_require_grad()));
    }

    #[test]
    fn imagenet_norm_maps_mid_grey() {
        let device = Default::default();
        let grey = Tensor::<TestBackend, 4>::zeros([1, 3, 1, 1], &device);

        let expected = IMAGENET_MEAN
            .iter()
            .zip(IMAGENET_STD)
            .map(|(mean, std)| (0.5 - mean) / std)
            .collect::<Vec<_>>();
        let expected = Tensor::<TestBackend, 1>::from_floats(expected.as_slice(), &device)
            .reshape([1, 3, 1, 1]);

        assert_close(imagenet_norm(grey), expected, 1e-5);
    }

    #[test]
    fn missing_weights_file_is_reported() {
        let device = Default::default();
        let err = FeatureExtractorConfig::new()
            .init_pretrained::<TestBackend, _>("/nonexistent/attngan/vgg19", &device)
            .unwrap_err();

        match err {
            Error::Record { path, .. } => assert_eq!(path, "/nonexistent/attngan/vgg19"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn saved_weights_load_back() {
        let device = Default::default();
        let config = FeatureExtractorConfig::new().with_layer(FeatureLayer::Block1);
        let original = config.init::<TestBackend>(&device);
        let path = std::env::temp_dir().join(format!("attngan-vgg-{}", std::process::id()));
        original.save(&path).unwrap();

        let restored = config.init_pretrained::<TestBackend, _>(&path, &device).unwrap();
        let input = random_normal([1, 3, 4, 4], &device);
        assert_close(
            restored.forward(input.clone()).unwrap(),
            original.forward(input).unwrap(),
            1e-6,
        );

        let _ = std::fs::remove_file(path.with_extension("mpk"));
    }
}
