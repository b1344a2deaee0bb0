use burn::{
    module::{Module, Param},
    prelude::*,
    tensor::Distribution,
};

/// Whether a forward pass is part of training or of inference.
///
/// Passed explicitly to every forward computation whose behaviour depends on
/// it; modules never store it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    Train,
    #[default]
    Eval,
}

/// Adds per-pixel gaussian noise scaled by a learned per-channel weight.
///
/// The noise map is `[B, 1, H, W]` and is shared by all channels. In
/// [`Mode::Eval`] the input is returned untouched.
#[derive(Module, Debug)]
pub struct NoiseInjection<B: Backend> {
    weight: Param<Tensor<B, 1>>,
}

#[derive(Config, Debug)]
pub struct NoiseInjectionConfig {
    pub channels: usize,
    #[config(default = 0.0)]
    pub init_scale: f64,
}

impl NoiseInjectionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> NoiseInjection<B> {
        let weight = Tensor::full([self.channels], self.init_scale, device);

        NoiseInjection {
            weight: Param::from_tensor(weight),
        }
    }
}

impl<B: Backend> NoiseInjection<B> {
    pub fn forward(&self, input: Tensor<B, 4>, mode: Mode) -> Tensor<B, 4> {
        match mode {
            Mode::Eval => input,
            Mode::Train => {
                let [batch, channels, height, width] = input.dims();
                let noise = Tensor::random(
                    [batch, 1, height, width],
                    Distribution::Normal(0.0, 1.0),
                    &input.device(),
                );
                let weight = self.weight.val().reshape([1, channels, 1, 1]);

                input.add(noise.mul(weight))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{random_normal, to_vec};
    use crate::TestBackend;

    #[test]
    fn eval_mode_is_identity() {
        let device = Default::default();
        let noise = NoiseInjectionConfig::new(4)
            .with_init_scale(1.0)
            .init::<TestBackend>(&device);
        let input = random_normal([2, 4, 3, 3], &device);

        let output = noise.forward(input.clone(), Mode::Eval);
        assert_eq!(to_vec(output), to_vec(input));
    }

    #[test]
    fn zero_initialised_weight_adds_nothing_in_training() {
        let device = Default::default();
        let noise = NoiseInjectionConfig::new(4).init::<TestBackend>(&device);
        let input = random_normal([2, 4, 3, 3], &device);

        let output = noise.forward(input.clone(), Mode::Train);
        assert_eq!(to_vec(output), to_vec(input));
    }

    #[test]
    fn training_mode_perturbs_input() {
        let device = Default::default();
        let noise = NoiseInjectionConfig::new(4)
            .with_init_scale(1.0)
            .init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 4, 8, 8], &device);

        let output = noise.forward(input, Mode::Train);
        assert_eq!(output.dims(), [1, 4, 8, 8]);

        let values = to_vec(output);
        assert!(values.iter().any(|v| *v != 0.0));
        // one noise map broadcast over every channel
        let plane = 8 * 8;
        for channel in 1..4 {
            assert_eq!(values[..plane], values[channel * plane..(channel + 1) * plane]);
        }
    }

    #[test]
    fn default_mode_is_eval() {
        assert_eq!(Mode::default(), Mode::Eval);
    }
}
