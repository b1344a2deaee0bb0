//! Spatial self-attention over NCHW feature maps.
//!
//! Two formulations are provided and unified behind [`SpatialAttention`]:
//!
//! - [`DenseSelfAttention`]: 1x1 convolution projections, one N x N attention
//!   map per image (N = H * W) and a learned residual gate.
//! - [`MultiHeadSelfAttention`]: every pixel becomes a token of width C and
//!   goes through scaled dot-product attention split over `num_heads` heads.

use burn::{
    module::{Module, Param},
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::*,
    tensor::activation::softmax,
};
use tracing::debug;

use crate::error::{ensure_channels, Error};

/// Which attention formulation a [`SpatialAttention`] block uses.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum AttentionKind {
    /// Convolution-projected attention with a learned gate.
    Dense,
    /// Multi-head scaled dot-product attention over pixel tokens.
    MultiHead,
}

// ////////////////////////////////////////////////////////////////////////////
// Dense
#[derive(Module, Debug)]
pub struct DenseSelfAttention<B: Backend> {
    query: Conv2d<B>,
    key: Conv2d<B>,
    value: Conv2d<B>,
    gamma: Param<Tensor<B, 1>>,
    channels: usize,
}

#[derive(Config, Debug)]
pub struct DenseSelfAttentionConfig {
    pub channels: usize,
    /// Query and key width is `channels / reduction`.
    #[config(default = 8)]
    pub reduction: usize,
    /// Initial value of the residual gate. Zero makes the block an identity.
    #[config(default = 0.0)]
    pub gate_init: f64,
}

impl DenseSelfAttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<DenseSelfAttention<B>> {
        if self.reduction == 0 {
            return Err(Error::config("dense attention", "reduction must be positive"));
        }
        if self.channels == 0 || self.channels % self.reduction != 0 {
            return Err(Error::shape(
                "dense attention",
                format!(
                    "{} channels cannot be reduced by a factor of {}",
                    self.channels, self.reduction
                ),
            ));
        }
        let inner = self.channels / self.reduction;

        let query = Conv2dConfig::new([self.channels, inner], [1, 1]).init(device);
        let key = Conv2dConfig::new([self.channels, inner], [1, 1]).init(device);
        let value = Conv2dConfig::new([self.channels, self.channels], [1, 1]).init(device);
        let gamma = Param::from_tensor(Tensor::full([1], self.gate_init, device));

        debug!(channels = self.channels, inner, "dense self-attention initialised");

        Ok(DenseSelfAttention {
            query,
            key,
            value,
            gamma,
            channels: self.channels,
        })
    }
}

impl<B: Backend> DenseSelfAttention<B> {
    /// Row-stochastic attention map `[B, N, N]`; row `i` weights every key
    /// position for query position `i`.
    pub fn attention_weights(&self, input: Tensor<B, 4>) -> crate::Result<Tensor<B, 3>> {
        ensure_channels("dense attention", input.dims(), self.channels)?;
        let [batch, _, height, width] = input.dims();
        let positions = height * width;

        let query = self.query.forward(input.clone());
        let inner = query.dims()[1];
        let query = query.reshape([batch, inner, positions]).swap_dims(1, 2);
        let key = self.key.forward(input).reshape([batch, inner, positions]);

        // [B, N, C/r] x [B, C/r, N] -> [B, N, N]
        let energy = query.matmul(key);

        Ok(softmax(energy, 2))
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> crate::Result<Tensor<B, 4>> {
        let [batch, channels, height, width] = input.dims();
        let attention = self.attention_weights(input.clone())?;

        let value = self
            .value
            .forward(input.clone())
            .reshape([batch, channels, height * width]);
        let attended = value
            .matmul(attention.swap_dims(1, 2))
            .reshape([batch, channels, height, width]);

        let gamma = self.gamma.val().reshape([1, 1, 1, 1]);
        Ok(attended.mul(gamma).add(input))
    }

    /// Current value of the residual gate.
    pub fn gate(&self) -> Tensor<B, 1> {
        self.gamma.val()
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Multi-head
#[derive(Module, Debug)]
pub struct MultiHeadSelfAttention<B: Backend> {
    attention: MultiHeadAttention<B>,
    channels: usize,
    num_heads: usize,
}

#[derive(Config, Debug)]
pub struct MultiHeadSelfAttentionConfig {
    pub channels: usize,
    #[config(default = 4)]
    pub num_heads: usize,
}

impl MultiHeadSelfAttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<MultiHeadSelfAttention<B>> {
        if self.num_heads == 0 {
            return Err(Error::config("multi-head attention", "num_heads must be positive"));
        }
        if self.channels == 0 || self.channels % self.num_heads != 0 {
            return Err(Error::shape(
                "multi-head attention",
                format!(
                    "{} channels are not divisible by {} heads",
                    self.channels, self.num_heads
                ),
            ));
        }

        let attention = MultiHeadAttentionConfig::new(self.channels, self.num_heads)
            .with_dropout(0.0)
            .init(device);

        debug!(
            channels = self.channels,
            heads = self.num_heads,
            "multi-head self-attention initialised"
        );

        Ok(MultiHeadSelfAttention {
            attention,
            channels: self.channels,
            num_heads: self.num_heads,
        })
    }
}

impl<B: Backend> MultiHeadSelfAttention<B> {
    /// [B, C, W, L] -> [B, W * L, C], tokens in row-major pixel order.
    fn to_tokens(input: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, channels, width, length] = input.dims();
        input
            .reshape([batch, channels, width * length])
            .swap_dims(1, 2)
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> crate::Result<Tensor<B, 4>> {
        ensure_channels("multi-head attention", input.dims(), self.channels)?;
        let [batch, channels, width, length] = input.dims();

        let tokens = Self::to_tokens(input);
        let output = self.attention.forward(MhaInput::self_attn(tokens));

        Ok(output
            .context
            .swap_dims(1, 2)
            .reshape([batch, channels, width, length]))
    }

    /// Per-head attention maps `[B, heads, N, N]`.
    pub fn attention_weights(&self, input: Tensor<B, 4>) -> crate::Result<Tensor<B, 4>> {
        ensure_channels("multi-head attention", input.dims(), self.channels)?;
        let tokens = Self::to_tokens(input);
        Ok(self.attention.forward(MhaInput::self_attn(tokens)).weights)
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Spatial attention
#[derive(Module, Debug)]
pub enum SpatialAttention<B: Backend> {
    Dense(DenseSelfAttention<B>),
    MultiHead(MultiHeadSelfAttention<B>),
}

#[derive(Config, Debug)]
pub struct SpatialAttentionConfig {
    pub channels: usize,
    #[config(default = "AttentionKind::MultiHead")]
    pub kind: AttentionKind,
    /// Only used by [`AttentionKind::MultiHead`].
    #[config(default = 4)]
    pub num_heads: usize,
    /// Only used by [`AttentionKind::Dense`].
    #[config(default = 8)]
    pub reduction: usize,
    /// Only used by [`AttentionKind::Dense`].
    #[config(default = 0.0)]
    pub gate_init: f64,
}

impl SpatialAttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<SpatialAttention<B>> {
        let block = match self.kind {
            AttentionKind::Dense => SpatialAttention::Dense(
                DenseSelfAttentionConfig::new(self.channels)
                    .with_reduction(self.reduction)
                    .with_gate_init(self.gate_init)
                    .init(device)?,
            ),
            AttentionKind::MultiHead => SpatialAttention::MultiHead(
                MultiHeadSelfAttentionConfig::new(self.channels)
                    .with_num_heads(self.num_heads)
                    .init(device)?,
            ),
        };
        Ok(block)
    }
}

impl<B: Backend> SpatialAttention<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> crate::Result<Tensor<B, 4>> {
        match self {
            Self::Dense(block) => block.forward(input),
            Self::MultiHead(block) => block.forward(input),
        }
    }

    pub fn kind(&self) -> AttentionKind {
        match self {
            Self::Dense(_) => AttentionKind::Dense,
            Self::MultiHead(_) => AttentionKind::MultiHead,
        }
    }
}
