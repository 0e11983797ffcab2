use crate::{ReversalError, Result};
use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis ordering of image tensors. Blending and upsampling consume this
/// explicitly instead of branching on a global flag.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelLayout {
    ChannelsFirst,
    ChannelsLast,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct InputShape {
    pub layout: ChannelLayout,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl InputShape {
    pub fn new(layout: ChannelLayout, channels: usize, height: usize, width: usize) -> Self {
        Self {
            layout,
            channels,
            height,
            width,
        }
    }

    /// Shape of a single image in this layout's axis order.
    pub fn image_dims(&self) -> (usize, usize, usize) {
        match self.layout {
            ChannelLayout::ChannelsFirst => (self.channels, self.height, self.width),
            ChannelLayout::ChannelsLast => (self.height, self.width, self.channels),
        }
    }

    pub fn batch_dims(&self, batch_size: usize) -> (usize, usize, usize, usize) {
        let (a, b, c) = self.image_dims();
        (batch_size, a, b, c)
    }

    /// Mask resolution for a given super-pixel size (ceil division, so the
    /// upsampled mask always covers the full image).
    pub fn mask_dims(&self, upsample_factor: usize) -> (usize, usize) {
        let f = upsample_factor.max(1);
        ((self.height + f - 1) / f, (self.width + f - 1) / f)
    }

    pub fn check_batch(&self, batch: &Array4<f32>) -> Result<()> {
        let (n, _, _, _) = batch.dim();
        if batch.dim() != self.batch_dims(n) {
            return Err(ReversalError::ShapeMismatch {
                expected: format!("{:?}", self.batch_dims(n)),
                actual: format!("{:?}", batch.dim()),
            });
        }
        Ok(())
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.image_dims())
    }
}

/// Read-only classifier under inspection.
///
/// `predict` returns softmax class probabilities of shape
/// `[batch, num_classes]`. `input_gradients` is the vector-Jacobian product
/// through the network: given the loss gradient with respect to the
/// pre-softmax scores, it returns the loss gradient with respect to the
/// input batch. The model's weights are never mutated by a reversal run.
pub trait Model {
    fn input_shape(&self) -> InputShape;

    fn num_classes(&self) -> usize;

    fn predict(&self, batch: &Array4<f32>) -> Result<Array2<f32>>;

    fn input_gradients(&self, batch: &Array4<f32>, grad_scores: &Array2<f32>)
        -> Result<Array4<f32>>;
}
