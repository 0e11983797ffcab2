use crate::{upsample_mask, ChannelLayout, InputShape};
use ndarray::{Array2, Array3, Array4, Zip};
use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};

/// Current trigger hypothesis: a full-resolution color pattern and a
/// (possibly coarsened) spatial mask. Owned by exactly one reversal run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Trigger {
    pub pattern: Array3<f32>,
    pub mask: Array2<f32>,
}

impl Trigger {
    /// Random initialization: pattern uniform over the intensity range, mask
    /// uniform over `[0, 1]`.
    pub fn random(
        shape: &InputShape,
        upsample_factor: usize,
        intensity_range: [f32; 2],
        rng: &mut StdRng,
    ) -> Self {
        let [lo, hi] = intensity_range;
        let pattern = Array3::from_shape_fn(shape.image_dims(), |_| rng.gen_range(lo..hi));
        let mask = Array2::from_shape_fn(shape.mask_dims(upsample_factor), |_| rng.gen::<f32>());
        Self { pattern, mask }
    }

    /// Mask expanded to full spatial resolution.
    pub fn mask_upsampled(&self, shape: &InputShape, upsample_factor: usize) -> Array2<f32> {
        upsample_mask(&self.mask, upsample_factor, shape.height, shape.width)
    }
}

/// Blends a raw batch with the trigger: `x * (1 - m') + p * m'` with the
/// upsampled mask broadcast across the channel axis. Pure; no input is
/// mutated.
pub fn blend(
    batch: &Array4<f32>,
    pattern: &Array3<f32>,
    mask_up: &Array2<f32>,
    layout: ChannelLayout,
) -> Array4<f32> {
    let mut out = batch.to_owned();
    match layout {
        ChannelLayout::ChannelsFirst => {
            Zip::indexed(&mut out).for_each(|(_, c, i, j), v| {
                let m = mask_up[[i, j]];
                *v = *v * (1.0 - m) + pattern[[c, i, j]] * m;
            });
        }
        ChannelLayout::ChannelsLast => {
            Zip::indexed(&mut out).for_each(|(_, i, j, c), v| {
                let m = mask_up[[i, j]];
                *v = *v * (1.0 - m) + pattern[[i, j, c]] * m;
            });
        }
    }
    out
}
