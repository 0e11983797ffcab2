//! Reference classifier used by tests and demos. A single dense layer with
//! softmax output has analytic input gradients, so reversal runs can be
//! exercised end to end without the excluded model-loading machinery.

use crate::{ChannelLayout, InputShape, Model, Result};
use ndarray::{Array1, Array2, Array4, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub struct LinearSoftmax {
    shape: InputShape,
    /// `[num_classes, features]`, features flattened in the layout's order.
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl LinearSoftmax {
    pub fn new(shape: InputShape, weights: Array2<f32>, bias: Array1<f32>) -> Self {
        let features = shape.channels * shape.height * shape.width;
        assert_eq!(weights.dim().1, features, "weight/feature mismatch");
        assert_eq!(weights.dim().0, bias.len(), "weight/bias mismatch");
        Self {
            shape,
            weights,
            bias,
        }
    }

    pub fn random(shape: InputShape, num_classes: usize, seed: [u8; 32]) -> Self {
        let mut rng = StdRng::from_seed(seed);
        let features = shape.channels * shape.height * shape.width;
        let weights =
            Array2::from_shape_fn((num_classes, features), |_| rng.gen_range(-0.1..0.1f32));
        let bias = Array1::from_shape_fn(num_classes, |_| rng.gen_range(-0.1..0.1f32));
        Self::new(shape, weights, bias)
    }

    /// Random classifier with an artificial backdoor: the target label's
    /// score becomes `gain * (region intensity sum - area * activation)` for
    /// the given pixel rectangle (row/col ranges, end-exclusive). With
    /// `activation` above the data's mean intensity the backdoor stays
    /// dormant on clean inputs and fires on a bright stamp.
    pub fn with_planted_trigger(
        shape: InputShape,
        num_classes: usize,
        target_label: usize,
        rows: (usize, usize),
        cols: (usize, usize),
        gain: f32,
        activation: f32,
        seed: [u8; 32],
    ) -> Self {
        let mut model = Self::random(shape, num_classes, seed);
        let mut area = 0;
        for c in 0..shape.channels {
            for i in rows.0..rows.1 {
                for j in cols.0..cols.1 {
                    let f = feature_index(&shape, c, i, j);
                    model.weights[[target_label, f]] += gain;
                    area += 1;
                }
            }
        }
        model.bias[target_label] -= gain * area as f32 * activation;
        model
    }
}

fn feature_index(shape: &InputShape, c: usize, i: usize, j: usize) -> usize {
    match shape.layout {
        ChannelLayout::ChannelsFirst => (c * shape.height + i) * shape.width + j,
        ChannelLayout::ChannelsLast => (i * shape.width + j) * shape.channels + c,
    }
}

impl Model for LinearSoftmax {
    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn num_classes(&self) -> usize {
        self.weights.dim().0
    }

    fn predict(&self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        let n = batch.dim().0;
        let num_classes = self.num_classes();
        let mut probs = Array2::zeros((n, num_classes));
        for b in 0..n {
            let image = batch.index_axis(Axis(0), b);
            let mut scores = self.bias.clone();
            for (f, &x) in image.iter().enumerate() {
                for k in 0..num_classes {
                    scores[k] += self.weights[[k, f]] * x;
                }
            }
            let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let exp = scores.mapv(|s| (s - max).exp());
            let total: f32 = exp.sum();
            for k in 0..num_classes {
                probs[[b, k]] = exp[k] / total;
            }
        }
        Ok(probs)
    }

    fn input_gradients(
        &self,
        batch: &Array4<f32>,
        grad_scores: &Array2<f32>,
    ) -> Result<Array4<f32>> {
        let mut grad = Array4::zeros(batch.raw_dim());
        for (b, mut image_grad) in grad.axis_iter_mut(Axis(0)).enumerate() {
            for (f, g) in image_grad.iter_mut().enumerate() {
                let mut acc = 0.0;
                for k in 0..self.num_classes() {
                    acc += grad_scores[[b, k]] * self.weights[[k, f]];
                }
                *g = acc;
            }
        }
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_is_a_distribution() {
        let shape = InputShape::new(ChannelLayout::ChannelsFirst, 1, 4, 4);
        let model = LinearSoftmax::random(shape, 5, [11u8; 32]);
        let batch = Array4::from_elem((3, 1, 4, 4), 0.5);
        let probs = model.predict(&batch).unwrap();
        for row in probs.rows() {
            let total: f32 = row.sum();
            assert!((total - 1.0).abs() < 1e-5);
            assert!(row.iter().all(|&p| p >= 0.0));
        }
    }

    #[test]
    fn test_planted_trigger_flips_prediction() {
        let shape = InputShape::new(ChannelLayout::ChannelsFirst, 1, 6, 6);
        let model =
            LinearSoftmax::with_planted_trigger(shape, 4, 2, (4, 6), (4, 6), 5.0, 0.6, [12u8; 32]);

        let clean = Array4::from_elem((1, 1, 6, 6), 0.1);
        let mut stamped = clean.clone();
        for i in 4..6 {
            for j in 4..6 {
                stamped[[0, 0, i, j]] = 1.0;
            }
        }

        let argmax = |input: &Array4<f32>| -> usize {
            let probs = model.predict(input).unwrap();
            probs
                .row(0)
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .unwrap()
                .0
        };
        assert_ne!(argmax(&clean), 2);
        assert_eq!(argmax(&stamped), 2);
    }

    #[test]
    fn test_feature_index_layouts() {
        let first = InputShape::new(ChannelLayout::ChannelsFirst, 3, 4, 5);
        assert_eq!(feature_index(&first, 0, 0, 0), 0);
        assert_eq!(feature_index(&first, 1, 2, 3), (1 * 4 + 2) * 5 + 3);
        let last = InputShape::new(ChannelLayout::ChannelsLast, 3, 4, 5);
        assert_eq!(feature_index(&last, 1, 2, 3), (2 * 5 + 3) * 3 + 1);
    }
}
