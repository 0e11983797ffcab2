use cleanse_core::{InMemorySampler, InputShape, Model, Result};
use ndarray::{Array2, Array4};
use std::cell::Cell;

/// Classifier stub that always predicts the same label with near-certainty,
/// regardless of input. Constant, so its input gradients are zero.
pub struct ConstantModel {
    pub shape: InputShape,
    pub num_classes: usize,
    pub predicted: usize,
}

impl Model for ConstantModel {
    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        let n = batch.dim().0;
        let rest = 0.01 / (self.num_classes - 1) as f32;
        let mut probs = Array2::from_elem((n, self.num_classes), rest);
        for b in 0..n {
            probs[[b, self.predicted]] = 0.99;
        }
        Ok(probs)
    }

    fn input_gradients(
        &self,
        batch: &Array4<f32>,
        _grad_scores: &Array2<f32>,
    ) -> Result<Array4<f32>> {
        Ok(Array4::zeros(batch.raw_dim()))
    }
}

/// Produces valid output for `good_calls` predictions, then NaN.
pub struct FlakyModel {
    pub inner: ConstantModel,
    pub good_calls: usize,
    pub calls: Cell<usize>,
}

impl Model for FlakyModel {
    fn input_shape(&self) -> InputShape {
        self.inner.shape
    }

    fn num_classes(&self) -> usize {
        self.inner.num_classes
    }

    fn predict(&self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        self.calls.set(self.calls.get() + 1);
        let mut probs = self.inner.predict(batch)?;
        if self.calls.get() > self.good_calls {
            probs[[0, 0]] = f32::NAN;
        }
        Ok(probs)
    }

    fn input_gradients(
        &self,
        batch: &Array4<f32>,
        grad_scores: &Array2<f32>,
    ) -> Result<Array4<f32>> {
        self.inner.input_gradients(batch, grad_scores)
    }
}

/// Uniform random dataset over `[0, 1]` intensities in the given shape.
pub fn random_sampler(shape: &InputShape, num_samples: usize, batch_size: usize) -> InMemorySampler {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    let mut rng = StdRng::from_seed([42u8; 32]);
    let (a, b, c) = shape.image_dims();
    let inputs = Array4::from_shape_fn((num_samples, a, b, c), |_| rng.gen::<f32>());
    let labels = (0..num_samples).map(|i| i % 2).collect();
    InMemorySampler::new(inputs, labels, batch_size, [24u8; 32])
}
