use ndarray::{Array4, Axis};
use rand::{prelude::SliceRandom, rngs::SmallRng, SeedableRng};

/// Cyclic source of `(input_batch, label_batch)` pairs. Restartable and
/// infinite in practice: implementations wrap around their backing data.
pub trait BatchSampler {
    fn batch_size(&self) -> usize;

    fn next_batch(&mut self) -> (Array4<f32>, Vec<usize>);
}

/// Sampler over arrays already resident in memory. Visits every sample once
/// per pass in shuffled order and reshuffles on wrap-around.
pub struct InMemorySampler {
    inputs: Array4<f32>,
    labels: Vec<usize>,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
    rng: SmallRng,
}

impl InMemorySampler {
    pub fn new(inputs: Array4<f32>, labels: Vec<usize>, batch_size: usize, seed: [u8; 32]) -> Self {
        assert_eq!(inputs.dim().0, labels.len(), "inputs/labels length mismatch");
        assert!(batch_size > 0, "batch_size must be positive");
        let mut rng = SmallRng::from_seed(seed);
        let mut order: Vec<usize> = (0..labels.len()).collect();
        order.shuffle(&mut rng);
        Self {
            inputs,
            labels,
            batch_size,
            order,
            cursor: 0,
            rng,
        }
    }

    pub fn num_samples(&self) -> usize {
        self.labels.len()
    }
}

impl BatchSampler for InMemorySampler {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn next_batch(&mut self) -> (Array4<f32>, Vec<usize>) {
        let mut picked = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size {
            if self.cursor == self.order.len() {
                self.order.shuffle(&mut self.rng);
                self.cursor = 0;
            }
            picked.push(self.order[self.cursor]);
            self.cursor += 1;
        }
        let batch = self.inputs.select(Axis(0), &picked);
        let labels = picked.iter().map(|&i| self.labels[i]).collect();
        (batch, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn sampler(num_samples: usize, batch_size: usize) -> InMemorySampler {
        let inputs = Array4::from_shape_fn((num_samples, 1, 2, 2), |(n, _, i, j)| {
            (n * 4 + i * 2 + j) as f32
        });
        let labels = (0..num_samples).collect();
        InMemorySampler::new(inputs, labels, batch_size, [7u8; 32])
    }

    #[test]
    fn test_batches_have_requested_size() {
        let mut s = sampler(10, 3);
        for _ in 0..20 {
            let (batch, labels) = s.next_batch();
            assert_eq!(batch.dim().0, 3);
            assert_eq!(labels.len(), 3);
        }
    }

    #[test]
    fn test_every_sample_visited_once_per_pass() {
        let mut s = sampler(12, 4);
        let mut seen: Vec<usize> = Vec::new();
        for _ in 0..3 {
            let (_, labels) = s.next_batch();
            seen.extend(labels);
        }
        seen.sort();
        assert_eq!(seen, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_labels_track_inputs() {
        let mut s = sampler(8, 8);
        let (batch, labels) = s.next_batch();
        for (row, &label) in labels.iter().enumerate() {
            // first pixel of sample n is n * 4
            assert_eq!(batch[[row, 0, 0, 0]], (label * 4) as f32);
        }
    }
}
