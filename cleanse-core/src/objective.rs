use crate::{blend, ChannelLayout, Model, ReversalError, Result, Trigger};
use ndarray::{Array2, Array3, Array4};
use serde::{Deserialize, Serialize};

const PROB_FLOOR: f32 = 1e-12;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Regularization {
    L1,
    L2,
}

impl Regularization {
    pub fn norm(&self, mask: &Array2<f32>) -> f32 {
        match self {
            Regularization::L1 => mask.iter().map(|v| v.abs()).sum(),
            Regularization::L2 => mask.iter().map(|v| v * v).sum(),
        }
    }

    fn grad(&self, mask: &Array2<f32>) -> Array2<f32> {
        match self {
            Regularization::L1 => mask.mapv(|v| {
                if v > 0.0 {
                    1.0
                } else if v < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }),
            Regularization::L2 => mask.mapv(|v| 2.0 * v),
        }
    }
}

/// One scored mini-batch: both loss terms, their weighted combination, the
/// attack success rate, and the combined-loss gradients wrt pattern and mask.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub loss_class: f32,
    pub loss_reg: f32,
    pub loss_combined: f32,
    pub attack_success_rate: f32,
    pub grad_pattern: Array3<f32>,
    pub grad_mask: Array2<f32>,
}

/// Scores blended batches against the target label and differentiates the
/// combined objective through the model's input gradients.
pub struct Objective {
    pub target_label: usize,
    pub regularization: Regularization,
    pub upsample_factor: usize,
}

impl Objective {
    pub fn evaluate<M: Model>(
        &self,
        model: &M,
        batch: &Array4<f32>,
        trigger: &Trigger,
        mask_up: &Array2<f32>,
        cost_weight: f32,
    ) -> Result<Evaluation> {
        let shape = model.input_shape();
        shape.check_batch(batch)?;
        let n = batch.dim().0;

        let blended = blend(batch, &trigger.pattern, mask_up, shape.layout);
        let probs = model.predict(&blended)?;
        if probs.dim() != (n, model.num_classes()) {
            return Err(ReversalError::ShapeMismatch {
                expected: format!("{:?}", (n, model.num_classes())),
                actual: format!("{:?}", probs.dim()),
            });
        }
        ensure_finite(probs.iter(), "model predictions")?;

        // mean categorical cross-entropy toward the one-hot target
        let loss_class = probs
            .rows()
            .into_iter()
            .map(|row| -row[self.target_label].max(PROB_FLOOR).ln())
            .sum::<f32>()
            / n as f32;

        let hits = probs
            .rows()
            .into_iter()
            .filter(|row| argmax(row.iter().copied()) == self.target_label)
            .count();
        let attack_success_rate = hits as f32 / n as f32;

        // d(mean CE)/d(scores) for softmax scores
        let mut grad_scores = probs.clone();
        for mut row in grad_scores.rows_mut() {
            row[self.target_label] -= 1.0;
        }
        grad_scores.mapv_inplace(|v| v / n as f32);

        let grad_input = model.input_gradients(&blended, &grad_scores)?;
        if grad_input.dim() != batch.dim() {
            return Err(ReversalError::ShapeMismatch {
                expected: format!("{:?}", batch.dim()),
                actual: format!("{:?}", grad_input.dim()),
            });
        }
        ensure_finite(grad_input.iter(), "input gradients")?;

        // chain rule through the blend:
        //   d/dpattern = g * m', summed over the batch
        //   d/dmask'   = g * (pattern - x), summed over batch and channels
        let mut grad_pattern = Array3::zeros(trigger.pattern.raw_dim());
        let mut grad_mask_up = Array2::zeros(mask_up.raw_dim());
        match shape.layout {
            ChannelLayout::ChannelsFirst => {
                for ((b, c, i, j), &g) in grad_input.indexed_iter() {
                    grad_pattern[[c, i, j]] += g * mask_up[[i, j]];
                    grad_mask_up[[i, j]] += g * (trigger.pattern[[c, i, j]] - batch[[b, c, i, j]]);
                }
            }
            ChannelLayout::ChannelsLast => {
                for ((b, i, j, c), &g) in grad_input.indexed_iter() {
                    grad_pattern[[i, j, c]] += g * mask_up[[i, j]];
                    grad_mask_up[[i, j]] += g * (trigger.pattern[[i, j, c]] - batch[[b, i, j, c]]);
                }
            }
        }

        let (mh, mw) = trigger.mask.dim();
        let mut grad_mask = crate::fold_mask_grad(&grad_mask_up, self.upsample_factor, mh, mw);
        grad_mask += &self
            .regularization
            .grad(&trigger.mask)
            .mapv(|v| v * cost_weight);

        let loss_reg = self.regularization.norm(&trigger.mask);
        Ok(Evaluation {
            loss_class,
            loss_reg,
            loss_combined: loss_class + cost_weight * loss_reg,
            attack_success_rate,
            grad_pattern,
            grad_mask,
        })
    }
}

fn argmax(iter: impl Iterator<Item = f32>) -> usize {
    let mut best = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, val) in iter.enumerate() {
        if val > best_val {
            best = idx;
            best_val = val;
        }
    }
    best
}

fn ensure_finite<'a>(mut values: impl Iterator<Item = &'a f32>, what: &str) -> Result<()> {
    if values.any(|v| !v.is_finite()) {
        Err(ReversalError::ModelEvaluation(format!(
            "non-finite values in {}",
            what
        )))
    } else {
        Ok(())
    }
}
