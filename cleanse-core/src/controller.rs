use std::collections::VecDeque;

/// Outcome of one controller observation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CostAdjustment {
    Unchanged,
    Raised,
    Lowered,
}

/// Feedback controller for the cost weight balancing classification loss
/// against mask size. Observes the attack success rate once per mini-batch
/// boundary and only reacts to a sustained trend: the weight moves when the
/// last `patience` observations all sit on the same side of the success
/// threshold, and a single dissenting observation discards the streak. The
/// hard all-or-nothing gate is deliberate; replacing it with an averaged
/// signal changes convergence behavior.
pub struct CostController {
    cost: f32,
    multiplier: f32,
    patience: usize,
    threshold: f32,
    history: VecDeque<f32>,
    initial_success: bool,
}

impl CostController {
    pub fn new(init_cost: f32, multiplier: f32, patience: usize, threshold: f32) -> Self {
        assert!(init_cost > 0.0, "init_cost must be positive");
        assert!(multiplier > 1.0, "cost_multiplier must exceed 1");
        assert!(patience > 0, "patience must be positive");
        Self {
            cost: init_cost,
            multiplier,
            patience,
            threshold,
            history: VecDeque::with_capacity(patience),
            initial_success: false,
        }
    }

    pub fn cost(&self) -> f32 {
        self.cost
    }

    /// Whether the success threshold has ever been met.
    pub fn initial_success(&self) -> bool {
        self.initial_success
    }

    pub fn observe(&mut self, attack_success_rate: f32) -> CostAdjustment {
        if attack_success_rate >= self.threshold {
            self.initial_success = true;
        }

        if self.history.len() == self.patience {
            self.history.pop_front();
        }
        self.history.push_back(attack_success_rate);
        if self.history.len() < self.patience {
            return CostAdjustment::Unchanged;
        }

        if self.initial_success && self.history.iter().all(|&r| r >= self.threshold) {
            // attack already succeeds; push the mask smaller
            self.cost *= self.multiplier;
            self.history.clear();
            CostAdjustment::Raised
        } else if self.history.iter().all(|&r| r < self.threshold) {
            // attack keeps failing; relax the regularization. Floored so the
            // weight never underflows to zero.
            self.cost = (self.cost / self.multiplier).max(f32::MIN_POSITIVE);
            self.history.clear();
            CostAdjustment::Lowered
        } else {
            CostAdjustment::Unchanged
        }
    }
}
