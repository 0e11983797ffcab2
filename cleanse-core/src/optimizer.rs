use crate::{
    BatchSampler, CostAdjustment, CostController, InputShape, Model, Objective, Regularization,
    ReversalError, Trigger,
};
use log::{debug, info, warn};
use ndarray::{Array2, Array3};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

const EARLY_STOP_TOLERANCE: f32 = 1e-5;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReversalConfig {
    pub target_label: usize,
    pub input_shape: InputShape,
    pub num_classes: usize,
    pub init_cost: f32,
    pub steps: usize,
    pub learning_rate: f32,
    /// Steps per controller / early-stop check.
    pub mini_batch: usize,
    pub regularization: Regularization,
    pub attack_success_threshold: f32,
    pub patience: usize,
    pub cost_multiplier: f32,
    pub early_stop: bool,
    pub early_stop_threshold: f32,
    pub early_stop_patience: usize,
    pub upsample_factor: usize,
    /// Pattern initialization and clamp range.
    pub intensity_range: [f32; 2],
    pub save_last_instead_of_best: bool,
}

impl ReversalConfig {
    pub fn new(target_label: usize, input_shape: InputShape, num_classes: usize) -> Self {
        let patience = 5;
        Self {
            target_label,
            input_shape,
            num_classes,
            init_cost: 1e-3,
            steps: 1000,
            learning_rate: 0.1,
            mini_batch: 31,
            regularization: Regularization::L1,
            attack_success_threshold: 0.99,
            patience,
            cost_multiplier: 2.0,
            early_stop: true,
            early_stop_threshold: 1.0,
            early_stop_patience: 5 * patience,
            upsample_factor: 1,
            intensity_range: [0.0, 255.0],
            save_last_instead_of_best: false,
        }
    }
}

/// One row of the run log, appended after every gradient step.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StepRecord {
    pub step: usize,
    pub loss_class: f32,
    pub loss_reg: f32,
    pub attack_success_rate: f32,
    pub cost_weight: f32,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopReason {
    EarlyStopped,
    BudgetExhausted,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReversalOutcome {
    pub target_label: usize,
    pub pattern: Array3<f32>,
    pub mask: Array2<f32>,
    pub mask_upsampled: Array2<f32>,
    /// Regularization norm of the reported mask.
    pub reg_norm: f32,
    pub log: Vec<StepRecord>,
    pub stop: StopReason,
    /// False means the success threshold was never sustained: the reported
    /// trigger is a best-effort last state, not a reversed attack.
    pub converged: bool,
}

/// Fatal run failure with the log of every completed step preserved.
#[derive(thiserror::Error, Debug)]
#[error("{error}")]
pub struct FailedRun {
    pub error: ReversalError,
    pub log: Vec<StepRecord>,
}

struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: i32,
    m_pattern: Array3<f32>,
    v_pattern: Array3<f32>,
    m_mask: Array2<f32>,
    v_mask: Array2<f32>,
}

impl Adam {
    // beta values from the reference attack-reversal setup, not the usual
    // 0.9/0.999 defaults
    fn new(lr: f32, trigger: &Trigger) -> Self {
        Self {
            lr,
            beta1: 0.5,
            beta2: 0.9,
            eps: 1e-7,
            t: 0,
            m_pattern: Array3::zeros(trigger.pattern.raw_dim()),
            v_pattern: Array3::zeros(trigger.pattern.raw_dim()),
            m_mask: Array2::zeros(trigger.mask.raw_dim()),
            v_mask: Array2::zeros(trigger.mask.raw_dim()),
        }
    }

    fn step(&mut self, trigger: &mut Trigger, grad_pattern: &Array3<f32>, grad_mask: &Array2<f32>) {
        self.t += 1;
        let lr_t = self.lr * (1.0 - self.beta2.powi(self.t)).sqrt()
            / (1.0 - self.beta1.powi(self.t));
        let (b1, b2, eps) = (self.beta1, self.beta2, self.eps);

        ndarray::Zip::from(&mut trigger.pattern)
            .and(&mut self.m_pattern)
            .and(&mut self.v_pattern)
            .and(grad_pattern)
            .for_each(|p, m, v, &g| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                *p -= lr_t * *m / (v.sqrt() + eps);
            });
        ndarray::Zip::from(&mut trigger.mask)
            .and(&mut self.m_mask)
            .and(&mut self.v_mask)
            .and(grad_mask)
            .for_each(|p, m, v, &g| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                *p -= lr_t * *m / (v.sqrt() + eps);
            });
    }
}

struct BestCandidate {
    pattern: Array3<f32>,
    mask: Array2<f32>,
    reg_norm: f32,
}

/// One trigger-reversal run for a single target label.
pub struct Reversal {
    config: ReversalConfig,
}

impl Reversal {
    pub fn new(config: ReversalConfig) -> Self {
        assert!(config.steps > 0, "steps must be positive");
        assert!(config.mini_batch > 0, "mini_batch must be positive");
        assert!(
            config.intensity_range[0] < config.intensity_range[1],
            "intensity_range must be non-empty"
        );
        Self { config }
    }

    pub fn config(&self) -> &ReversalConfig {
        &self.config
    }

    /// Runs the full optimization, returning the best candidate (or the last
    /// state when `save_last_instead_of_best` is set, or when the success
    /// threshold was never met).
    pub fn run<M: Model, S: BatchSampler>(
        &self,
        model: &M,
        sampler: &mut S,
        seed: &[u8; 32],
    ) -> std::result::Result<ReversalOutcome, FailedRun> {
        let cfg = &self.config;
        let mut log: Vec<StepRecord> = Vec::with_capacity(cfg.steps);
        match self.check_model(model) {
            Ok(()) => {}
            Err(error) => return Err(FailedRun { error, log }),
        }

        let mut rng = StdRng::from_seed(*seed);
        let mut trigger = Trigger::random(
            &cfg.input_shape,
            cfg.upsample_factor,
            cfg.intensity_range,
            &mut rng,
        );
        let mut adam = Adam::new(cfg.learning_rate, &trigger);
        let mut controller = CostController::new(
            cfg.init_cost,
            cfg.cost_multiplier,
            cfg.patience,
            cfg.attack_success_threshold,
        );
        let objective = Objective {
            target_label: cfg.target_label,
            regularization: cfg.regularization,
            upsample_factor: cfg.upsample_factor,
        };

        info!(
            "reversing label {}: {} steps, seed {}",
            cfg.target_label,
            cfg.steps,
            hex::encode(seed)
        );

        let mut best: Option<BestCandidate> = None;
        let mut stop = StopReason::BudgetExhausted;
        let mut best_combined = f32::INFINITY;
        let mut plateau = 0usize;
        // boundary window accumulators
        let (mut sum_class, mut sum_reg, mut sum_combined, mut sum_asr) = (0.0, 0.0, 0.0, 0.0);

        for step in 0..cfg.steps {
            let (batch, _) = sampler.next_batch();
            let mask_up = trigger.mask_upsampled(&cfg.input_shape, cfg.upsample_factor);
            let eval =
                match objective.evaluate(model, &batch, &trigger, &mask_up, controller.cost()) {
                    Ok(eval) => eval,
                    Err(error) => return Err(FailedRun { error, log }),
                };

            adam.step(&mut trigger, &eval.grad_pattern, &eval.grad_mask);
            trigger.mask.mapv_inplace(|v| v.clamp(0.0, 1.0));
            let [lo, hi] = cfg.intensity_range;
            trigger.pattern.mapv_inplace(|v| v.clamp(lo, hi));

            log.push(StepRecord {
                step,
                loss_class: eval.loss_class,
                loss_reg: eval.loss_reg,
                attack_success_rate: eval.attack_success_rate,
                cost_weight: controller.cost(),
            });
            sum_class += eval.loss_class;
            sum_reg += eval.loss_reg;
            sum_combined += eval.loss_combined;
            sum_asr += eval.attack_success_rate;

            if (step + 1) % cfg.mini_batch != 0 {
                continue;
            }

            // mini-batch boundary: averages over the window just completed
            let w = cfg.mini_batch as f32;
            let (avg_class, avg_reg, avg_combined, avg_asr) =
                (sum_class / w, sum_reg / w, sum_combined / w, sum_asr / w);
            (sum_class, sum_reg, sum_combined, sum_asr) = (0.0, 0.0, 0.0, 0.0);

            debug!(
                "label {} step {}: class {:.5} reg {:.5} asr {:.3} cost {:.2e}",
                cfg.target_label,
                step + 1,
                avg_class,
                avg_reg,
                avg_asr,
                controller.cost()
            );

            if avg_asr >= cfg.attack_success_threshold {
                let reg_norm = cfg.regularization.norm(&trigger.mask);
                if best.as_ref().map_or(true, |b| reg_norm < b.reg_norm) {
                    debug!(
                        "label {}: new best mask norm {:.5}",
                        cfg.target_label, reg_norm
                    );
                    best = Some(BestCandidate {
                        pattern: trigger.pattern.clone(),
                        mask: trigger.mask.clone(),
                        reg_norm,
                    });
                }
            }

            match controller.observe(avg_asr) {
                CostAdjustment::Unchanged => {}
                adj => debug!(
                    "label {}: cost weight {:?} to {:.2e}",
                    cfg.target_label,
                    adj,
                    controller.cost()
                ),
            }

            if cfg.early_stop {
                if avg_combined
                    >= cfg.early_stop_threshold * best_combined - EARLY_STOP_TOLERANCE
                {
                    plateau += 1;
                } else {
                    plateau = 0;
                }
                best_combined = best_combined.min(avg_combined);
                if plateau >= cfg.early_stop_patience && controller.initial_success() {
                    info!("label {}: early stop at step {}", cfg.target_label, step + 1);
                    stop = StopReason::EarlyStopped;
                    break;
                }
            }
        }

        let converged = best.is_some();
        if !converged {
            warn!(
                "label {}: attack success threshold never sustained; reporting last state",
                cfg.target_label
            );
        }
        let (pattern, mask, reg_norm) = match best {
            Some(b) if !cfg.save_last_instead_of_best => (b.pattern, b.mask, b.reg_norm),
            _ => {
                let reg_norm = cfg.regularization.norm(&trigger.mask);
                (trigger.pattern, trigger.mask, reg_norm)
            }
        };
        let mask_upsampled = crate::upsample_mask(
            &mask,
            cfg.upsample_factor,
            cfg.input_shape.height,
            cfg.input_shape.width,
        );

        Ok(ReversalOutcome {
            target_label: cfg.target_label,
            pattern,
            mask,
            mask_upsampled,
            reg_norm,
            log,
            stop,
            converged,
        })
    }

    fn check_model<M: Model>(&self, model: &M) -> crate::Result<()> {
        let cfg = &self.config;
        if model.input_shape() != cfg.input_shape {
            return Err(ReversalError::ShapeMismatch {
                expected: cfg.input_shape.to_string(),
                actual: model.input_shape().to_string(),
            });
        }
        if model.num_classes() != cfg.num_classes {
            return Err(ReversalError::ShapeMismatch {
                expected: format!("{} classes", cfg.num_classes),
                actual: format!("{} classes", model.num_classes()),
            });
        }
        if cfg.target_label >= cfg.num_classes {
            return Err(ReversalError::ShapeMismatch {
                expected: format!("target label < {}", cfg.num_classes),
                actual: cfg.target_label.to_string(),
            });
        }
        Ok(())
    }
}
