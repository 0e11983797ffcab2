use crate::{BatchSampler, Model, Reversal, ReversalConfig, ReversalOutcome, StepRecord};
use cleanse_utils::{compress_obj, jsonify, run_seed};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LabelReport {
    pub label: usize,
    pub seed: String,
    pub outcome: Option<ReversalOutcome>,
    pub error: Option<String>,
    /// Log preserved from a failed run; successful runs carry theirs inside
    /// the outcome.
    pub partial_log: Vec<StepRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScanReport {
    pub labels: HashMap<usize, LabelReport>,
}

impl ScanReport {
    /// Converged label with the smallest mask norm, the prime backdoor
    /// suspect.
    pub fn smallest_converged(&self) -> Option<(usize, f32)> {
        self.labels
            .values()
            .filter_map(|r| r.outcome.as_ref())
            .filter(|o| o.converged)
            .map(|o| (o.target_label, o.reg_norm))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn not_converged(&self) -> Vec<usize> {
        let mut labels: Vec<usize> = self
            .labels
            .values()
            .filter(|r| r.outcome.as_ref().map_or(true, |o| !o.converged))
            .map(|r| r.label)
            .collect();
        labels.sort();
        labels
    }

    pub fn to_json(&self) -> String {
        jsonify(self)
    }

    pub fn to_compressed(&self) -> Vec<u8> {
        compress_obj(self)
    }
}

/// Runs one reversal per label and collects the results keyed by label. The
/// suspected label (if any) is scanned first; every run gets its own derived
/// seed, and one label's fatal error never aborts its siblings.
pub fn scan_labels<M: Model, S: BatchSampler>(
    model: &M,
    sampler: &mut S,
    config: &ReversalConfig,
    scan_seed: &[u8; 32],
    priority_label: Option<usize>,
) -> ScanReport {
    let mut order: Vec<usize> = (0..config.num_classes).collect();
    if let Some(p) = priority_label.filter(|&p| p < config.num_classes) {
        order.retain(|&l| l != p);
        order.insert(0, p);
    }

    let mut labels = HashMap::new();
    for label in order {
        let seed = run_seed(scan_seed, label);
        let mut cfg = config.clone();
        cfg.target_label = label;
        let report = match Reversal::new(cfg).run(model, sampler, &seed) {
            Ok(outcome) => {
                info!(
                    "label {}: converged={} mask norm {:.5}",
                    label, outcome.converged, outcome.reg_norm
                );
                LabelReport {
                    label,
                    seed: hex::encode(seed),
                    outcome: Some(outcome),
                    error: None,
                    partial_log: Vec::new(),
                }
            }
            Err(failed) => {
                warn!("label {}: run failed: {}", label, failed.error);
                LabelReport {
                    label,
                    seed: hex::encode(seed),
                    outcome: None,
                    error: Some(failed.error.to_string()),
                    partial_log: failed.log,
                }
            }
        };
        labels.insert(label, report);
    }
    ScanReport { labels }
}
