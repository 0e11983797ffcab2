//! Reverse-engineering of backdoor triggers in fixed image classifiers.
//!
//! Given read-only access to a trained classifier ([`Model`]) and a cyclic
//! batch source ([`BatchSampler`]), a [`Reversal`] run searches for the
//! smallest spatial mask plus color pattern that flips arbitrary inputs to a
//! chosen target label. One run owns one target label; [`scan_labels`] drives
//! a run per label and collects the results.

mod error;
pub use error::*;
mod model;
pub use model::*;
mod sampler;
pub use sampler::*;
mod trigger;
pub use trigger::*;
mod upsample;
pub use upsample::*;
mod objective;
pub use objective::*;
mod controller;
pub use controller::*;
mod optimizer;
pub use optimizer::*;
mod scan;
pub use scan::*;
pub mod baselines;
